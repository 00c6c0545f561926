use anyhow::Result;
use clap::Parser;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use episode_toolkit::cli::{Cli, Commands};
use episode_toolkit::config::Config;
use episode_toolkit::index::IndexRange;
use episode_toolkit::merge::{
    default_workers, BatchMergeSpec, BatchMerger, PairMergeSpec, PairMerger,
};
use episode_toolkit::progress;
use episode_toolkit::scan::{choose_most_complete, scan_txt_folder};
use episode_toolkit::sheets::{
    parse_name_list, HeaderRenamer, RenameSpec, SheetMergeSpec, SheetMerger, SheetSelection,
};
use episode_toolkit::sources::{
    bilibili, speech, BilibiliSource, DescriptionSource, SheetStore, SpeechApiClient, XlsxStore,
};
use episode_toolkit::utils::format_file_size;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "epkit=debug" } else { "epkit=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().await?;
    let quiet = cli.quiet;

    match cli.command {
        Commands::Scan { dir, recursive } => {
            let result = scan_txt_folder(&dir, recursive)?;

            println!("Scanned {} ({} files):", dir.display(), result.file_count());
            println!("  Indexed episodes: {}", result.mapping.len());
            for (idx, files) in &result.mapping {
                if files.len() == 1 {
                    println!(
                        "    P{} -> {} ({})",
                        idx,
                        files[0].file_name(),
                        format_file_size(files[0].size)
                    );
                } else if let Some(chosen) = choose_most_complete(files) {
                    println!(
                        "    P{} -> {} duplicates, most complete: {}",
                        idx,
                        files.len(),
                        chosen.file_name()
                    );
                }
            }
            if !result.no_index.is_empty() {
                println!("  Files without an episode token: {}", result.no_index.len());
                for file in &result.no_index {
                    println!("    {}", file.file_name());
                }
            }
        }

        Commands::MergePairs {
            left,
            right,
            output,
            order,
            no_headers,
            recursive,
            overwrite,
            min_index,
            max_index,
            encoding,
        } => {
            // Range problems abort before any scanning starts.
            let range = IndexRange::new(min_index, max_index)?;
            let out_dir = output.unwrap_or_else(|| {
                left.parent().unwrap_or(&left).join("merged_output")
            });

            let merger = PairMerger::new(PairMergeSpec {
                order,
                section_headers: !no_headers,
                recursive,
                overwrite,
                range,
                encoding,
            });

            let plan = merger.plan(&left, &right)?;
            tracing::info!(
                "matched {} episode(s); left-only {}, right-only {}",
                plan.matched.len(),
                plan.unmatched_left.len(),
                plan.unmatched_right.len()
            );
            if plan.left_no_index + plan.right_no_index > 0 {
                tracing::info!(
                    "ignored {} file(s) without an episode token",
                    plan.left_no_index + plan.right_no_index
                );
            }
            if !plan.left_duplicates.is_empty() || !plan.right_duplicates.is_empty() {
                tracing::info!(
                    "duplicate indices (most complete file wins): left {:?}, right {:?}",
                    plan.left_duplicates,
                    plan.right_duplicates
                );
            }

            tracing::info!("writing {} merged files into {}", encoding, out_dir.display());
            let (tx, renderer) = progress::spawn_renderer(quiet);
            let summary = merger.run(&plan, &out_dir, &tx)?;
            drop(tx);
            renderer.await?;
            tracing::debug!("summary: {}", serde_json::to_string(&summary)?);

            println!("Merge finished:");
            println!("  merged:  {}", summary.merged);
            println!("  failed:  {}", summary.failed);
            println!("  output:  {}", out_dir.display());
            if !summary.unmatched_left.is_empty() {
                println!(
                    "  only in {}: {:?}",
                    left.display(),
                    summary.unmatched_left
                );
            }
            if !summary.unmatched_right.is_empty() {
                println!(
                    "  only in {}: {:?}",
                    right.display(),
                    summary.unmatched_right
                );
            }
        }

        Commands::MergeBatch {
            input,
            output,
            batch_size,
            sort,
            title,
            keep_duplicate_title,
            blank_lines,
            separator,
            workers,
            overwrite,
            encoding,
        } => {
            let out_dir = output.unwrap_or_else(|| input.join("merged_output"));
            let workers = workers
                .or(config.merge.workers)
                .unwrap_or_else(default_workers);

            let merger = BatchMerger::new(BatchMergeSpec {
                batch_size: batch_size.unwrap_or(config.merge.batch_size),
                sort,
                title,
                dedupe_title: !keep_duplicate_title,
                blank_lines: blank_lines.unwrap_or(config.merge.blank_lines),
                separator,
                workers,
                overwrite,
                encoding,
            });

            // Ctrl-C requests cooperative cancellation; in-flight work finishes.
            let cancel = merger.cancel_flag();
            tokio::spawn({
                let cancel = Arc::clone(&cancel);
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("cancellation requested, finishing in-flight work");
                        cancel.store(true, Ordering::Relaxed);
                    }
                }
            });

            let (tx, renderer) = progress::spawn_renderer(quiet);
            let summary = merger.run(&input, &out_dir, &tx).await?;
            drop(tx);
            renderer.await?;
            tracing::debug!("summary: {}", serde_json::to_string(&summary)?);

            println!("Batch merge finished:");
            println!("  files found:    {}", summary.files_found);
            println!("  files merged:   {}", summary.files_merged);
            println!("  groups written: {}", summary.groups_written);
            println!("  groups skipped: {}", summary.groups_skipped);
            println!("  read failures:  {}", summary.read_failures);
            println!("  write failures: {}", summary.write_failures);
            if summary.cancelled {
                println!("  (cancelled; partial results kept)");
            }
            println!("  output: {}", out_dir.display());
        }

        Commands::FetchDescriptions {
            video,
            output,
            cookie,
            overwrite,
        } => {
            let source = BilibiliSource::new(&config.bilibili, cookie)?;
            tracing::info!("fetching collection via {}", source.source_name());

            let episodes = source.fetch_collection(&video).await?;

            let (tx, renderer) = progress::spawn_renderer(quiet);
            let summary = bilibili::export_descriptions(&episodes, &output, overwrite, &tx)?;
            drop(tx);
            renderer.await?;

            println!("Export finished:");
            println!("  files written: {}", summary.written);
            println!("  empty descriptions: {}", summary.empty);
            println!("  output: {}", output.display());
        }

        Commands::Transcribe {
            files,
            output,
            workers,
        } => {
            let client = SpeechApiClient::new(&config.speech)?;
            let workers = workers.unwrap_or(config.speech.max_concurrent_jobs);

            let (tx, renderer) = progress::spawn_renderer(quiet);
            let summary = speech::transcribe_files(
                Arc::new(client),
                &files,
                &output,
                workers,
                &tx,
            )
            .await?;
            drop(tx);
            renderer.await?;

            println!("Transcription finished:");
            println!("  succeeded: {}", summary.succeeded);
            println!("  failed:    {}", summary.failed);
            println!("  output:    {}", output.display());
        }

        Commands::RenameHeaders {
            input,
            columns,
            output,
            all_sheets,
            sheets,
            mode,
            suffix,
            recursive,
            workers,
        } => {
            let out_dir = output.unwrap_or_else(|| input.join("renamed_headers"));
            let selection = if let Some(names) = sheets {
                SheetSelection::Named(parse_name_list(&names))
            } else if all_sheets {
                SheetSelection::All
            } else {
                SheetSelection::First
            };

            let renamer = HeaderRenamer::new(
                RenameSpec {
                    headers: parse_name_list(&columns),
                    selection,
                    mode,
                    recursive,
                    suffix,
                    workers: workers.unwrap_or_else(default_workers),
                },
                Arc::new(XlsxStore) as Arc<dyn SheetStore>,
            );

            let (tx, renderer) = progress::spawn_renderer(quiet);
            let summary = renamer.run(&input, &out_dir, &tx).await?;
            drop(tx);
            renderer.await?;
            tracing::debug!("summary: {}", serde_json::to_string(&summary)?);

            println!("Header rewrite finished:");
            println!("  files renamed:  {}", summary.files_ok);
            println!("  files failed:   {}", summary.files_failed);
            println!("  sheets touched: {}", summary.sheets_renamed);
            println!("  output: {}", out_dir.display());
        }

        Commands::MergeSheets {
            input,
            output,
            by_sheet,
            intersect_columns,
            no_source_columns,
            keep_empty_rows,
            dedup_on,
            recursive,
            workers,
        } => {
            let out_file = output.unwrap_or_else(|| input.join("merged.xlsx"));

            let merger = SheetMerger::new(
                SheetMergeSpec {
                    by_sheet,
                    recursive,
                    source_columns: !no_source_columns,
                    drop_empty_rows: !keep_empty_rows,
                    intersect_columns,
                    dedup_keys: dedup_on.as_deref().map(parse_name_list).unwrap_or_default(),
                    workers: workers.unwrap_or_else(default_workers),
                    ..SheetMergeSpec::default()
                },
                Arc::new(XlsxStore) as Arc<dyn SheetStore>,
            );

            let (tx, renderer) = progress::spawn_renderer(quiet);
            let summary = merger.run(&input, &out_file, &tx).await?;
            drop(tx);
            renderer.await?;
            tracing::debug!("summary: {}", serde_json::to_string(&summary)?);

            println!("Workbook merge finished:");
            println!("  files found:   {}", summary.files_found);
            println!("  files read:    {}", summary.files_read);
            println!("  read failures: {}", summary.read_failures);
            println!("  sheets written: {}", summary.sheets_written);
            println!("  rows written:   {}", summary.rows_written);
            println!("  output: {}", out_file.display());
        }

        Commands::Config { show } => {
            if show {
                config.display();
            } else {
                config.save().await?;
                Config::show_path()?;
            }
        }
    }

    Ok(())
}
