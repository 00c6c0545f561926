//! End-to-end reconciliation flows over real temp directories: scan two
//! folders, merge by episode index, regroup the merged output in batches.

use std::path::Path;

use episode_toolkit::cli::{OutputEncoding, SortMode, TitleSource};
use episode_toolkit::index::IndexRange;
use episode_toolkit::merge::{BatchMergeSpec, BatchMerger, PairMergeSpec, PairMerger};
use episode_toolkit::progress;
use episode_toolkit::scan::scan_txt_folder;
use episode_toolkit::textio::read_text_with_fallback;

fn write_files(dir: &Path, names: &[(&str, &str)]) {
    for (name, content) in names {
        fs_err::write(dir.join(name), content).unwrap();
    }
}

#[tokio::test]
async fn pairwise_merge_intersection_and_unmatched_counts() {
    let desc = tempfile::tempdir().unwrap();
    let trans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    write_files(
        desc.path(),
        &[
            ("【P1】first episode description.txt", "desc one"),
            ("【P2】second episode description.txt", "desc two"),
            ("【P3】third episode description.txt", "desc three"),
        ],
    );
    write_files(
        trans.path(),
        &[
            ("[P2] transcript.txt", "trans two"),
            ("[P3] transcript.txt", "trans three"),
            ("[P4] transcript.txt", "trans four"),
        ],
    );

    let merger = PairMerger::new(PairMergeSpec::default());
    let plan = merger.plan(desc.path(), trans.path()).unwrap();

    let (tx, renderer) = progress::spawn_renderer(true);
    let summary = merger.run(&plan, out.path(), &tx).unwrap();
    drop(tx);
    renderer.await.unwrap();

    assert_eq!(summary.merged, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.unmatched_left, vec![1]);
    assert_eq!(summary.unmatched_right, vec![4]);

    // Output exists only for the intersection, named after the longer stem.
    let written = scan_txt_folder(out.path(), false).unwrap();
    assert_eq!(written.indices(), vec![2, 3]);
}

#[tokio::test]
async fn merged_output_uses_bom_and_rereads_cleanly() {
    let desc = tempfile::tempdir().unwrap();
    let trans = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    write_files(desc.path(), &[("【P1】简介文件.txt", "中文简介")]);
    // GB18030-encoded transcript exercises the decode fallback.
    let gb: Vec<u8> = vec![0xD6, 0xD0, 0xCE, 0xC4]; // "中文"
    fs_err::write(trans.path().join("【P1】转写.txt"), gb).unwrap();

    let merger = PairMerger::new(PairMergeSpec {
        section_headers: false,
        encoding: OutputEncoding::Utf8Bom,
        ..PairMergeSpec::default()
    });
    let plan = merger.plan(desc.path(), trans.path()).unwrap();

    let (tx, renderer) = progress::spawn_renderer(true);
    let summary = merger.run(&plan, out.path(), &tx).unwrap();
    drop(tx);
    renderer.await.unwrap();
    assert_eq!(summary.merged, 1);

    let out_path = out.path().join("【P1】简介文件.txt");
    let raw = fs_err::read(&out_path).unwrap();
    assert_eq!(&raw[..3], b"\xEF\xBB\xBF");

    let decoded = read_text_with_fallback(&out_path).unwrap();
    assert!(!decoded.lossy);
    assert!(decoded.text.contains("中文简介"));
    assert!(decoded.text.contains("中文"));
}

#[tokio::test]
async fn range_filter_restricts_both_sides_before_matching() {
    let left = tempfile::tempdir().unwrap();
    let right = tempfile::tempdir().unwrap();

    for i in 1..=30u32 {
        fs_err::write(left.path().join(format!("【P{i}】l.txt")), "l").unwrap();
        fs_err::write(right.path().join(format!("【P{i}】r.txt")), "r").unwrap();
    }

    let merger = PairMerger::new(PairMergeSpec {
        range: IndexRange::new(Some(10), Some(20)).unwrap(),
        ..PairMergeSpec::default()
    });
    let plan = merger.plan(left.path(), right.path()).unwrap();

    let matched: Vec<u32> = plan.matched.iter().map(|p| p.index).collect();
    assert_eq!(matched, (10..=20).collect::<Vec<u32>>());
    assert!(plan.unmatched_left.is_empty());
    assert!(plan.unmatched_right.is_empty());
}

#[test]
fn inverted_range_is_rejected_before_any_scan() {
    assert!(IndexRange::new(Some(20), Some(10)).is_err());
}

#[tokio::test]
async fn batch_merge_groups_and_is_idempotent_without_overwrite() {
    let input = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    for i in 1..=25u32 {
        fs_err::write(
            input.path().join(format!("chapter{i}.txt")),
            format!("text of chapter {i}"),
        )
        .unwrap();
    }

    let spec = BatchMergeSpec {
        batch_size: 10,
        sort: SortMode::Natural,
        title: TitleSource::Filename,
        blank_lines: 1,
        workers: 4,
        ..BatchMergeSpec::default()
    };

    let merger = BatchMerger::new(spec.clone());
    let (tx, renderer) = progress::spawn_renderer(true);
    let summary = merger.run(input.path(), out.path(), &tx).await.unwrap();
    drop(tx);
    renderer.await.unwrap();

    assert_eq!(summary.files_found, 25);
    assert_eq!(summary.groups_written, 3);
    assert_eq!(summary.files_merged, 25);
    assert!(out.path().join("group_001_1-10.txt").exists());
    assert!(out.path().join("group_002_11-20.txt").exists());
    assert!(out.path().join("group_003_21-25.txt").exists());

    // Natural order: chapter2 lands in group 1, chapter10 after it.
    let first = read_text_with_fallback(&out.path().join("group_001_1-10.txt"))
        .unwrap()
        .text;
    let p2 = first.find("text of chapter 2").unwrap();
    let p10 = first.find("text of chapter 10").unwrap();
    assert!(p2 < p10);

    // Second run on the unchanged input suffixes instead of clobbering.
    let merger = BatchMerger::new(spec);
    let (tx, renderer) = progress::spawn_renderer(true);
    merger.run(input.path(), out.path(), &tx).await.unwrap();
    drop(tx);
    renderer.await.unwrap();

    assert!(out.path().join("group_001_1-10_1.txt").exists());
    assert!(out.path().join("group_003_21-25_1.txt").exists());
}
