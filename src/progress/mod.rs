use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Progress events emitted by merge and transcription workers.
///
/// Workers never touch the terminal; they push immutable events into the
/// channel and a single consumer loop renders them. This mirrors the
/// producer/consumer update pattern of the interactive front-end.
#[derive(Debug)]
pub enum ProgressEvent {
    /// Declare (or extend) the total number of work units
    Begin { total: u64 },
    /// Mark units of work as done
    Advance { units: u64 },
    /// Informational line printed above the bar
    Log { message: String },
    /// Warning line printed above the bar
    Warn { message: String },
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Spawn the consumer loop rendering events on an indicatif bar. The loop
/// ends once every sender is dropped; `quiet` swaps in a hidden bar so the
/// event flow stays identical either way.
pub fn spawn_renderer(quiet: bool) -> (ProgressSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap(),
        );

        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Begin { total } => bar.set_length(total),
                ProgressEvent::Advance { units } => bar.inc(units),
                ProgressEvent::Log { message } => bar.println(message),
                ProgressEvent::Warn { message } => {
                    bar.println(format!("warning: {message}"))
                }
            }
        }

        bar.finish_and_clear();
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_renderer_drains_and_exits_when_senders_drop() {
        let (tx, handle) = spawn_renderer(true);
        tx.send(ProgressEvent::Begin { total: 2 }).unwrap();
        tx.send(ProgressEvent::Advance { units: 1 }).unwrap();
        tx.send(ProgressEvent::Log {
            message: "halfway".to_string(),
        })
        .unwrap();
        tx.send(ProgressEvent::Advance { units: 1 }).unwrap();
        drop(tx);

        handle.await.unwrap();
    }
}
