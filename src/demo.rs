//! Scripted run for showing off the dashboard without a real worker.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::runner::{RunId, WorkerEvent};
use crate::session::state::StreamKind;

/// Pause between transcript lines.
pub const LINE_INTERVAL: Duration = Duration::from_millis(300);

const TRANSCRIPT: &[&str] = &[
    "===============================================================",
    "  Unpossible Iteration 1 of 5 (claude)",
    "===============================================================",
    "Target branch: unpossible/phase-1-foundation",
    "Base branch: main",
    "PRD files: prds/01-foundation.json",
    "",
    "Reading patterns.txt...",
    "Reading progress.txt...",
    "",
    "Selected story: P1-001 - Initialize Next.js 14 project",
    "Priority: 1, Status: pending",
    "",
    "> Writing tests first (TDD)...",
    "> Creating test file: __tests__/setup.test.ts",
    "> Running tests... FAIL (expected)",
    "",
    "> Implementing feature...",
    "> npx create-next-app@latest . --typescript --tailwind --eslint",
    "> Installing shadcn/ui...",
    "",
    "> Running tests... PASS",
    "> Running typecheck... PASS",
    "> Running lint... PASS",
    "",
    "> Committing: feat: P1-001 - Initialize Next.js 14 project",
    "> Updating PRD: passes: true",
    "",
    "Iteration 1 complete. Continuing...",
];

/// Feed the demo transcript into `events` as if a worker printed it, then
/// report a clean exit.
pub fn spawn(
    run: RunId,
    interval: Duration,
    events: mpsc::UnboundedSender<WorkerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        for line in TRANSCRIPT {
            ticker.tick().await;
            let event = WorkerEvent::Output {
                run,
                stream: StreamKind::Stdout,
                text: format!("{line}\n"),
            };
            if events.send(event).is_err() {
                return;
            }
        }
        ticker.tick().await;
        let _ = events.send(WorkerEvent::Exit { run, code: Some(0) });
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transcript_ends_with_clean_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn(4, Duration::from_millis(1), tx);

        let mut lines = 0;
        while let Some(event) = rx.recv().await {
            assert_eq!(event.run(), 4);
            match event {
                WorkerEvent::Output { text, .. } => {
                    assert!(text.ends_with('\n'));
                    lines += 1;
                }
                WorkerEvent::Exit { code, .. } => {
                    assert_eq!(code, Some(0));
                    break;
                }
            }
        }
        assert_eq!(lines, TRANSCRIPT.len());
    }
}
