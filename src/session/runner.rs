use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::StreamKind;
use crate::config::{ObserverConfig, WORKER_FLAG};

/// Identifies one run so events from a replaced worker can be told apart.
pub type RunId = u64;

const READ_BUF_SIZE: usize = 8 * 1024;

/// Everything the supervisor learns from a running worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A chunk read from one of the worker's pipes.
    Output {
        run: RunId,
        stream: StreamKind,
        text: String,
    },
    /// Both pipes are closed and the process has been reaped.
    Exit { run: RunId, code: Option<i32> },
}

impl WorkerEvent {
    pub fn run(&self) -> RunId {
        match self {
            WorkerEvent::Output { run, .. } | WorkerEvent::Exit { run, .. } => *run,
        }
    }
}

/// How to launch the worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub shell: PathBuf,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub package_dir: PathBuf,
}

impl WorkerCommand {
    pub fn new(config: &ObserverConfig, args: Vec<String>) -> Self {
        Self {
            shell: config.shell.clone(),
            script: config.worker_script(),
            args,
            working_dir: config.project_dir.clone(),
            package_dir: config.package_dir.clone(),
        }
    }

    /// Arguments handed to the shell: the script, the worker flag, then the
    /// caller's arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            self.script.display().to_string(),
            WORKER_FLAG.to_string(),
        ];
        args.extend(self.args.iter().cloned());
        args
    }
}

/// A spawned worker process.
///
/// Output and exit are reported on the event channel handed to [`spawn`];
/// the exit event is sent only after both pipes have been drained, so it is
/// always the last event of a run.
///
/// [`spawn`]: WorkerRunner::spawn
pub struct WorkerRunner {
    run: RunId,
    pid: Option<u32>,
    task: JoinHandle<()>,
}

impl WorkerRunner {
    pub fn spawn(
        command: &WorkerCommand,
        run: RunId,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self> {
        let mut cmd = tokio::process::Command::new(&command.shell);
        cmd.args(command.build_args())
            .current_dir(&command.working_dir)
            .env("FORCE_COLOR", "1")
            .env("UNPOSSIBLE_HOME", &command.package_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn {} {}",
                command.shell.display(),
                command.script.display()
            )
        })?;
        let pid = child.id();
        let stdout = child.stdout.take().context("worker stdout was not piped")?;
        let stderr = child.stderr.take().context("worker stderr was not piped")?;
        info!(run, pid = ?pid, args = ?command.args, "worker started");

        let task = tokio::spawn(async move {
            tokio::join!(
                pump(stdout, StreamKind::Stdout, run, events.clone()),
                pump(stderr, StreamKind::Stderr, run, events.clone()),
            );
            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(run, error = %err, "failed to wait for worker");
                    None
                }
            };
            info!(run, ?code, "worker exited");
            let _ = events.send(WorkerEvent::Exit { run, code });
        });

        Ok(Self { run, pid, task })
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    /// Ask the worker to terminate. The exit event still arrives through the
    /// normal path once the process is gone.
    pub fn terminate(&self) -> Result<()> {
        if self.task.is_finished() {
            return Ok(());
        }
        let pid = self.pid.context("worker has already been reaped")?;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(pid.cast_signed(), libc::SIGTERM) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("failed to send SIGTERM to worker {pid}"));
        }
        debug!(run = self.run, pid, "sent SIGTERM to worker");
        Ok(())
    }
}

/// Forward everything read from `reader` as output events, chunk by chunk.
async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    stream: StreamKind,
    run: RunId,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut decoder = Utf8Chunks::default();
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(run, ?stream, error = %err, "failed to read worker output");
                break;
            }
        };
        let text = decoder.push(&buf[..n]);
        if text.is_empty() {
            continue;
        }
        if events.send(WorkerEvent::Output { run, stream, text }).is_err() {
            return;
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = events.send(WorkerEvent::Output {
            run,
            stream,
            text: rest,
        });
    }
}

/// Decodes a byte stream as UTF-8 without splitting characters that straddle
/// two reads.
#[derive(Debug, Default)]
struct Utf8Chunks {
    pending: Vec<u8>,
}

impl Utf8Chunks {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut complete = 0;
        loop {
            match std::str::from_utf8(&self.pending[complete..]) {
                Ok(rest) => {
                    complete += rest.len();
                    break;
                }
                Err(err) => match err.error_len() {
                    // Invalid bytes: step over them, they decode as U+FFFD below.
                    Some(bad) => complete += err.valid_up_to() + bad,
                    // Incomplete sequence at the end: hold it for the next read.
                    None => {
                        complete += err.valid_up_to();
                        break;
                    }
                },
            }
        }
        let text = String::from_utf8_lossy(&self.pending[..complete]).into_owned();
        self.pending.drain(..complete);
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn build_args_puts_worker_flag_before_caller_args() {
        let command = WorkerCommand {
            shell: PathBuf::from("bash"),
            script: PathBuf::from("/opt/unpossible/unpossible.sh"),
            args: vec!["5".to_string(), "auth".to_string()],
            working_dir: PathBuf::from("/work"),
            package_dir: PathBuf::from("/opt/unpossible"),
        };
        assert_eq!(
            command.build_args(),
            vec!["/opt/unpossible/unpossible.sh", "--worker", "5", "auth"]
        );
    }

    #[test]
    fn split_multibyte_character_is_held_back() {
        let mut decoder = Utf8Chunks::default();
        let bytes = "héllo".as_bytes();
        assert_eq!(decoder.push(&bytes[..2]), "h");
        assert_eq!(decoder.push(&bytes[2..]), "éllo");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut decoder = Utf8Chunks::default();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn partial_character_after_invalid_byte_is_held_back() {
        let mut decoder = Utf8Chunks::default();
        assert_eq!(decoder.push(b"a\xff\xc3"), "a\u{fffd}");
        assert_eq!(decoder.push(b"\xa9!"), "\u{e9}!");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn dangling_partial_character_flushed_on_finish() {
        let mut decoder = Utf8Chunks::default();
        assert_eq!(decoder.push(&[b'x', 0xc3]), "x");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[tokio::test]
    async fn exit_follows_all_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, "echo \"args: $*\"\necho oops >&2\nexit 3\n").unwrap();
        let command = WorkerCommand {
            shell: PathBuf::from("bash"),
            script,
            args: vec!["7".to_string()],
            working_dir: dir.path().to_path_buf(),
            package_dir: dir.path().to_path_buf(),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _runner = WorkerRunner::spawn(&command, 9, tx).unwrap();

        let mut stdout = String::new();
        let mut stderr = String::new();
        let code = loop {
            match rx.recv().await.unwrap() {
                WorkerEvent::Output { run, stream, text } => {
                    assert_eq!(run, 9);
                    match stream {
                        StreamKind::Stdout => stdout.push_str(&text),
                        StreamKind::Stderr => stderr.push_str(&text),
                    }
                }
                WorkerEvent::Exit { run, code } => {
                    assert_eq!(run, 9);
                    break code;
                }
            }
        };
        assert_eq!(stdout, "args: --worker 7\n");
        assert_eq!(stderr, "oops\n");
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn worker_sees_forced_color_and_home() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("worker.sh");
        std::fs::write(&script, "echo \"$FORCE_COLOR $UNPOSSIBLE_HOME $(pwd -P)\"\n").unwrap();
        let project = dir.path().canonicalize().unwrap();
        let command = WorkerCommand {
            shell: PathBuf::from("bash"),
            script,
            args: Vec::new(),
            working_dir: project.clone(),
            package_dir: PathBuf::from("/opt/unpossible"),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _runner = WorkerRunner::spawn(&command, 1, tx).unwrap();

        let mut stdout = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Output { text, .. } => stdout.push_str(&text),
                WorkerEvent::Exit { .. } => break,
            }
        }
        assert_eq!(
            stdout.trim_end(),
            format!("1 /opt/unpossible {}", project.display())
        );
    }

    #[tokio::test]
    async fn missing_shell_fails_to_spawn() {
        let command = WorkerCommand {
            shell: PathBuf::from("/nonexistent/shell"),
            script: PathBuf::from("worker.sh"),
            args: Vec::new(),
            working_dir: std::env::temp_dir(),
            package_dir: std::env::temp_dir(),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(WorkerRunner::spawn(&command, 1, tx).is_err());
    }
}
