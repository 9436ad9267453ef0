//! The single owner of the session, the worker slot, and the viewer set.
//!
//! Control requests and worker output both arrive as messages on queues
//! drained by one task, so every mutation happens one event at a time. Cheap
//! [`Supervisor`] handles are what the HTTP layer holds.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::{ViewerId, ViewerStream, Viewers};
use crate::config::ObserverConfig;
use crate::demo;
use crate::error::ObserverError;
use crate::event::ObserverEvent;
use crate::session::parser::scan_chunk;
use crate::session::runner::{RunId, WorkerCommand, WorkerEvent, WorkerRunner};
use crate::session::state::{OutputRecord, Session, SessionSnapshot, SessionStatus};

/// Broadcast when a start arrives while a worker is still running.
pub const ALREADY_RUNNING: &str = "Unpossible is already running";

enum Command {
    Start {
        args: Vec<String>,
    },
    Demo {
        interval: Duration,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Subscribe {
        reply: oneshot::Sender<ViewerStream>,
    },
    Detach {
        viewer: ViewerId,
    },
}

/// Handle to the supervisor task.
#[derive(Debug, Clone)]
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Command>,
}

impl Supervisor {
    /// Start the supervisor task. It runs until every handle is dropped.
    pub fn spawn(config: ObserverConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let task = SupervisorTask {
            config,
            session: Session::default(),
            worker: None,
            viewers: Viewers::default(),
            next_run: 0,
            commands: commands_tx.downgrade(),
            worker_events: worker_tx,
        };
        tokio::spawn(task.run(commands_rx, worker_rx));
        Self {
            commands: commands_tx,
        }
    }

    /// Request a worker run. Whether it actually starts is reported to
    /// viewers, not to the caller.
    pub fn start(&self, args: Vec<String>) -> Result<(), ObserverError> {
        self.send(Command::Start { args })
    }

    /// Play the scripted demo transcript in the worker slot.
    pub fn start_demo(&self, interval: Duration) -> Result<(), ObserverError> {
        self.send(Command::Demo { interval })
    }

    /// Signal the worker to stop. Resolves once the supervisor has handled
    /// the request; the worker itself may still be shutting down.
    pub async fn stop(&self) -> Result<(), ObserverError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Stop { done })?;
        rx.await.map_err(|_| ObserverError::SupervisorGone)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ObserverError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| ObserverError::SupervisorGone)
    }

    /// Connect a viewer. The stream opens with a state snapshot and the
    /// buffered output, then carries live events.
    pub async fn subscribe(&self) -> Result<ViewerStream, ObserverError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { reply })?;
        rx.await.map_err(|_| ObserverError::SupervisorGone)
    }

    fn send(&self, command: Command) -> Result<(), ObserverError> {
        self.commands
            .send(command)
            .map_err(|_| ObserverError::SupervisorGone)
    }
}

/// Whatever currently occupies the worker slot.
enum Worker {
    Process(WorkerRunner),
    Scripted { run: RunId, task: JoinHandle<()> },
}

impl Worker {
    fn run(&self) -> RunId {
        match self {
            Worker::Process(runner) => runner.run(),
            Worker::Scripted { run, .. } => *run,
        }
    }
}

struct SupervisorTask {
    config: ObserverConfig,
    session: Session,
    worker: Option<Worker>,
    viewers: Viewers,
    next_run: RunId,
    /// Weak so the task does not keep its own command queue open.
    commands: mpsc::WeakUnboundedSender<Command>,
    worker_events: mpsc::UnboundedSender<WorkerEvent>,
}

impl SupervisorTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = worker_events.recv() => self.handle_worker_event(event),
            }
        }

        if let Some(worker) = self.worker.take() {
            debug!("supervisor shutting down with a live worker");
            terminate(&worker);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { args } => self.start(args),
            Command::Demo { interval } => self.start_demo(interval),
            Command::Stop { done } => {
                self.stop();
                let _ = done.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            Command::Subscribe { reply } => {
                let _ = reply.send(self.attach_viewer());
            }
            Command::Detach { viewer } => {
                self.viewers.detach(viewer);
            }
        }
    }

    /// Claim the worker slot for a new run, resetting the session. Returns
    /// `None` and tells viewers when the slot is taken.
    fn begin_run(&mut self, status: SessionStatus) -> Option<RunId> {
        if self.worker.is_some() {
            warn!("start requested while a worker is running");
            self.viewers.broadcast(&ObserverEvent::error(ALREADY_RUNNING));
            return None;
        }
        self.session = Session::begin();
        self.session.state.status = status;
        self.viewers.broadcast(&self.session.state_event());
        self.next_run += 1;
        Some(self.next_run)
    }

    fn start(&mut self, args: Vec<String>) {
        let Some(run) = self.begin_run(SessionStatus::Starting) else {
            return;
        };
        let command = WorkerCommand::new(&self.config, args);
        match WorkerRunner::spawn(&command, run, self.worker_events.clone()) {
            Ok(runner) => self.worker = Some(Worker::Process(runner)),
            Err(err) => {
                let message = format!("{err:#}");
                error!(run, error = %message, "failed to start worker");
                self.viewers.broadcast(&ObserverEvent::error(message));
            }
        }
    }

    fn start_demo(&mut self, interval: Duration) {
        let Some(run) = self.begin_run(SessionStatus::Running) else {
            return;
        };
        info!(run, "starting demo run");
        let task = demo::spawn(run, interval, self.worker_events.clone());
        self.worker = Some(Worker::Scripted { run, task });
    }

    fn stop(&mut self) {
        let Some(worker) = &self.worker else {
            debug!("stop requested with no worker running");
            return;
        };
        info!(run = worker.run(), "stopping worker");
        terminate(worker);
        // A cancelled script never reports an exit, so free the slot now.
        if matches!(worker, Worker::Scripted { .. }) {
            self.worker = None;
        }
        for event in self.session.set_status(SessionStatus::Stopped) {
            self.viewers.broadcast(&event);
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        if self.worker.as_ref().map(Worker::run) != Some(event.run()) {
            debug!(run = event.run(), "ignoring event from a finished run");
            return;
        }

        match event {
            WorkerEvent::Output { stream, text, .. } => {
                let record = OutputRecord::new(stream, text);
                self.session.record_output(record.clone());
                for signal in scan_chunk(&record.text) {
                    for event in self.session.apply(signal) {
                        self.viewers.broadcast(&event);
                    }
                }
                self.viewers.broadcast(&ObserverEvent::Output(record));
            }
            WorkerEvent::Exit { code, .. } => {
                for event in self.session.finish(code) {
                    self.viewers.broadcast(&event);
                }
                self.worker = None;
            }
        }
    }

    fn attach_viewer(&mut self) -> ViewerStream {
        let backlog: Vec<_> = std::iter::once(self.session.state_event())
            .chain(
                self.session
                    .output
                    .iter()
                    .cloned()
                    .map(ObserverEvent::Output),
            )
            .filter_map(|event| event.to_frame().ok())
            .collect();
        let (id, rx) = self.viewers.attach(backlog);
        let commands = self.commands.clone();
        ViewerStream::new(id, rx, move |viewer| {
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Detach { viewer });
            }
        })
    }
}

fn terminate(worker: &Worker) {
    match worker {
        Worker::Process(runner) => {
            if let Err(err) = runner.terminate() {
                warn!(run = runner.run(), error = %format!("{err:#}"), "failed to stop worker");
            }
        }
        Worker::Scripted { task, .. } => task.abort(),
    }
}
