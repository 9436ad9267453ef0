//! Fan-out of observer events to connected dashboard viewers.
//!
//! Each viewer owns an unbounded queue. Sinks are only touched from the
//! supervisor task, so a viewer's catch-up frames are always queued before any
//! live event that follows its registration.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::event::{Frame, ObserverEvent};

pub type ViewerId = u64;

/// The set of open viewer connections.
#[derive(Debug, Default)]
pub struct Viewers {
    next_id: ViewerId,
    sinks: HashMap<ViewerId, mpsc::UnboundedSender<Frame>>,
}

impl Viewers {
    /// Register a viewer, queueing `backlog` ahead of any later broadcast.
    pub fn attach(
        &mut self,
        backlog: impl IntoIterator<Item = Frame>,
    ) -> (ViewerId, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        for frame in backlog {
            // The receiver is still in hand, so this cannot fail.
            let _ = tx.send(frame);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.sinks.insert(id, tx);
        debug!(viewer = id, viewers = self.sinks.len(), "viewer attached");
        (id, rx)
    }

    pub fn detach(&mut self, id: ViewerId) -> bool {
        let removed = self.sinks.remove(&id).is_some();
        if removed {
            debug!(viewer = id, viewers = self.sinks.len(), "viewer detached");
        }
        removed
    }

    /// Push `event` to every viewer. A viewer whose queue is closed is dropped
    /// without affecting delivery to the rest.
    pub fn broadcast(&mut self, event: &ObserverEvent) {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(event = event.name(), error = %err, "failed to serialize event");
                return;
            }
        };
        self.sinks.retain(|id, sink| {
            let delivered = sink.send(frame.clone()).is_ok();
            if !delivered {
                debug!(viewer = *id, "dropping closed viewer");
            }
            delivered
        });
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

/// Frames for one viewer connection. Dropping it runs the close hook, which
/// removes the viewer from the set.
pub struct ViewerStream {
    id: ViewerId,
    frames: UnboundedReceiverStream<Frame>,
    on_close: Option<Box<dyn FnOnce(ViewerId) + Send>>,
}

impl ViewerStream {
    pub fn new(
        id: ViewerId,
        rx: mpsc::UnboundedReceiver<Frame>,
        on_close: impl FnOnce(ViewerId) + Send + 'static,
    ) -> Self {
        Self {
            id,
            frames: UnboundedReceiverStream::new(rx),
            on_close: Some(Box::new(on_close)),
        }
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }
}

impl Stream for ViewerStream {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

impl Drop for ViewerStream {
    fn drop(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close(self.id);
        }
    }
}
