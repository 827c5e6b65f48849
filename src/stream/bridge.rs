//! Push-to-pull bridge.
//!
//! A reader task owns the transport and pushes decoded envelopes into a
//! bounded channel; the consumer pulls them back out as a `Stream`. The
//! channel is the FIFO: it keeps arrival order, hands an envelope directly
//! to a waiting consumer, and makes the reader wait when the consumer falls
//! behind.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sse::{SseDecoder, SseFrame};
use super::transport::ChannelTransport;
use super::EventEnvelope;
use crate::events::{EventName, parse_event_name};

/// Terminal event name; the channel closes right after delivering it.
pub const DONE_EVENT: &str = "done";

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Names the session subscribes to.
pub fn default_event_names() -> Vec<String> {
    ["connected", "progress", "result", "aggregated", "error", DONE_EVENT, "status"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Subscription filter applied before an event is enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    names: HashSet<String>,
    scoped: bool,
}

impl EventFilter {
    /// Accept the given bare names plus the `<scope>:<agent>:<activity>` family.
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            scoped: true,
        }
    }

    /// Accept only the given bare names.
    pub fn names_only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            scoped: false,
            ..Self::new(names)
        }
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.names.contains(name)
            || (self.scoped && matches!(parse_event_name(name), EventName::Scoped { .. }))
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(default_event_names())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    pub filter: EventFilter,
    pub capacity: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            filter: EventFilter::default(),
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Observable connection state of a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed { error: Option<String> },
}

impl ChannelState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelState::Closed { .. })
    }
}

/// Pull side of one push channel.
pub struct EventBridge {
    rx: mpsc::Receiver<EventEnvelope>,
    state: watch::Receiver<ChannelState>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl EventBridge {
    /// Open `url` on a background task and return the pull side.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: Arc<dyn ChannelTransport>,
        url: impl Into<String>,
        options: BridgeOptions,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.capacity.max(1));
        let (state_tx, state) = watch::channel(ChannelState::Connecting);
        let forwarder = Forwarder {
            tx,
            filter: options.filter,
            cancel: cancel.clone(),
            sequence: 0,
        };
        let reader = tokio::spawn(run_reader(transport, url.into(), forwarder, state_tx));
        Self {
            rx,
            state,
            cancel,
            reader,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Close the channel. Pending and future pulls end immediately.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for EventBridge {
    type Item = EventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.reader.abort();
    }
}

enum Flow {
    Continue,
    Stop,
}

struct Forwarder {
    tx: mpsc::Sender<EventEnvelope>,
    filter: EventFilter,
    cancel: CancellationToken,
    sequence: u64,
}

impl Forwarder {
    async fn forward(&mut self, frame: SseFrame) -> Flow {
        let terminal = frame.event == DONE_EVENT;
        if !self.filter.accepts(&frame.event) {
            debug!(event = %frame.event, "Ignoring unsubscribed event");
            return if terminal { Flow::Stop } else { Flow::Continue };
        }

        let envelope = EventEnvelope::from_frame(self.sequence, frame);
        self.sequence += 1;
        debug!(event = %envelope.name, sequence = envelope.sequence, "Event received");

        tokio::select! {
            _ = self.cancel.cancelled() => return Flow::Stop,
            sent = self.tx.send(envelope) => {
                if sent.is_err() {
                    return Flow::Stop;
                }
            }
        }

        if terminal { Flow::Stop } else { Flow::Continue }
    }

    async fn forward_all(&mut self, frames: Vec<SseFrame>) -> Flow {
        for frame in frames {
            if let Flow::Stop = self.forward(frame).await {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }
}

async fn run_reader(
    transport: Arc<dyn ChannelTransport>,
    url: String,
    mut forwarder: Forwarder,
    state: watch::Sender<ChannelState>,
) {
    let cancel = forwarder.cancel.clone();
    let opened = tokio::select! {
        _ = cancel.cancelled() => {
            state.send_replace(ChannelState::Closed { error: None });
            return;
        }
        opened = transport.open(&url) => opened,
    };

    let mut body = match opened {
        Ok(body) => body,
        Err(e) => {
            warn!(%url, error = %e, "Event stream failed to open");
            state.send_replace(ChannelState::Closed {
                error: Some(e.to_string()),
            });
            return;
        }
    };
    state.send_replace(ChannelState::Open);
    info!(%url, "Event stream open");

    let mut decoder = SseDecoder::new();
    let error = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break None,
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                let frames = decoder.feed(&chunk);
                if let Flow::Stop = forwarder.forward_all(frames).await {
                    break None;
                }
            }
            Some(Err(e)) => {
                warn!(%url, error = %e, "Event stream failed");
                break Some(e.to_string());
            }
            None => {
                if let Some(frame) = decoder.finish() {
                    forwarder.forward(frame).await;
                }
                break None;
            }
        }
    };

    drop(body);
    info!(%url, delivered = forwarder.sequence, "Event stream closed");
    state.send_replace(ChannelState::Closed { error });
}
