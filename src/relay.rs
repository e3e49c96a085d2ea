//! Single-producer/single-consumer bridge from an event producer to one SSE client.
//!
//! [`channel`] creates a session: the producer keeps the [`RelaySender`], the
//! request handler drives [`StreamRelay::run`], which writes each event to the
//! client as an SSE frame and flushes it immediately. The handoff is a
//! rendezvous: `send` completes only once the consumer has taken the event, so
//! a slow client stalls the producer instead of growing a queue.
//!
//! The consumer stops when the producer closes, when the shared
//! [`CancellationToken`] fires, or when no event arrives within the idle
//! timeout. Both sides must be built from the same token.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::event::{Event, SseFrame};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable relay settings, built once and shared by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Longest single wait for the next event. Resets on every receive.
    pub idle_timeout: Duration,
    /// Value written in each frame's `retry:` field.
    pub retry_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            retry_ms: 0,
        }
    }
}

type Handoff = (Event, oneshot::Sender<()>);

/// Create a relay session bound to `cancel`.
pub fn channel(config: &RelayConfig, cancel: CancellationToken) -> (RelaySender, StreamRelay) {
    let (tx, rx) = mpsc::channel(1);
    let sender = RelaySender {
        tx: Some(tx),
        cancel: cancel.clone(),
        terminated: false,
    };
    let relay = StreamRelay {
        rx,
        cancel,
        config: *config,
    };
    (sender, relay)
}

/// Producer half. Not shareable between producers.
pub struct RelaySender {
    tx: Option<mpsc::Sender<Handoff>>,
    cancel: CancellationToken,
    terminated: bool,
}

impl RelaySender {
    /// Hand `event` to the consumer, waiting until it has been taken.
    ///
    /// Fails with [`BridgeError::RelayClosed`] once the session is over: after
    /// `close`, after a terminal event, after cancellation, or when the
    /// consumer has stopped.
    pub async fn send(&mut self, event: Event) -> Result<()> {
        if self.terminated || self.cancel.is_cancelled() {
            return Err(BridgeError::RelayClosed);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(BridgeError::RelayClosed);
        };

        let terminal = event.is_terminal();
        let delivered = tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            delivered = handoff(tx, event) => delivered,
        };

        if !delivered {
            self.close();
            return Err(BridgeError::RelayClosed);
        }
        if terminal {
            self.terminated = true;
        }
        Ok(())
    }

    /// End the stream. Idempotent; dropping the sender has the same effect.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            debug!("Relay source closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

async fn handoff(tx: &mpsc::Sender<Handoff>, event: Event) -> bool {
    let (ack_tx, ack_rx) = oneshot::channel();
    if tx.send((event, ack_tx)).await.is_err() {
        return false;
    }
    ack_rx.await.is_ok()
}

/// How a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The producer closed the source.
    Completed,
    /// The shared token was cancelled.
    Cancelled,
    /// No event arrived within the idle timeout.
    TimedOut,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub events_written: usize,
    /// SSE name of the last event written; `"error"` marks a failed stream.
    pub last_event: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub outcome: RelayOutcome,
    pub stats: RelayStats,
}

type StatsHook = Box<dyn FnOnce(&RelayStats) + Send>;

/// Optional callbacks for the cancellation and timeout exits.
#[derive(Default)]
pub struct RelayHooks {
    on_cancel: Option<StatsHook>,
    on_timeout: Option<StatsHook>,
}

impl RelayHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_cancel(mut self, f: impl FnOnce(&RelayStats) + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(f));
        self
    }

    pub fn on_timeout(mut self, f: impl FnOnce(&RelayStats) + Send + 'static) -> Self {
        self.on_timeout = Some(Box::new(f));
        self
    }
}

/// Consumer half, owned by the request handler.
pub struct StreamRelay {
    rx: mpsc::Receiver<Handoff>,
    cancel: CancellationToken,
    config: RelayConfig,
}

impl StreamRelay {
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Write events to `writer` until the session ends.
    ///
    /// Cancellation is observed while waiting for an event and while a frame is
    /// being written. A write failure on a live session is returned as
    /// [`BridgeError::Transport`]. On every exit
    /// other than `Completed` the shared token is cancelled, so a producer
    /// still blocked in `send` is released.
    pub async fn run<W>(mut self, writer: &mut W, mut hooks: RelayHooks) -> Result<RelayReport>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut stats = RelayStats::default();

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                received = tokio::time::timeout(self.config.idle_timeout, self.rx.recv()) => Some(received),
            };

            let received = match next {
                None => return Ok(cancelled(stats, hooks.on_cancel.take())),
                Some(Err(_elapsed)) => {
                    warn!(
                        idle_timeout = ?self.config.idle_timeout,
                        events = stats.events_written,
                        "Relay idle timeout"
                    );
                    self.cancel.cancel();
                    if let Some(hook) = hooks.on_timeout.take() {
                        hook(&stats);
                    }
                    return Ok(RelayReport {
                        outcome: RelayOutcome::TimedOut,
                        stats,
                    });
                }
                Some(Ok(received)) => received,
            };

            let Some((event, ack)) = received else {
                debug!(events = stats.events_written, "Relay source drained");
                return Ok(RelayReport {
                    outcome: RelayOutcome::Completed,
                    stats,
                });
            };
            let _ = ack.send(());

            let id = (stats.events_written + 1).to_string();
            let frame = SseFrame::from_event(&event, Some(id), Some(self.config.retry_ms))?;

            // Cancellation also interrupts a write the client is not draining.
            let written = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = write_frame(writer, &frame) => Some(result),
            };
            match written {
                None => return Ok(cancelled(stats, hooks.on_cancel.take())),
                Some(Err(_)) if self.cancel.is_cancelled() => {
                    return Ok(cancelled(stats, hooks.on_cancel.take()));
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Downstream write failed");
                    self.cancel.cancel();
                    return Err(BridgeError::transport(format!("Downstream write failed: {}", e)));
                }
                Some(Ok(())) => {}
            }
            stats.events_written += 1;
            stats.last_event = Some(event.event_name());
        }
    }
}

fn cancelled(stats: RelayStats, hook: Option<StatsHook>) -> RelayReport {
    info!(events = stats.events_written, "Relay cancelled");
    if let Some(hook) = hook {
        hook(&stats);
    }
    RelayReport {
        outcome: RelayOutcome::Cancelled,
        stats,
    }
}

async fn write_frame<W>(writer: &mut W, frame: &SseFrame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(frame.encode().as_bytes()).await?;
    writer.flush().await
}
