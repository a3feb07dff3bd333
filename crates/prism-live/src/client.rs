//! Reader and writer loops for one WebSocket client.
//!
//! The writer is the only task that touches the sink, so per-client delivery
//! order matches the order messages entered the outbound queue. Either loop
//! may decide the connection is over; it records a [`DisconnectReason`] on
//! the shared [`ClientControl`] and the other loop follows.
//!
//! Every write races the close signal and a deadline. A peer that stops
//! reading fills the socket buffer and would otherwise park the writer
//! inside `send` for good, keeping the socket open after the hub has
//! already released its slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::DisconnectReason;
use crate::hub::{ClientControl, ClientHandle, ClientId};
use crate::rate_limit::RateLimiter;

const PING_PAYLOAD: &[u8] = b"prism";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) struct Session {
    pub(crate) handle: ClientHandle,
    pub(crate) limiter: Box<dyn RateLimiter>,
    pub(crate) unregister: mpsc::UnboundedSender<(ClientId, DisconnectReason)>,
    pub(crate) ping_interval: Duration,
    pub(crate) max_missed_pings: u32,
    pub(crate) idle_timeout: Duration,
    /// Longest a single data frame may take to reach the socket.
    pub(crate) write_timeout: Duration,
}

/// Drive one upgraded connection until either side ends it, then report the
/// departure to the hub.
pub(crate) async fn run(socket: WebSocket, session: Session) {
    let Session {
        handle,
        mut limiter,
        unregister,
        ping_interval,
        max_missed_pings,
        idle_timeout,
        write_timeout,
    } = session;
    let (id, outbound, control) = handle.into_parts();
    let awaiting_pong = AtomicBool::new(false);
    let (sink, stream) = socket.split();

    tokio::join!(
        write_loop(
            id,
            sink,
            outbound,
            &control,
            &awaiting_pong,
            ping_interval,
            max_missed_pings,
            write_timeout
        ),
        read_loop(
            id,
            stream,
            &control,
            &awaiting_pong,
            limiter.as_mut(),
            idle_timeout
        ),
    );

    let reason = control.reason().unwrap_or(DisconnectReason::Shutdown);
    // The hub may already be gone during shutdown.
    let _ = unregister.send((id, reason));
}

enum Write {
    Sent,
    Failed,
    TimedOut,
    Closed,
}

/// Send one frame unless the connection closes or `limit` passes first.
async fn send_frame(
    id: ClientId,
    sink: &mut SplitSink<WebSocket, Message>,
    control: &ClientControl,
    message: Message,
    limit: Duration,
) -> Write {
    tokio::select! {
        biased;
        _ = control.closed() => Write::Closed,
        sent = tokio::time::timeout(limit, sink.send(message)) => match sent {
            Ok(Ok(())) => Write::Sent,
            Ok(Err(err)) => {
                tracing::debug!(client_id = %id, error = %err, "write failed");
                Write::Failed
            }
            Err(_) => Write::TimedOut,
        },
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_loop(
    id: ClientId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Utf8Bytes>,
    control: &ClientControl,
    awaiting_pong: &AtomicBool,
    ping_interval: Duration,
    max_missed_pings: u32,
    write_timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failed_probes = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = control.closed() => break,
            message = outbound.recv() => {
                let Some(text) = message else {
                    control.close(DisconnectReason::Shutdown);
                    break;
                };
                match send_frame(id, &mut sink, control, Message::Text(text), write_timeout).await {
                    Write::Sent => {}
                    Write::Closed => break,
                    Write::Failed => {
                        control.close(DisconnectReason::Transport);
                        break;
                    }
                    Write::TimedOut => {
                        tracing::warn!(client_id = %id, "write stalled, disconnecting");
                        control.close(DisconnectReason::SlowConsumer);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let unanswered = awaiting_pong.swap(true, Ordering::AcqRel);
                let ping = Message::Ping(Bytes::from_static(PING_PAYLOAD));
                let sent = match send_frame(id, &mut sink, control, ping, ping_interval).await {
                    Write::Sent => true,
                    Write::Closed => break,
                    Write::Failed | Write::TimedOut => false,
                };

                if unanswered || !sent {
                    failed_probes += 1;
                    tracing::debug!(client_id = %id, failed_probes, "keep-alive probe failed");
                } else {
                    failed_probes = 0;
                }
                if failed_probes >= max_missed_pings {
                    control.close(DisconnectReason::KeepAliveFailed);
                    break;
                }
            }
        }
    }

    let reason = control.reason().unwrap_or(DisconnectReason::Shutdown);
    if reason.sends_close_frame() {
        let frame = CloseFrame {
            code: reason.close_code(),
            reason: Utf8Bytes::from_static(reason.reason()),
        };
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await;
    }
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
}

async fn read_loop(
    id: ClientId,
    mut stream: SplitStream<WebSocket>,
    control: &ClientControl,
    awaiting_pong: &AtomicBool,
    limiter: &mut dyn RateLimiter,
    idle_timeout: Duration,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = control.closed() => return,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                tracing::debug!(client_id = %id, "idle timeout");
                control.close(DisconnectReason::IdleTimeout);
                return;
            }
            Ok(None) => {
                control.close(DisconnectReason::ClientClosed);
                return;
            }
            Ok(Some(Err(err))) => {
                tracing::debug!(client_id = %id, error = %err, "read failed");
                control.close(DisconnectReason::Transport);
                return;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Pong(_) => awaiting_pong.store(false, Ordering::Release),
            // axum answers pings itself.
            Message::Ping(_) => {}
            Message::Close(_) => {
                control.close(DisconnectReason::ClientClosed);
                return;
            }
            Message::Text(_) | Message::Binary(_) => {
                if !limiter.allow() {
                    tracing::warn!(client_id = %id, "client exceeded message rate limit");
                    control.close(DisconnectReason::RateLimited);
                    return;
                }
                tracing::trace!(client_id = %id, "ignoring inbound message");
            }
        }
    }
}
