//! Live-update hub errors and disconnect reasons.

use std::net::IpAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Why a connection was refused or a broadcast could not be queued.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("connection request has no Origin header")]
    MissingOrigin,

    #[error("origin not allowed: {0}")]
    OriginNotAllowed(String),

    #[error("too many live-update connections (limit {limit})")]
    TooManyConnections { limit: usize },

    #[error("too many live-update connections from {ip} (limit {limit})")]
    TooManyConnectionsFromIp { ip: IpAddr, limit: usize },

    #[error("not a WebSocket upgrade request: {0}")]
    NotUpgrade(String),

    /// The broadcast channel is full; only returned by `try_broadcast`.
    #[error("broadcast queue is full")]
    BroadcastBacklog,

    #[error("live-update hub is shutting down")]
    ShuttingDown,

    #[error("failed to serialize update message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl HubError {
    /// HTTP status sent when this error rejects a connection request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubError::MissingOrigin | HubError::OriginNotAllowed(_) => StatusCode::FORBIDDEN,
            HubError::TooManyConnections { .. } => StatusCode::SERVICE_UNAVAILABLE,
            HubError::TooManyConnectionsFromIp { .. } => StatusCode::TOO_MANY_REQUESTS,
            HubError::NotUpgrade(_) => StatusCode::BAD_REQUEST,
            HubError::BroadcastBacklog | HubError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            HubError::Serialize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

pub type Result<T, E = HubError> = std::result::Result<T, E>;

/// Why a client connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The client closed the socket or sent a close frame.
    ClientClosed,
    /// The client exceeded its message-rate limit.
    RateLimited,
    /// Nothing was received within the idle timeout.
    IdleTimeout,
    /// Consecutive keep-alive probes went unanswered or failed to send.
    KeepAliveFailed,
    /// The client's outbound queue was full during a broadcast.
    SlowConsumer,
    /// Reading from or writing to the socket failed.
    Transport,
    /// The hub is shutting down.
    Shutdown,
}

impl DisconnectReason {
    /// WebSocket close code sent to the client.
    pub fn close_code(self) -> u16 {
        match self {
            DisconnectReason::ClientClosed => 1000,
            DisconnectReason::Shutdown => 1001,
            DisconnectReason::Transport => 1006,
            DisconnectReason::RateLimited => 1008,
            DisconnectReason::KeepAliveFailed => 4000,
            DisconnectReason::IdleTimeout => 4001,
            DisconnectReason::SlowConsumer => 4002,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client closed",
            DisconnectReason::RateLimited => "rate limit exceeded",
            DisconnectReason::IdleTimeout => "idle timeout",
            DisconnectReason::KeepAliveFailed => "keep-alive failed",
            DisconnectReason::SlowConsumer => "client too slow",
            DisconnectReason::Transport => "transport error",
            DisconnectReason::Shutdown => "server shutting down",
        }
    }

    /// Whether a close frame should be attempted. The socket is already gone
    /// for client-initiated closes and transport failures.
    pub fn sends_close_frame(self) -> bool {
        !matches!(
            self,
            DisconnectReason::ClientClosed | DisconnectReason::Transport
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}
