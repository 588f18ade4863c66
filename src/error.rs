//! Error kinds for the ingestion engine.
//!
//! These map onto the conceptual error kinds of the error-handling design:
//! transient network/parse failures are logged and recovered from locally,
//! never surfaced through the public API. `Network` is produced implicitly
//! via `#[from]` when `Coordinator::new` fails to start the event-loop
//! pool's OS threads — the one lifecycle error that does propagate. Every
//! other variant is constructed at the handler/pipeline call site that
//! observes the underlying failure and used to give that failure a
//! structured `Display` for its log line, then dropped there, per the
//! policy that handlers recover locally and never surface errors upward.
//! See `push`, `pull`, and `pipeline` for where each is produced.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("message queue full, message dropped")]
    QueueFull,

    #[error("circuit breaker open, request skipped")]
    CircuitOpen,
}

pub type Result<T> = std::result::Result<T, IngestError>;
