//! Push-stream handler: one persistent WebSocket connection per symbol,
//! delivering incremental depth updates.
//!
//! The connection is modeled as an explicit state machine (see `ConnState`)
//! driven by an event pump task rather than chained callbacks, per the
//! "callback-heavy async" re-architecture note. `tokio-tungstenite` plays
//! the role of the source's higher-level client-library flavor of this
//! handler (§9 flag 6 is agnostic between the two; this rewrite picks that
//! one).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use socket2::SockRef;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::metrics::Metrics;
use crate::orderbook::Symbol;
use crate::pipeline::{Message as PipelineMessage, Origin, Pipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Resolving,
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Broken,
}

const SEND_RECV_BUFFER_BYTES: usize = 256 * 1024;

struct Shared {
    symbol: Symbol,
    host: String,
    state: Mutex<ConnState>,
    ready_since: Mutex<Option<Instant>>,
    reconnect_reset_after: Duration,
    heartbeat_interval: Option<Duration>,
    io_deadline: Duration,
    running: std::sync::atomic::AtomicBool,
    pipeline: Arc<Pipeline>,
    metrics: Metrics,
}

pub struct PushHandler {
    shared: Arc<Shared>,
}

impl PushHandler {
    pub fn new(
        symbol: Symbol,
        host: impl Into<String>,
        pipeline: Arc<Pipeline>,
        metrics: Metrics,
        reconnect_reset_after: Duration,
        heartbeat_interval: Option<Duration>,
        io_deadline: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                symbol,
                host: host.into(),
                state: Mutex::new(ConnState::Idle),
                ready_since: Mutex::new(None),
                reconnect_reset_after,
                heartbeat_interval,
                io_deadline,
                running: std::sync::atomic::AtomicBool::new(false),
                pipeline,
                metrics,
            }),
        }
    }

    pub fn state(&self) -> ConnState {
        *self.shared.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnState::Ready
    }

    /// Spawns the connect/receive/reconnect loop onto the caller's runtime
    /// (the event loop that owns this symbol).
    pub fn connect(&self, handle: &tokio::runtime::Handle) {
        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        handle.spawn(run(shared));
    }

    /// Cooperative stop: the receive loop observes `running == false` on
    /// its next wakeup and closes the socket.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        *self.shared.state.lock() = ConnState::Closing;
    }
}

async fn run(shared: Arc<Shared>) {
    let mut attempt: u32 = 0;
    while shared.running.load(Ordering::Acquire) {
        set_state(&shared, ConnState::Resolving);
        set_state(&shared, ConnState::Connecting);

        let url = format!(
            "wss://{}/ws/{}@depth",
            shared.host,
            shared.symbol.as_str().to_lowercase()
        );

        let connect_result = tokio::time::timeout(
            shared.io_deadline,
            connect_tuned(&shared.host, &url),
        )
        .await;

        match connect_result {
            Ok(Ok(mut ws)) => {
                set_state(&shared, ConnState::Handshaking);
                let subscribe = serde_json::json!({
                    "method": "SUBSCRIBE",
                    "params": [format!("{}@depth", shared.symbol.as_str().to_lowercase())],
                    "id": 1,
                });
                let send_result =
                    tokio::time::timeout(shared.io_deadline, ws.send(WsMessage::Text(subscribe.to_string())))
                        .await;
                match send_result {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        let err = IngestError::WebSocket(e);
                        warn!(symbol = %shared.symbol, error = %err, "subscribe frame send failed");
                        attempt = fail_and_backoff(&shared, attempt).await;
                        continue;
                    }
                    Err(_) => {
                        warn!(symbol = %shared.symbol, "subscribe frame send timed out");
                        attempt = fail_and_backoff(&shared, attempt).await;
                        continue;
                    }
                }

                set_state(&shared, ConnState::Ready);
                *shared.ready_since.lock() = Some(Instant::now());
                info!(symbol = %shared.symbol, "push stream ready");

                receive_loop(&shared, &mut ws, &mut attempt).await;
            }
            Ok(Err(e)) => {
                let err = IngestError::WebSocket(e);
                warn!(symbol = %shared.symbol, error = %err, "push stream connect failed");
                attempt = fail_and_backoff(&shared, attempt).await;
            }
            Err(_) => {
                warn!(symbol = %shared.symbol, deadline = ?shared.io_deadline, "push stream connect timed out");
                attempt = fail_and_backoff(&shared, attempt).await;
            }
        }
    }
    set_state(&shared, ConnState::Closing);
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

async fn receive_loop(shared: &Arc<Shared>, ws: &mut WsStream, attempt: &mut u32) {
    let mut heartbeat = shared.heartbeat_interval.map(tokio::time::interval);
    loop {
        if !shared.running.load(Ordering::Acquire) {
            let _ = ws.close(None).await;
            return;
        }
        if sustained_ready(shared) {
            *attempt = 0;
        }

        tokio::select! {
            frame = ws.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        shared.pipeline.add_message(PipelineMessage {
                            origin: Origin::Push,
                            symbol: shared.symbol.clone(),
                            payload: text.into_bytes(),
                        });
                    }
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!(symbol = %shared.symbol, "push stream closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = IngestError::WebSocket(e);
                        warn!(symbol = %shared.symbol, error = %err, "push stream read error");
                        break;
                    }
                }
            }
            _ = tick(&mut heartbeat) => {
                let _ = ws.send(WsMessage::Ping(Vec::new())).await;
            }
        }
    }

    set_state(shared, ConnState::Broken);
    shared.metrics.inc_reconnects();
    *attempt = fail_and_backoff(shared, *attempt).await;
}

fn sustained_ready(shared: &Shared) -> bool {
    shared
        .ready_since
        .lock()
        .map(|since| since.elapsed() >= shared.reconnect_reset_after)
        .unwrap_or(false)
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// `min(2^attempt * 1s, 30s)`, computed from the attempt count observed
/// *before* this failure is recorded (matching the source: the backoff is
/// derived from the pre-increment counter, which is bumped afterward).
async fn fail_and_backoff(shared: &Shared, attempt: u32) -> u32 {
    set_state(shared, ConnState::Broken);
    let backoff_ms = (1000u64.checked_shl(attempt.min(5)).unwrap_or(30_000)).min(30_000);
    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    attempt + 1
}

fn set_state(shared: &Shared, state: ConnState) {
    *shared.state.lock() = state;
}

async fn connect_tuned(
    host: &str,
    url: &str,
) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let authority = host.to_string();
    let tcp = TcpStream::connect(&authority).await.map_err(|e| {
        tokio_tungstenite::tungstenite::Error::Io(e)
    })?;
    tcp.set_nodelay(true).ok();
    tune_buffers(&tcp);

    let (ws, _response) = tokio_tungstenite::client_async_tls(url, tcp).await?;
    Ok(ws)
}

fn tune_buffers(tcp: &TcpStream) {
    let sock = SockRef::from(tcp);
    let _ = sock.set_recv_buffer_size(SEND_RECV_BUFFER_BYTES);
    let _ = sock.set_send_buffer_size(SEND_RECV_BUFFER_BYTES);
    // SO_RCVLOWAT/SO_SNDLOWAT (the source's 1 KiB low-watermarks) have no
    // portable safe wrapper in socket2; left unset rather than reaching
    // for a platform-specific raw-fd ioctl for a latency nicety.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::OrderbookStore;

    fn test_pipeline() -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            1_000,
            10_000,
            5,
            1_000,
            1_000_000,
            Arc::new(OrderbookStore::new(4)),
            Metrics::new(),
        ))
    }

    #[test]
    fn starts_idle_and_reports_ready_after_connect_not_called() {
        let handler = PushHandler::new(
            Symbol::from("BTCUSDT"),
            "stream.binance.com:9443",
            test_pipeline(),
            Metrics::new(),
            Duration::from_secs(60),
            None,
            Duration::from_secs(30),
        );
        assert_eq!(handler.state(), ConnState::Idle);
        assert!(!handler.is_ready());
    }

    #[test]
    fn stop_before_connect_moves_to_closing() {
        let handler = PushHandler::new(
            Symbol::from("BTCUSDT"),
            "stream.binance.com:9443",
            test_pipeline(),
            Metrics::new(),
            Duration::from_secs(60),
            None,
            Duration::from_secs(30),
        );
        handler.stop();
        assert_eq!(handler.state(), ConnState::Closing);
    }

    #[test]
    fn backoff_doubles_and_caps_at_thirty_seconds() {
        let ms = |attempt: u32| (1000u64.checked_shl(attempt.min(5)).unwrap_or(30_000)).min(30_000);
        assert_eq!(ms(0), 1_000);
        assert_eq!(ms(1), 2_000);
        assert_eq!(ms(2), 4_000);
        assert_eq!(ms(5), 30_000);
        assert_eq!(ms(10), 30_000);
    }
}
