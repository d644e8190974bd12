//! The authenticated stream connection.
//!
//! One reader task pulls frames and dispatches them synchronously into
//! the table synchronizer; handlers must not block on network I/O. An
//! independent keepalive task pings when the connection goes quiet, so a
//! slow consumer cannot starve liveness. Shutdown closes the socket,
//! then awaits both tasks; sends are rejected once close begins.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::gateway::ExchangeGateway;
use crate::ops::Metrics;
use crate::sync::{TableMessage, TableSynchronizer};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

static MONO_START: OnceLock<Instant> = OnceLock::new();

fn mono_now_ns() -> u64 {
    let start = MONO_START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct StreamClient {
    write: Arc<tokio::sync::Mutex<WsSink>>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
    sync: Arc<Mutex<TableSynchronizer>>,
}

impl StreamClient {
    /// Open the session's streaming connection with signed handshake
    /// headers from the gateway and start the reader and keepalive
    /// tasks.
    pub async fn connect(
        gateway: &ExchangeGateway,
        sync: Arc<Mutex<TableSynchronizer>>,
        metrics: Option<Metrics>,
    ) -> anyhow::Result<Self> {
        let settings = gateway.settings();
        let mut request = settings.ws_url.as_str().into_client_request()?;
        if settings.has_auth() {
            for (name, value) in gateway.ws_auth_headers() {
                request
                    .headers_mut()
                    .insert(name, HeaderValue::from_str(&value)?);
            }
        }
        let (ws, _) = connect_async(request).await?;
        let (write, read) = ws.split();

        let write = Arc::new(tokio::sync::Mutex::new(write));
        let closed = Arc::new(AtomicBool::new(false));
        let close_signal = Arc::new(Notify::new());
        let last_activity_ns = Arc::new(AtomicU64::new(mono_now_ns()));

        let reader = tokio::spawn(reader_loop(
            read,
            write.clone(),
            sync.clone(),
            metrics.clone(),
            closed.clone(),
            close_signal.clone(),
            last_activity_ns.clone(),
        ));
        let keepalive = tokio::spawn(keepalive_loop(
            write.clone(),
            closed.clone(),
            close_signal.clone(),
            last_activity_ns,
            metrics,
            settings.ping_interval_secs,
        ));

        Ok(Self {
            write,
            closed,
            close_signal,
            reader,
            keepalive,
            sync,
        })
    }

    pub fn synchronizer(&self) -> Arc<Mutex<TableSynchronizer>> {
        self.sync.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn subscribe(&self, topics: &[&str]) -> anyhow::Result<()> {
        self.send_op("subscribe", topics).await
    }

    pub async fn unsubscribe(&self, topics: &[&str]) -> anyhow::Result<()> {
        self.send_op("unsubscribe", topics).await
    }

    async fn send_op(&self, op: &str, topics: &[&str]) -> anyhow::Result<()> {
        if self.is_closed() {
            anyhow::bail!("stream is closed");
        }
        let frame = serde_json::json!({ "op": op, "args": topics });
        self.write
            .lock()
            .await
            .send(Message::Text(frame.to_string()))
            .await?;
        Ok(())
    }

    /// Close the connection and wait for the reader and keepalive tasks
    /// to finish. Further sends are rejected from the moment this is
    /// called.
    pub async fn close(self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::Release);
        {
            let mut write = self.write.lock().await;
            let _ = write.send(Message::Close(None)).await;
        }
        self.close_signal.notify_waiters();
        let _ = self.reader.await;
        let _ = self.keepalive.await;
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn reader_loop(
    mut read: WsSource,
    write: Arc<tokio::sync::Mutex<WsSink>>,
    sync: Arc<Mutex<TableSynchronizer>>,
    metrics: Option<Metrics>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
    last_activity_ns: Arc<AtomicU64>,
) {
    let mut logged_non_utf8 = false;
    // One pinned future keeps the waiter registered across iterations,
    // so a close signal between frames is not lost.
    let notified = close_signal.notified();
    tokio::pin!(notified);
    loop {
        let message = tokio::select! {
            biased;
            _ = &mut notified => break,
            message = read.next() => message,
        };
        let Some(message) = message else { break };
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                eprintln!("WARN: stream read error: {err}");
                break;
            }
        };
        last_activity_ns.store(mono_now_ns(), Ordering::Relaxed);
        match message {
            Message::Text(text) => {
                dispatch_frame(&text, &sync, &metrics);
            }
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => dispatch_frame(&text, &sync, &metrics),
                Err(_) => {
                    if !logged_non_utf8 {
                        eprintln!("WARN: non-utf8 binary stream frame ignored");
                        logged_non_utf8 = true;
                    }
                }
            },
            Message::Ping(payload) => {
                let mut write = write.lock().await;
                if write.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Message::Pong(_) => {}
            Message::Close(_) => break,
            _ => {}
        }
    }
    closed.store(true, Ordering::Release);
    close_signal.notify_waiters();
}

/// Parse and apply one table frame. Non-table frames (subscribe acks,
/// welcome banners) fail to parse and are skipped. Apply errors are
/// surfaced in the log but never kill the reader.
fn dispatch_frame(
    text: &str,
    sync: &Arc<Mutex<TableSynchronizer>>,
    metrics: &Option<Metrics>,
) {
    if let Some(metrics) = metrics {
        metrics.inc_frame();
        metrics.set_last_frame_ms(now_ms());
    }
    let Ok(message) = serde_json::from_str::<TableMessage>(text) else {
        return;
    };
    let mut sync = sync.lock().expect("synchronizer lock poisoned");
    if let Err(err) = sync.apply(&message) {
        eprintln!("WARN: table apply failed: {err}");
    }
}

async fn keepalive_loop(
    write: Arc<tokio::sync::Mutex<WsSink>>,
    closed: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
    last_activity_ns: Arc<AtomicU64>,
    metrics: Option<Metrics>,
    ping_interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(500));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let idle_limit_ns = ping_interval_secs.max(1) * 1_000_000_000;
    let notified = close_signal.notified();
    tokio::pin!(notified);
    loop {
        tokio::select! {
            biased;
            _ = &mut notified => break,
            _ = interval.tick() => {}
        }
        if closed.load(Ordering::Acquire) {
            break;
        }
        let idle_ns = mono_now_ns().saturating_sub(last_activity_ns.load(Ordering::Relaxed));
        if idle_ns < idle_limit_ns {
            continue;
        }
        let mut write = write.lock().await;
        if write.send(Message::Ping(Vec::new())).await.is_err() {
            break;
        }
        // Counts as activity so a quiet line is pinged once per interval.
        last_activity_ns.store(mono_now_ns(), Ordering::Relaxed);
        if let Some(metrics) = &metrics {
            metrics.inc_ping();
        }
    }
}
