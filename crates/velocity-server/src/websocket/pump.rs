//! Read and write pumps for one WebSocket connection.
//!
//! The write pump owns the outbound queue: it writes frames in order, sends a
//! ping when nothing was written for a full ping interval, and sends a close
//! frame once the registry closes the queue. The read pump runs inline on the
//! upgrade task and stops on a read error, a close frame, the idle deadline,
//! or the write pump exiting.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::ClientConnection;
use super::handler::handle_frame;
use super::registry::Registry;
use crate::config::PumpConfig;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Why the read pump stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEnd {
    /// The peer sent a close frame.
    Closed,
    /// The stream ended without a close frame.
    Eof,
    /// Reading failed (including oversized frames).
    Error,
    /// Nothing arrived within the read deadline.
    Timeout,
    /// The write pump exited.
    WriterStopped,
}

/// Serve one upgraded connection until either pump stops.
///
/// Registers `conn`, runs both pumps, then deregisters it. `rx` must be the
/// receiving half of the queue whose sender `conn` holds.
#[instrument(
    skip_all,
    fields(session_id = %conn.session_id(), conn_id = %conn.id, role = %conn.role())
)]
pub async fn run_connection(
    socket: WebSocket,
    conn: Arc<ClientConnection>,
    rx: mpsc::Receiver<Arc<str>>,
    registry: Arc<Registry>,
    config: PumpConfig,
) {
    let role = conn.role().as_str();
    let (sink, stream) = socket.split();

    registry.register(Arc::clone(&conn));
    counter!(WS_CONNECTIONS_TOTAL, "role" => role).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!("connection opened");

    let stop = CancellationToken::new();
    let mut writer = tokio::spawn(write_pump(
        sink,
        rx,
        config.ping_interval,
        config.write_timeout,
        stop.clone(),
    ));

    let end = read_pump(stream, &conn, &registry, config.read_timeout, &stop).await;

    // Closing the queue lets the writer flush and send its close frame.
    registry.deregister(&conn);
    if tokio::time::timeout(config.write_timeout, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    counter!(WS_DISCONNECTIONS_TOTAL, "role" => role).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    info!(
        reason = ?end,
        dropped = conn.drop_count(),
        duration_secs = conn.age().as_secs(),
        idle_secs = conn.idle_for().as_secs(),
        "connection closed"
    );
}

async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Arc<str>>,
    ping_every: Duration,
    write_timeout: Duration,
    stop: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let _stop_reader = stop.drop_guard();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    let _ = write(&mut sink, Message::Close(None), write_timeout).await;
                    debug!("outbound queue closed");
                    break;
                };
                if !write(&mut sink, Message::Text(frame.to_string().into()), write_timeout).await {
                    break;
                }
                ping.reset();
            }
            _ = ping.tick() => {
                if !write(&mut sink, Message::Ping(Vec::new().into()), write_timeout).await {
                    break;
                }
            }
        }
    }
}

async fn write<S>(sink: &mut S, message: Message, deadline: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "write failed");
            false
        }
        Err(_) => {
            warn!(timeout = ?deadline, "write deadline exceeded");
            false
        }
    }
}

async fn read_pump<St, E>(
    mut stream: St,
    conn: &ClientConnection,
    registry: &Registry,
    read_timeout: Duration,
    stop: &CancellationToken,
) -> ReadEnd
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let next = tokio::select! {
            () = stop.cancelled() => return ReadEnd::WriterStopped,
            next = tokio::time::timeout(read_timeout, stream.next()) => next,
        };
        let message = match next {
            Err(_) => {
                warn!(timeout = ?read_timeout, "read deadline exceeded");
                return ReadEnd::Timeout;
            }
            Ok(None) => return ReadEnd::Eof,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "read failed");
                return ReadEnd::Error;
            }
            Ok(Some(Ok(message))) => message,
        };

        conn.mark_alive();
        match message {
            Message::Text(text) => {
                let _ = handle_frame(text.as_str(), conn, registry);
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    let _ = handle_frame(text, conn, registry);
                }
                Err(_) => debug!(len = data.len(), "non-UTF8 binary frame dropped"),
            },
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return ReadEnd::Closed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as fmpsc;
    use velocity_core::testing::{MemorySessionStore, RecordingAuditLog};
    use velocity_core::{PeerMetadata, SessionId};

    use super::*;
    use crate::websocket::dispatch::SideEffects;

    const PING: Duration = Duration::from_secs(54);
    const WRITE: Duration = Duration::from_secs(10);
    const READ: Duration = Duration::from_secs(60);

    fn registry() -> Registry {
        Registry::new(SideEffects::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(RecordingAuditLog::new()),
            Duration::from_secs(1),
        ))
    }

    fn text(s: &str) -> Message {
        Message::Text(s.to_string().into())
    }

    #[tokio::test(start_paused = true)]
    async fn writer_drains_in_order_then_sends_close() {
        let (out_tx, out_rx) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(Arc::from("a")).unwrap();
        tx.try_send(Arc::from("b")).unwrap();
        drop(tx);

        let stop = CancellationToken::new();
        write_pump(out_tx, rx, PING, WRITE, stop.clone()).await;

        let written: Vec<Message> = out_rx.collect().await;
        assert_eq!(written, vec![text("a"), text("b"), Message::Close(None)]);
        assert!(stop.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn writer_pings_when_idle() {
        let (out_tx, mut out_rx) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel::<Arc<str>>(8);
        let started = Instant::now();
        let writer = tokio::spawn(write_pump(out_tx, rx, PING, WRITE, CancellationToken::new()));

        let first = out_rx.next().await.unwrap();
        assert!(matches!(first, Message::Ping(_)));
        assert!(started.elapsed() >= PING);

        drop(tx);
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn writer_defers_ping_after_traffic() {
        let (out_tx, mut out_rx) = fmpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel::<Arc<str>>(8);
        let writer = tokio::spawn(write_pump(out_tx, rx, PING, WRITE, CancellationToken::new()));

        tokio::time::sleep(PING / 2).await;
        tx.send(Arc::from("data")).await.unwrap();
        assert_eq!(out_rx.next().await.unwrap(), text("data"));
        let after_send = Instant::now();

        assert!(matches!(out_rx.next().await.unwrap(), Message::Ping(_)));
        assert!(after_send.elapsed() >= PING);

        drop(tx);
        writer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn writer_stops_on_write_failure() {
        let (out_tx, out_rx) = fmpsc::unbounded::<Message>();
        drop(out_rx);
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(Arc::from("lost")).unwrap();

        let stop = CancellationToken::new();
        write_pump(out_tx, rx, PING, WRITE, stop.clone()).await;
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn reader_relays_producer_frames_until_close() {
        let registry = registry();
        let (ptx, _prx) = mpsc::channel(8);
        let producer = Arc::new(ClientConnection::producer(SessionId::from("s"), ptx));
        let (stx, mut srx) = mpsc::channel(8);
        let sub = Arc::new(ClientConnection::subscriber(
            SessionId::from("s"),
            PeerMetadata::default(),
            stx,
        ));
        registry.register(Arc::clone(&producer));
        registry.register(sub);

        let frame = r#"{"type":"stream_data","payload":{"speed":3}}"#;
        let inbound = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(text(frame)),
            Ok(Message::Binary(frame.as_bytes().to_vec().into())),
            Ok(Message::Pong(Vec::new().into())),
            Ok(Message::Close(None)),
            Ok(text(frame)),
        ]);

        let end = read_pump(inbound, &producer, &registry, READ, &CancellationToken::new()).await;
        assert_eq!(end, ReadEnd::Closed);
        assert_eq!(&*srx.try_recv().unwrap(), frame);
        assert_eq!(&*srx.try_recv().unwrap(), frame);
        assert!(srx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reader_reports_eof_and_errors() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        let conn = ClientConnection::producer(SessionId::from("s"), tx);
        let stop = CancellationToken::new();

        let empty = futures::stream::iter(Vec::<Result<Message, std::io::Error>>::new());
        assert_eq!(read_pump(empty, &conn, &registry, READ, &stop).await, ReadEnd::Eof);

        let failing =
            futures::stream::iter(vec![Err::<Message, _>(std::io::Error::other("reset"))]);
        assert_eq!(read_pump(failing, &conn, &registry, READ, &stop).await, ReadEnd::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn reader_times_out_when_idle() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        let conn = ClientConnection::producer(SessionId::from("s"), tx);
        let silent = futures::stream::pending::<Result<Message, std::io::Error>>();

        let started = Instant::now();
        let end = read_pump(silent, &conn, &registry, READ, &CancellationToken::new()).await;
        assert_eq!(end, ReadEnd::Timeout);
        assert!(started.elapsed() >= READ);
    }

    #[tokio::test]
    async fn reader_stops_when_writer_exits() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        let conn = ClientConnection::producer(SessionId::from("s"), tx);
        let silent = futures::stream::pending::<Result<Message, std::io::Error>>();
        let stop = CancellationToken::new();
        stop.cancel();
        assert_eq!(
            read_pump(silent, &conn, &registry, READ, &stop).await,
            ReadEnd::WriterStopped
        );
    }
}
