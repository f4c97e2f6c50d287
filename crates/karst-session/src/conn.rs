//! One physical connection: reader task, serialized writes, and the
//! wiring between frames, the correlator, and the event channel.
//!
//! A [`Conn`] owns its socket for the socket's whole life. Exactly one
//! reader task runs per connection; it decodes frames and dispatches
//! them without ever blocking on downstream work (events go into an
//! unbounded channel). EOF, read errors, and corrupt frames all
//! converge on one teardown path: close the socket, fail every pending
//! request, publish the closed signal, invoke the lost-hook.

use std::sync::Arc;
use std::time::Duration;

use karst_protocol::{
    encode_frame, unpack_body, FrameDecoder, Proto, ServerError, Value,
};
use karst_transport::{Connection, ConnectionId};
use tokio::sync::{mpsc, watch};

use crate::{Correlator, Error, Result};

/// A server-pushed event, decoded and ready for dispatch.
#[derive(Debug, Clone)]
pub struct Event {
    /// Which event type arrived.
    pub proto: Proto,
    /// The decoded event body.
    pub data: Value,
}

/// Sender half of the dispatcher's event channel.
pub type EventTx = mpsc::UnboundedSender<Event>;

/// Hook invoked exactly once when the connection tears down.
pub type LostHook = Box<dyn FnOnce(ConnectionId, String) + Send + 'static>;

/// One physical connection to a node.
pub struct Conn<C: Connection> {
    socket: Arc<C>,
    correlator: Arc<Correlator>,
    closed_rx: watch::Receiver<bool>,
}

impl<C: Connection> Conn<C> {
    /// Takes ownership of a freshly dialed socket and spawns its
    /// reader task. `event_tx` receives every server-pushed event;
    /// `on_lost` fires once when the connection dies, with the reason.
    pub fn spawn(socket: C, event_tx: EventTx, on_lost: LostHook) -> Arc<Self> {
        let socket = Arc::new(socket);
        let correlator = Arc::new(Correlator::new());
        let (closed_tx, closed_rx) = watch::channel(false);

        tokio::spawn(read_loop(
            socket.clone(),
            correlator.clone(),
            event_tx,
            closed_tx,
            on_lost,
        ));

        Arc::new(Self {
            socket,
            correlator,
            closed_rx,
        })
    }

    /// Sends a request and awaits its correlated response.
    ///
    /// A [`Value::Nil`] body sends an empty payload. With a `timeout`,
    /// expiry fails only this caller: the request stays in flight and
    /// a late response is discarded as an unknown pid.
    pub async fn request(
        &self,
        tp: Proto,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if *self.closed_rx.borrow() {
            return Err(Error::NotConnected);
        }
        let payload = if body.is_nil() {
            Vec::new()
        } else {
            karst_protocol::pack(&body)?
        };
        let (pid, rx) = self.correlator.register()?;
        tracing::trace!(id = %self.socket.id(), %tp, pid, "sending request");

        let frame = encode_frame(pid, tp, &payload);
        if let Err(err) = self.socket.send(&frame).await {
            self.correlator.cancel(pid);
            return Err(err.into());
        }

        match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply.unwrap_or_else(|_| {
                    Err(Error::ConnectionLost("reply channel dropped".into()))
                }),
                Err(_elapsed) => {
                    self.correlator.cancel(pid);
                    Err(Error::Timeout(limit))
                }
            },
            None => rx.await.unwrap_or_else(|_| {
                Err(Error::ConnectionLost("reply channel dropped".into()))
            }),
        }
    }

    /// Requests closure and returns immediately. The reader task
    /// observes EOF and finishes the teardown (same path as an
    /// error-triggered disconnect).
    pub async fn close(&self) {
        if let Err(err) = self.socket.close().await {
            tracing::debug!(id = %self.socket.id(), %err, "close on already-dead socket");
        }
    }

    /// Waits until the teardown path has completed.
    pub async fn wait_closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// `true` once the teardown path has run.
    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.correlator.len()
    }

    /// The remote address, for diagnostics.
    pub fn peer_addr(&self) -> String {
        self.socket.peer_addr()
    }

    /// The socket's unique id.
    pub fn id(&self) -> ConnectionId {
        self.socket.id()
    }
}

/// The reader task: runs until EOF, a read error, or a corrupt frame.
async fn read_loop<C: Connection>(
    socket: Arc<C>,
    correlator: Arc<Correlator>,
    event_tx: EventTx,
    closed_tx: watch::Sender<bool>,
    on_lost: LostHook,
) {
    let id = socket.id();
    let mut decoder = FrameDecoder::new();

    let reason = 'read: loop {
        match socket.recv().await {
            Ok(Some(chunk)) => {
                decoder.feed(&chunk);
                loop {
                    match decoder.try_next() {
                        Ok(Some(frame)) => {
                            dispatch(&correlator, &event_tx, frame);
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::error!(%id, %err, "corrupt frame, dropping connection");
                            break 'read err.to_string();
                        }
                    }
                }
            }
            Ok(None) => break 'read "connection closed".to_owned(),
            Err(err) => break 'read format!("read failed: {err}"),
        }
    };

    // The single disconnect path.
    let _ = socket.close().await;
    correlator.fail_all(&reason);
    let _ = closed_tx.send(true);
    tracing::info!(%id, %reason, "connection torn down");
    on_lost(id, reason);
}

/// Routes one decoded frame: responses to the correlator, events into
/// the dispatcher channel.
fn dispatch(correlator: &Correlator, event_tx: &EventTx, frame: karst_protocol::Frame) {
    let Some(proto) = frame.proto() else {
        tracing::error!(tp = frame.tp, "unsupported message type received");
        return;
    };

    if proto.is_response() {
        let result = match proto {
            Proto::ResPing | Proto::ResOk => Ok(Value::Nil),
            Proto::ResData => unpack_body(&frame.body).map_err(Error::from),
            Proto::ResError => match unpack_body(&frame.body) {
                Ok(body) => Err(Error::Server(ServerError::from_body(&body))),
                Err(err) => Err(err.into()),
            },
            _ => unreachable!("is_response() covers exactly these four"),
        };
        correlator.resolve(frame.pid, result);
    } else if proto.is_event() {
        match unpack_body(&frame.body) {
            Ok(data) => {
                // Unbounded send: the reader never blocks on handlers.
                let _ = event_tx.send(Event { proto, data });
            }
            Err(err) => {
                tracing::error!(%proto, %err, "undecodable event payload, dropping");
            }
        }
    } else {
        tracing::error!(%proto, "request-typed frame from server, ignoring");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karst_protocol::pack;
    use karst_transport::TransportError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    // -- In-memory socket -------------------------------------------------

    /// A `Connection` backed by channels: what the client sends lands
    /// in `outbound`, what the test pushes into `inbound` is received.
    struct MockSocket {
        id: ConnectionId,
        inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        closed: watch::Sender<bool>,
    }

    /// The test's handle to the other end of a `MockSocket`.
    struct MockPeer {
        /// Frames (chunks) the client wrote.
        sent: mpsc::UnboundedReceiver<Vec<u8>>,
        /// Push bytes toward the client.
        push: mpsc::UnboundedSender<Vec<u8>>,
    }

    impl MockPeer {
        /// Receives the next request frame the client wrote.
        async fn next_frame(&mut self) -> karst_protocol::Frame {
            let mut decoder = FrameDecoder::new();
            loop {
                let chunk = self.sent.recv().await.expect("client hung up");
                decoder.feed(&chunk);
                if let Some(frame) = decoder.try_next().expect("well-formed") {
                    return frame;
                }
            }
        }

        /// Pushes a response frame to the client.
        fn reply(&self, pid: u16, tp: Proto, body: &Value) {
            let payload = if body.is_nil() {
                Vec::new()
            } else {
                pack(body).unwrap()
            };
            self.push.send(encode_frame(pid, tp, &payload)).unwrap();
        }
    }

    fn mock_pair() -> (MockSocket, MockPeer) {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        (
            MockSocket {
                id: ConnectionId::next(),
                inbound: Mutex::new(push_rx),
                outbound: out_tx,
                closed: closed_tx,
            },
            MockPeer {
                sent: out_rx,
                push: push_tx,
            },
        )
    }

    impl Connection for MockSocket {
        async fn send(&self, data: &[u8]) -> std::result::Result<(), TransportError> {
            self.outbound.send(data.to_vec()).map_err(|_| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "peer gone",
                ))
            })
        }

        async fn recv(&self) -> std::result::Result<Option<Vec<u8>>, TransportError> {
            let mut inbound = self.inbound.lock().await;
            let mut closed = self.closed.subscribe();
            tokio::select! {
                chunk = inbound.recv() => Ok(chunk),
                _ = closed.wait_for(|c| *c) => Ok(None),
            }
        }

        async fn close(&self) -> std::result::Result<(), TransportError> {
            let _ = self.closed.send(true);
            Ok(())
        }

        fn peer_addr(&self) -> String {
            "mock:0".into()
        }

        fn id(&self) -> ConnectionId {
            self.id
        }
    }

    fn spawn_conn(
        socket: MockSocket,
    ) -> (Arc<Conn<MockSocket>>, mpsc::UnboundedReceiver<Event>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let conn = Conn::spawn(socket, event_tx, Box::new(|_, _| {}));
        (conn, event_rx)
    }

    // -- Correlation ------------------------------------------------------

    #[tokio::test]
    async fn test_request_receives_matching_response() {
        let (socket, mut peer) = mock_pair();
        let (conn, _events) = spawn_conn(socket);

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Query, Value::Str("1+1;".into()), None).await }
        });

        let frame = peer.next_frame().await;
        assert_eq!(frame.proto(), Some(Proto::Query));
        peer.reply(frame.pid, Proto::ResData, &Value::Int(2));

        let result = call.await.unwrap().expect("request should succeed");
        assert_eq!(result, Value::Int(2));
    }

    #[tokio::test]
    async fn test_interleaved_responses_reach_their_own_callers() {
        let (socket, mut peer) = mock_pair();
        let (conn, _events) = spawn_conn(socket);

        let first = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Query, Value::Int(1), None).await }
        });
        let frame_a = peer.next_frame().await;

        let second = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Query, Value::Int(2), None).await }
        });
        let frame_b = peer.next_frame().await;

        // Reply in reverse order; each caller must still get its own.
        peer.reply(frame_b.pid, Proto::ResData, &Value::Str("b".into()));
        peer.reply(frame_a.pid, Proto::ResData, &Value::Str("a".into()));

        assert_eq!(first.await.unwrap().unwrap(), Value::Str("a".into()));
        assert_eq!(second.await.unwrap().unwrap(), Value::Str("b".into()));
        assert_eq!(conn.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_empty_reply_bodies_resolve_to_nil() {
        let (socket, mut peer) = mock_pair();
        let (conn, _events) = spawn_conn(socket);

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Ping, Value::Nil, None).await }
        });
        let frame = peer.next_frame().await;
        assert!(frame.body.is_empty(), "nil body sends an empty payload");
        peer.reply(frame.pid, Proto::ResPing, &Value::Nil);

        assert_eq!(call.await.unwrap().unwrap(), Value::Nil);
    }

    #[tokio::test]
    async fn test_res_error_surfaces_as_server_error() {
        let (socket, mut peer) = mock_pair();
        let (conn, _events) = spawn_conn(socket);

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Query, Value::Str("x;".into()), None).await }
        });
        let frame = peer.next_frame().await;

        let mut body = std::collections::BTreeMap::new();
        body.insert("error_code".to_owned(), Value::Int(-54));
        body.insert("error_msg".to_owned(), Value::Str("no such thing".into()));
        peer.reply(frame.pid, Proto::ResError, &Value::Map(body));

        let err = call.await.unwrap().unwrap_err();
        match err {
            Error::Server(server) => {
                assert_eq!(server.code, karst_protocol::ErrorCode::Lookup);
                assert_eq!(server.message, "no such thing");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }

    // -- Timeouts ---------------------------------------------------------

    #[tokio::test]
    async fn test_timeout_fails_only_the_timed_out_request() {
        let (socket, mut peer) = mock_pair();
        let (conn, _events) = spawn_conn(socket);

        // This one times out (the peer never replies to it).
        let doomed = tokio::spawn({
            let conn = conn.clone();
            async move {
                conn.request(
                    Proto::Query,
                    Value::Int(0),
                    Some(Duration::from_millis(50)),
                )
                .await
            }
        });
        let doomed_frame = peer.next_frame().await;

        // This one is answered normally.
        let healthy = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Query, Value::Int(1), None).await }
        });
        let healthy_frame = peer.next_frame().await;

        let err = doomed.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        // The connection is still usable afterwards.
        peer.reply(healthy_frame.pid, Proto::ResData, &Value::Int(1));
        assert_eq!(healthy.await.unwrap().unwrap(), Value::Int(1));

        // A late reply to the timed-out pid is silently discarded.
        peer.reply(doomed_frame.pid, Proto::ResData, &Value::Int(99));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!conn.is_closed());
    }

    // -- Disconnect -------------------------------------------------------

    #[tokio::test]
    async fn test_peer_hangup_fails_all_pending_requests() {
        let (socket, mut peer) = mock_pair();

        let lost = Arc::new(AtomicBool::new(false));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let conn = Conn::spawn(socket, event_tx, {
            let lost = lost.clone();
            Box::new(move |_, _| lost.store(true, Ordering::SeqCst))
        });

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Query, Value::Int(1), None).await }
        });
        let _frame = peer.next_frame().await;

        // Peer goes away: the inbound channel closes, recv sees None.
        drop(peer);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));

        conn.wait_closed().await;
        assert_eq!(conn.pending_requests(), 0, "table empty after close");
        assert!(lost.load(Ordering::SeqCst), "lost-hook must fire");
        assert!(conn.is_closed());

        // Requests after teardown fail fast.
        let err = conn.request(Proto::Ping, Value::Nil, None).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }

    #[tokio::test]
    async fn test_corrupt_frame_tears_down_the_connection() {
        let (socket, mut peer) = mock_pair();
        let (conn, _events) = spawn_conn(socket);

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Query, Value::Int(1), None).await }
        });
        let frame = peer.next_frame().await;

        // A header whose integrity marker does not match its type.
        let mut bad = encode_frame(frame.pid, Proto::ResData, &[]);
        bad[7] = 0x00;
        peer.push.send(bad).unwrap();

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        conn.wait_closed().await;
    }

    #[tokio::test]
    async fn test_explicit_close_converges_on_teardown_path() {
        let (socket, mut peer) = mock_pair();
        let (conn, _events) = spawn_conn(socket);

        let call = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Proto::Query, Value::Int(1), None).await }
        });
        let _frame = peer.next_frame().await;

        conn.close().await;
        conn.wait_closed().await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert_eq!(conn.pending_requests(), 0);
    }

    // -- Events -----------------------------------------------------------

    #[tokio::test]
    async fn test_events_flow_to_the_event_channel_in_order() {
        let (socket, peer) = mock_pair();
        let (_conn, mut events) = spawn_conn(socket);

        for i in 0..3i64 {
            let mut body = std::collections::BTreeMap::new();
            body.insert("id".to_owned(), Value::Int(7));
            body.insert("event".to_owned(), Value::Str(format!("e{i}")));
            body.insert("args".to_owned(), Value::List(vec![Value::Int(i)]));
            let payload = pack(&Value::Map(body)).unwrap();
            peer.push
                .send(encode_frame(0, Proto::RoomEmit, &payload))
                .unwrap();
        }

        for i in 0..3i64 {
            let event = events.recv().await.expect("event expected");
            assert_eq!(event.proto, Proto::RoomEmit);
            assert_eq!(
                event.data.get("event").and_then(Value::as_str),
                Some(format!("e{i}").as_str())
            );
        }
    }
}
