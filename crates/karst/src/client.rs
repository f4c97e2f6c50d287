//! The Karst client: one logical connection to a database cluster.
//!
//! A [`Client`] owns at most one physical connection at a time, drawn
//! from a pool of candidate nodes. The lifecycle state machine lives
//! here: connecting, authenticating, the reconnect loop with backoff
//! and node failover, and the room rejoin pass after every successful
//! reconnect. Requests submitted while the connection is not ready
//! fail fast with `NotConnected`; callers that prefer to wait use
//! [`Client::wait_ready`] first.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use karst_protocol::{Proto, Value};
use karst_room::{Driver, RoomRegistry};
use karst_session::{Auth, Conn, ConnState, Error, Event, Lifecycle, LostHook, Result};
use karst_transport::{ConnectionId, Node, Socket};
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::ClientConfig;

/// The node status announcing a server-initiated shutdown; triggers a
/// proactive failover instead of waiting for the socket to die.
const STATUS_SHUTTING_DOWN: &str = "SHUTTING_DOWN";

/// Timeout for the liveness probe sent right after a reconnect dial.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A client for the Karst graph/object database.
///
/// Cheap to clone; clones share the same logical connection, default
/// scope, and joined rooms.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    lifecycle: Lifecycle,
    pool: Mutex<Vec<Node>>,
    auth: Mutex<Option<Auth>>,
    scope: Mutex<String>,
    conn: Mutex<Option<Arc<Conn<Socket>>>>,
    registry: Arc<RoomRegistry>,
    event_tx: mpsc::UnboundedSender<Event>,
    auto_reconnect: AtomicBool,
    reconnecting: AtomicBool,
}

impl Client {
    /// A client with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// A client with an explicit configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            lifecycle: Lifecycle::new(),
            pool: Mutex::new(Vec::new()),
            auth: Mutex::new(None),
            scope: Mutex::new(config.default_scope.clone()),
            conn: Mutex::new(None),
            registry: Arc::new(RoomRegistry::new()),
            event_tx,
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
            reconnecting: AtomicBool::new(false),
            config,
        });
        tokio::spawn(event_loop(Arc::downgrade(&inner), event_rx));
        Self { inner }
    }

    // -- Connecting -------------------------------------------------------

    /// Connects to a single node by host and port.
    ///
    /// Only establishes the socket; call
    /// [`authenticate`](Self::authenticate) before issuing requests.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.connect_node(Node::tcp(host, port)).await
    }

    /// Connects to a single node ([`Node::tcp`] or [`Node::ws`]).
    pub async fn connect_node(&self, node: Node) -> Result<()> {
        self.check_fresh()?;
        *self.inner.pool.lock().expect("pool lock poisoned") = vec![node.clone()];

        self.inner.lifecycle.set(ConnState::Connecting);
        let socket = match Socket::connect(
            &node,
            self.inner.config.secure,
            self.inner.config.connect_timeout,
        )
        .await
        {
            Ok(socket) => socket,
            Err(err) => {
                self.inner.lifecycle.set(ConnState::Disconnected);
                return Err(Error::Connect(format!("{node}: {err}")));
            }
        };
        let conn = Conn::spawn(
            socket,
            self.inner.event_tx.clone(),
            lost_hook(&self.inner),
        );
        *self.inner.conn.lock().expect("conn lock poisoned") = Some(conn);
        self.inner.lifecycle.set(ConnState::Connected);
        Ok(())
    }

    /// Connects through a pool of candidate nodes with credentials.
    ///
    /// Runs the full sequence (dial, probe, authenticate, rejoin) and
    /// keeps failing over between the given nodes for as long as
    /// auto-reconnect stays enabled.
    pub async fn connect_pool(
        &self,
        nodes: Vec<Node>,
        auth: impl Into<Auth>,
    ) -> Result<()> {
        self.check_fresh()?;
        if nodes.is_empty() {
            return Err(Error::Usage("connect_pool needs at least one node".into()));
        }
        *self.inner.pool.lock().expect("pool lock poisoned") = nodes;
        *self.inner.auth.lock().expect("auth lock poisoned") = Some(auth.into());
        self.reconnect().await
    }

    /// Authenticates the current connection with a token or
    /// username/password pair. The credentials are stored for
    /// re-authentication after reconnects.
    ///
    /// A rejected authentication closes the connection and is never
    /// retried automatically.
    pub async fn authenticate(&self, auth: impl Into<Auth>) -> Result<()> {
        let auth = auth.into();
        *self.inner.auth.lock().expect("auth lock poisoned") = Some(auth.clone());

        let conn = self.current_conn().ok_or(Error::NotConnected)?;
        self.inner.lifecycle.set(ConnState::Authenticating);
        match conn
            .request(
                Proto::Auth,
                auth.to_payload(),
                Some(self.inner.config.auth_timeout),
            )
            .await
        {
            Ok(_) => {
                self.inner.lifecycle.set(ConnState::Ready);
                Ok(())
            }
            Err(err) => {
                // Auth failure closes the connection (terminal).
                self.inner.lifecycle.set(ConnState::Closing);
                let taken = self.inner.conn.lock().expect("conn lock poisoned").take();
                if let Some(conn) = taken {
                    conn.close().await;
                }
                self.inner.lifecycle.set(ConnState::Closed);
                Err(map_auth_err(err))
            }
        }
    }

    /// Reconnects, switching nodes when a pool is configured.
    ///
    /// Idempotent: while an attempt is already in flight, this awaits
    /// that attempt instead of starting a second one.
    pub async fn reconnect(&self) -> Result<()> {
        if self.inner.reconnecting.swap(true, Ordering::SeqCst) {
            // Await the in-flight attempt: it ends in Ready, or in
            // Disconnected/Closed when it gives up.
            let mut rx = self.inner.lifecycle.subscribe();
            let state = rx
                .wait_for(|s| {
                    matches!(
                        s,
                        ConnState::Ready
                            | ConnState::Disconnected
                            | ConnState::Closed
                    )
                })
                .await
                .map_err(|_| Error::Closed)?;
            return match *state {
                ConnState::Ready => Ok(()),
                ConnState::Closed => Err(Error::Closed),
                _ => Err(Error::Connect("reconnect attempt failed".into())),
            };
        }
        let result = reconnect_loop(self.inner.clone()).await;
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        result
    }

    // -- Requests ---------------------------------------------------------

    /// Starts a query: code evaluated in a scope.
    ///
    /// ```no_run
    /// # async fn demo(client: &karst::Client) -> karst::Result<()> {
    /// let two = client.query("1 + 1;").exec().await?;
    /// let thing = client
    ///     .query(".store(key);")
    ///     .scope("@:inventory")
    ///     .var("key", "bolts")
    ///     .exec()
    ///     .await?;
    /// # Ok(()) }
    /// ```
    pub fn query(&self, code: impl Into<String>) -> QueryRequest<'_> {
        QueryRequest {
            client: self,
            code: code.into(),
            scope: None,
            timeout: None,
            vars: BTreeMap::new(),
        }
    }

    /// Starts a stored-procedure call. Positional and named arguments
    /// are mutually exclusive.
    pub fn run(&self, procedure: impl Into<String>) -> RunRequest<'_> {
        RunRequest {
            client: self,
            procedure: procedure.into(),
            scope: None,
            timeout: None,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }

    /// Liveness check against the current node.
    pub async fn ping(&self, timeout: Option<Duration>) -> Result<()> {
        self.request_ready(Proto::Ping, Value::Nil, timeout).await?;
        Ok(())
    }

    // -- State ------------------------------------------------------------

    /// `true` while a socket is up (authenticated or not).
    pub fn is_connected(&self) -> bool {
        self.current_conn().is_some_and(|conn| !conn.is_closed())
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.inner.lifecycle.state()
    }

    /// Waits until the client is ready for requests (e.g. a pending
    /// reconnect finished). Fails with [`Error::Closed`] when the
    /// client closes first.
    pub async fn wait_ready(&self) -> Result<()> {
        self.inner.lifecycle.wait_ready().await
    }

    /// The current node's address, or `"disconnected"`.
    pub fn connection_info(&self) -> String {
        match self.current_conn() {
            Some(conn) if !conn.is_closed() => conn.peer_addr(),
            _ => "disconnected".to_owned(),
        }
    }

    /// The scope used by requests that do not name one. (Also part of
    /// the [`Driver`] seam; kept inherent so callers need no trait
    /// import.)
    pub fn default_scope(&self) -> String {
        self.inner.scope.lock().expect("scope lock poisoned").clone()
    }

    /// Changes the default scope. Scope strings start with `@` or `/`.
    pub fn set_default_scope(&self, scope: impl Into<String>) -> Result<()> {
        let scope = scope.into();
        if !scope.starts_with('@') && !scope.starts_with('/') {
            return Err(Error::Usage(format!(
                "invalid scope `{scope}`: must start with `@` or `/`"
            )));
        }
        *self.inner.scope.lock().expect("scope lock poisoned") = scope;
        Ok(())
    }

    /// The (scope, room id) pairs currently registered for events.
    pub fn joined_rooms(&self) -> Vec<(String, u64)> {
        self.inner
            .registry
            .rejoin_targets()
            .into_iter()
            .flat_map(|(scope, ids)| {
                ids.into_iter().map(move |id| (scope.clone(), id))
            })
            .collect()
    }

    /// Closes the client. Returns quickly; use
    /// [`wait_closed`](Self::wait_closed) to await the teardown.
    /// A closed client is terminal and must be recreated.
    pub async fn close(&self) {
        self.inner.auto_reconnect.store(false, Ordering::SeqCst);
        if self.inner.lifecycle.state().is_closed() {
            return;
        }
        self.inner.lifecycle.set(ConnState::Closing);
        let conn = self.current_conn();
        match conn {
            // The reader task observes EOF and finishes the teardown;
            // the lost-hook moves Closing to Closed.
            Some(conn) => conn.close().await,
            None => {
                self.inner.lifecycle.set(ConnState::Closed);
            }
        }
    }

    /// Waits until the close teardown has completed.
    pub async fn wait_closed(&self) {
        self.inner.lifecycle.wait_closed().await;
    }

    // -- Internals --------------------------------------------------------

    fn check_fresh(&self) -> Result<()> {
        if self.inner.lifecycle.state().is_closed() {
            return Err(Error::Closed);
        }
        if self.is_connected() {
            return Err(Error::Usage(
                "already connected; close first or use reconnect()".into(),
            ));
        }
        Ok(())
    }

    fn current_conn(&self) -> Option<Arc<Conn<Socket>>> {
        self.inner.conn.lock().expect("conn lock poisoned").clone()
    }

    /// Sends a request, failing fast when the connection is not ready.
    async fn request_ready(
        &self,
        tp: Proto,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let state = self.inner.lifecycle.state();
        if !state.is_ready() {
            return Err(if state.is_closed() {
                Error::Closed
            } else {
                Error::NotConnected
            });
        }
        let conn = self.current_conn().ok_or(Error::NotConnected)?;
        conn.request(tp, body, timeout).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("peer", &self.connection_info())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

/// A query being built; run it with [`exec`](Self::exec).
#[must_use = "a query does nothing until exec() is awaited"]
pub struct QueryRequest<'a> {
    client: &'a Client,
    code: String,
    scope: Option<String>,
    timeout: Option<Duration>,
    vars: BTreeMap<String, Value>,
}

impl QueryRequest<'_> {
    /// Evaluates in this scope instead of the client default.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Fails with a timeout error when no response arrives in time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Injects a variable into the code.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Sends the query and awaits its result.
    pub async fn exec(self) -> Result<Value> {
        let scope = self
            .scope
            .unwrap_or_else(|| self.client.default_scope());
        let mut payload = vec![
            Value::Str(scope),
            Value::Str(self.code.trim().to_owned()),
        ];
        if !self.vars.is_empty() {
            payload.push(Value::Map(self.vars));
        }
        self.client
            .request_ready(Proto::Query, Value::List(payload), self.timeout)
            .await
    }
}

/// A stored-procedure call being built; run it with
/// [`exec`](Self::exec).
#[must_use = "a procedure call does nothing until exec() is awaited"]
pub struct RunRequest<'a> {
    client: &'a Client,
    procedure: String,
    scope: Option<String>,
    timeout: Option<Duration>,
    args: Vec<Value>,
    kwargs: BTreeMap<String, Value>,
}

impl RunRequest<'_> {
    /// Runs in this scope instead of the client default.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Fails with a timeout error when no response arrives in time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Sets a named argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Sends the call and awaits its result.
    pub async fn exec(self) -> Result<Value> {
        if !self.args.is_empty() && !self.kwargs.is_empty() {
            return Err(Error::Usage(
                "positional and named procedure arguments cannot be \
                 combined in one call"
                    .into(),
            ));
        }
        let scope = self
            .scope
            .unwrap_or_else(|| self.client.default_scope());
        let mut payload = vec![Value::Str(scope), Value::Str(self.procedure)];
        if !self.args.is_empty() {
            payload.push(Value::List(self.args));
        } else if !self.kwargs.is_empty() {
            payload.push(Value::Map(self.kwargs));
        }
        self.client
            .request_ready(Proto::Run, Value::List(payload), self.timeout)
            .await
    }
}

// ---------------------------------------------------------------------------
// Driver (the collaborator seam rooms and add-ons use)
// ---------------------------------------------------------------------------

impl Driver for Client {
    fn default_scope(&self) -> String {
        self.inner.scope.lock().expect("scope lock poisoned").clone()
    }

    fn is_connected(&self) -> bool {
        Client::is_connected(self)
    }

    fn rooms(&self) -> Arc<RoomRegistry> {
        self.inner.registry.clone()
    }

    async fn query_raw(
        &self,
        scope: &str,
        code: &str,
        vars: Option<BTreeMap<String, Value>>,
    ) -> Result<Value> {
        let mut request = self.query(code).scope(scope);
        if let Some(vars) = vars {
            request.vars = vars;
        }
        request.exec().await
    }

    async fn join_rooms(&self, scope: &str, ids: &[u64]) -> Result<Vec<Option<u64>>> {
        let reply = self
            .request_ready(Proto::Join, room_ids_payload(scope, ids), None)
            .await?;
        Ok(ids_reply(&reply, ids.len()))
    }

    async fn leave_rooms(&self, scope: &str, ids: &[u64]) -> Result<Vec<Option<u64>>> {
        let reply = self
            .request_ready(Proto::Leave, room_ids_payload(scope, ids), None)
            .await?;
        Ok(ids_reply(&reply, ids.len()))
    }

    async fn emit_event(
        &self,
        scope: &str,
        room_id: u64,
        event: &str,
        args: &[Value],
    ) -> Result<()> {
        let mut payload = vec![
            Value::Str(scope.to_owned()),
            Value::Int(room_id as i64),
            Value::Str(event.to_owned()),
        ];
        payload.extend(args.iter().cloned());
        self.request_ready(Proto::Emit, Value::List(payload), None)
            .await?;
        Ok(())
    }
}

/// `[scope, id, id, ...]`
fn room_ids_payload(scope: &str, ids: &[u64]) -> Value {
    let mut payload = vec![Value::Str(scope.to_owned())];
    payload.extend(ids.iter().map(|id| Value::Int(*id as i64)));
    Value::List(payload)
}

/// Decodes a join/leave reply: a list mirroring the requested ids,
/// nil where the server does not know the room.
fn ids_reply(reply: &Value, expected: usize) -> Vec<Option<u64>> {
    match reply.as_list() {
        Some(items) => items
            .iter()
            .map(|v| v.as_int().filter(|id| *id >= 0).map(|id| id as u64))
            .collect(),
        None => {
            tracing::warn!(%reply, "malformed join/leave reply");
            vec![None; expected]
        }
    }
}

// ---------------------------------------------------------------------------
// Connection supervision
// ---------------------------------------------------------------------------

/// The hook a [`Conn`] fires when its teardown path completes.
fn lost_hook(inner: &Arc<ClientInner>) -> LostHook {
    let weak = Arc::downgrade(inner);
    Box::new(move |conn_id, reason| {
        if let Some(inner) = weak.upgrade() {
            on_connection_lost(inner, conn_id, reason);
        }
    })
}

fn on_connection_lost(inner: Arc<ClientInner>, conn_id: ConnectionId, reason: String) {
    // Only the current connection matters; a replaced socket dying
    // late must not disturb its successor.
    {
        let mut slot = inner.conn.lock().expect("conn lock poisoned");
        let is_current = slot.as_ref().is_some_and(|conn| conn.id() == conn_id);
        if !is_current {
            return;
        }
        slot.take();
    }
    tracing::warn!(%conn_id, %reason, "connection lost");
    inner.registry.suspend_all();

    match inner.lifecycle.state() {
        ConnState::Closing | ConnState::Closed => {
            inner.lifecycle.set(ConnState::Closed);
        }
        _ if inner.auto_reconnect.load(Ordering::SeqCst) => {
            inner.lifecycle.set(ConnState::Reconnecting);
            tokio::spawn(spawn_reconnect(inner.clone()));
        }
        _ => {
            inner.lifecycle.set(ConnState::Disconnected);
        }
    }
}

/// Guarded background entry into the reconnect loop (used by the
/// supervision paths; `Client::reconnect` is the foreground entry).
async fn spawn_reconnect(inner: Arc<ClientInner>) {
    if inner.reconnecting.swap(true, Ordering::SeqCst) {
        return; // an attempt is already in flight
    }
    let result = reconnect_loop(inner.clone()).await;
    inner.reconnecting.store(false, Ordering::SeqCst);
    if let Err(err) = result {
        tracing::error!(%err, "reconnect abandoned");
    }
}

/// The reconnect loop: per sweep, shuffle the candidates once and try
/// each in order; sleep with doubling backoff between sweeps; keep
/// sweeping for as long as auto-reconnect stays enabled.
async fn reconnect_loop(inner: Arc<ClientInner>) -> Result<()> {
    let mut wait = Duration::from_secs(1);
    let mut dial_timeout = PROBE_TIMEOUT;

    loop {
        if inner.lifecycle.state().is_closed() {
            return Err(Error::Closed);
        }
        inner.lifecycle.set(ConnState::Reconnecting);

        // Drop whatever connection is still around (possibly healthy,
        // when failing over away from a shutting-down node).
        let old = inner.conn.lock().expect("conn lock poisoned").take();
        if let Some(old) = old {
            old.close().await;
        }

        let mut nodes = inner.pool.lock().expect("pool lock poisoned").clone();
        if nodes.is_empty() {
            return Err(Error::Usage("no nodes configured; connect first".into()));
        }
        nodes.shuffle(&mut rand::rng());

        let mut last_err: Option<Error> = None;
        for node in &nodes {
            match establish(&inner, node, dial_timeout).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_auth() => {
                    // Bad credentials will not get better on another
                    // node or a later sweep: close out.
                    tracing::error!(%node, %err, "authentication rejected, giving up");
                    let taken = inner.conn.lock().expect("conn lock poisoned").take();
                    if let Some(conn) = taken {
                        conn.close().await;
                    }
                    inner.lifecycle.set(ConnState::Closed);
                    return Err(map_auth_err(err));
                }
                Err(err) => {
                    tracing::warn!(%node, %err, "candidate node failed");
                    // A dial that got as far as spawning a connection
                    // must not leak it while we move on.
                    let taken = inner.conn.lock().expect("conn lock poisoned").take();
                    if let Some(conn) = taken {
                        conn.close().await;
                    }
                    last_err = Some(err);
                }
            }
        }

        if !inner.auto_reconnect.load(Ordering::SeqCst) {
            inner.lifecycle.set(ConnState::Disconnected);
            let detail = last_err
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no candidate node reachable".to_owned());
            return Err(Error::Connect(detail));
        }

        tracing::warn!(
            wait_secs = wait.as_secs(),
            "all candidate nodes failed; next sweep after backoff"
        );
        tokio::time::sleep(wait).await;
        wait = (wait * 2).min(inner.config.max_reconnect_wait);
        dial_timeout =
            (dial_timeout + Duration::from_secs(1)).min(inner.config.max_connect_timeout);
    }
}

/// One full establish attempt against one node: dial, probe,
/// re-authenticate, go ready, kick off the room rejoin pass.
async fn establish(
    inner: &Arc<ClientInner>,
    node: &Node,
    dial_timeout: Duration,
) -> Result<()> {
    inner.lifecycle.set(ConnState::Connecting);
    let socket = Socket::connect(node, inner.config.secure, dial_timeout).await?;
    let conn = Conn::spawn(socket, inner.event_tx.clone(), lost_hook(inner));
    *inner.conn.lock().expect("conn lock poisoned") = Some(conn.clone());
    inner.lifecycle.set(ConnState::Connected);

    conn.request(Proto::Ping, Value::Nil, Some(PROBE_TIMEOUT)).await?;

    let auth = inner.auth.lock().expect("auth lock poisoned").clone();
    if let Some(auth) = auth {
        inner.lifecycle.set(ConnState::Authenticating);
        conn.request(
            Proto::Auth,
            auth.to_payload(),
            Some(inner.config.auth_timeout),
        )
        .await?;
    }

    inner.lifecycle.set(ConnState::Ready);
    tracing::info!(%node, "connection ready");

    // Rejoin previously joined rooms without blocking the transition.
    tokio::spawn(rejoin_rooms(inner.clone()));
    Ok(())
}

/// Re-establishes room membership after a reconnect: one join request
/// per scope, covering every registered room id. The rooms' own
/// `on_join` hooks run when the server pushes the confirmations.
async fn rejoin_rooms(inner: Arc<ClientInner>) {
    let targets = inner.registry.rejoin_targets();
    if targets.is_empty() {
        return;
    }
    let Some(conn) = inner.conn.lock().expect("conn lock poisoned").clone() else {
        return;
    };
    for (scope, ids) in targets {
        match conn
            .request(Proto::Join, room_ids_payload(&scope, &ids), None)
            .await
        {
            Ok(_) => {
                tracing::info!(%scope, count = ids.len(), "rejoined rooms");
            }
            Err(err) => {
                tracing::warn!(%scope, %err, "room rejoin failed");
            }
        }
    }
}

/// Narrows auth-classed failures onto [`Error::Auth`].
fn map_auth_err(err: Error) -> Error {
    if err.is_auth() {
        Error::Auth(err.to_string())
    } else {
        err
    }
}

// ---------------------------------------------------------------------------
// Event dispatch
// ---------------------------------------------------------------------------

/// The dispatcher task: consumes every server-pushed event from the
/// current connection (whichever it is) and routes room events through
/// the registry. Ends when the client is dropped.
async fn event_loop(
    inner: Weak<ClientInner>,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        match event.proto {
            Proto::NodeStatus => {
                let status = event
                    .data
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                let node_id = event.data.get("id").and_then(Value::as_int);
                tracing::debug!(?node_id, %status, "node status changed");
                if status == STATUS_SHUTTING_DOWN
                    && inner.auto_reconnect.load(Ordering::SeqCst)
                {
                    // Fail over proactively while the socket is still
                    // healthy, instead of waiting for it to die.
                    inner.lifecycle.set(ConnState::Reconnecting);
                    tokio::spawn(spawn_reconnect(inner.clone()));
                }
            }
            Proto::Warn => {
                let msg = event.data.get("warn_msg").and_then(Value::as_str);
                let code = event.data.get("warn_code").and_then(Value::as_int);
                tracing::warn!(?code, msg, "warning from server");
            }
            proto if proto.is_room_event() => {
                match event.data.get("id").and_then(Value::as_int) {
                    Some(id) if id >= 0 => {
                        if !inner.registry.route(id as u64, event) {
                            tracing::warn!(
                                room_id = id,
                                %proto,
                                "event for a room this client has not joined"
                            );
                        }
                    }
                    _ => {
                        tracing::warn!(%proto, "room event without a room id");
                    }
                }
            }
            proto => {
                tracing::warn!(%proto, "unexpected event type");
            }
        }
    }
}

