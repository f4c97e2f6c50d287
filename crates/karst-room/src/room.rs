//! Room: a handle on one server-side pub-sub channel.
//!
//! A room is built once (handlers and hooks are fixed at construction,
//! resolved at dispatch by name lookup), joined against a client, and
//! then receives its events through a dedicated dispatch task. The
//! task consumes signals in arrival order, so events for one room are
//! handled in server-emission order and a slow handler stalls only its
//! own room.
//!
//! Hook semantics:
//! - `on_init` runs exactly once per `Room` instance, on the first
//!   successful join — never again after a reconnect.
//! - `on_join` runs on every join confirmation, including rejoins.
//! - `on_leave` / `on_delete` run when the server confirms the leave
//!   or deletes the room.
//! - named event handlers receive matching emits; everything else
//!   falls through to the default handler.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use karst_protocol::{Proto, Value};
use karst_session::{Error, Result};
use tokio::sync::{mpsc, oneshot};

use crate::registry::{RoomSignal, RoomTx};
use crate::{Driver, RoomRegistry};

// ---------------------------------------------------------------------------
// References and state
// ---------------------------------------------------------------------------

/// How a room is referred to before it is bound to a server-side id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomRef {
    /// A literal room id.
    Id(u64),
    /// A room name, looked up server-side.
    Name(String),
    /// Code that evaluates to a room id.
    Code(String),
}

/// `true` for identifier-shaped strings (a room name as opposed to
/// code): `[A-Za-z_][0-9A-Za-z_]*`, at most 255 characters.
fn is_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 255 {
        return false;
    }
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl From<u64> for RoomRef {
    fn from(id: u64) -> Self {
        RoomRef::Id(id)
    }
}

impl From<&str> for RoomRef {
    fn from(s: &str) -> Self {
        if is_name(s) {
            RoomRef::Name(s.to_owned())
        } else {
            RoomRef::Code(s.to_owned())
        }
    }
}

impl From<String> for RoomRef {
    fn from(s: String) -> Self {
        RoomRef::from(s.as_str())
    }
}

/// The lifecycle state of a room handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Constructed; not associated with a connection.
    Unbound,
    /// Resolving the reference to a server-side id.
    Resolving,
    /// Membership confirmed; events flow.
    Joined,
    /// The connection dropped; awaiting rejoin. Handlers survive.
    Suspended,
    /// A leave request was sent; awaiting the confirmation push.
    Leaving,
    /// The server confirmed the leave.
    Left,
    /// The room was deleted server-side. Further operations fail.
    Dropped,
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoomState::Unbound => "unbound",
            RoomState::Resolving => "resolving",
            RoomState::Joined => "joined",
            RoomState::Suspended => "suspended",
            RoomState::Leaving => "leaving",
            RoomState::Left => "left",
            RoomState::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Handler types
// ---------------------------------------------------------------------------

/// Handler for one named event.
pub type EventHandler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Fallback handler for events without a named handler.
pub type AnyEventHandler = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

type Hook = Arc<dyn Fn() + Send + Sync>;
type JoinHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

struct RoomCore {
    reference: RoomRef,
    scope: Mutex<Option<String>>,
    id: Mutex<Option<u64>>,
    state: Mutex<RoomState>,
    init_done: AtomicBool,
    wait_join: Mutex<Option<oneshot::Sender<()>>>,
    route_tx: Mutex<Option<RoomTx>>,
    pending_rx: Mutex<Option<mpsc::UnboundedReceiver<RoomSignal>>>,
    handlers: HashMap<String, EventHandler>,
    on_any: AnyEventHandler,
    on_init: Option<Hook>,
    on_join: Option<JoinHook>,
    on_leave: Option<Hook>,
    on_delete: Option<Hook>,
}

impl RoomCore {
    fn set_state(&self, next: RoomState) {
        *self.state.lock().expect("room state lock poisoned") = next;
    }

    fn state(&self) -> RoomState {
        *self.state.lock().expect("room state lock poisoned")
    }
}

/// A handle on one server-side room. Cheap to clone; clones share
/// state and handlers.
#[derive(Clone)]
pub struct Room {
    core: Arc<RoomCore>,
}

impl Room {
    /// Starts building a room from a reference: a literal id, a room
    /// name, or code evaluating to an id.
    pub fn builder(reference: impl Into<RoomRef>) -> RoomBuilder {
        RoomBuilder {
            reference: reference.into(),
            scope: None,
            handlers: HashMap::new(),
            on_any: None,
            on_init: None,
            on_join: None,
            on_leave: None,
            on_delete: None,
        }
    }

    /// A room with no handlers (events land in the default handler).
    pub fn new(reference: impl Into<RoomRef>) -> Self {
        Self::builder(reference).build()
    }

    /// The bound server-side id, once resolved.
    pub fn id(&self) -> Option<u64> {
        *self.core.id.lock().expect("room id lock poisoned")
    }

    /// The scope this room binds to, once fixed (at first join or
    /// resolve).
    pub fn scope(&self) -> Option<String> {
        self.core.scope.lock().expect("room scope lock poisoned").clone()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> RoomState {
        self.core.state()
    }

    /// `true` while membership is confirmed on a live connection.
    pub fn is_joined(&self) -> bool {
        self.state() == RoomState::Joined
    }

    /// Joins the room.
    ///
    /// Resolves the reference (a name or code reference costs one
    /// query round-trip; a literal or previously bound id does not),
    /// sends the join request, and registers this room for event
    /// delivery. With a nonzero `wait`, blocks until the first
    /// `on_join` hook completes or the wait expires; with `None` or a
    /// zero duration, returns as soon as membership is confirmed.
    pub async fn join<D: Driver>(
        &self,
        driver: &D,
        wait: Option<Duration>,
    ) -> Result<()> {
        if self.state() == RoomState::Dropped {
            return Err(Error::Lookup("room was deleted server-side".into()));
        }
        let scope = self.bind_scope(driver);
        self.core.set_state(RoomState::Resolving);

        let id = match self.id() {
            Some(id) => id,
            None => match self.resolve_reference(driver, &scope).await {
                Ok(id) => id,
                Err(err) => {
                    self.core.set_state(RoomState::Unbound);
                    return Err(err);
                }
            },
        };

        // The route must exist before the join request goes out: the
        // join confirmation is pushed right behind the reply and would
        // otherwise race the registration. Same for the first-join
        // waiter.
        let tx = self.route_sender();
        let registry = driver.rooms();
        registry.bind(&scope, id, tx);

        let waiter = match wait {
            Some(limit) if !limit.is_zero() => {
                let (tx, rx) = oneshot::channel();
                *self.core.wait_join.lock().expect("wait lock poisoned") = Some(tx);
                Some((limit, rx))
            }
            _ => None,
        };

        let confirmed = match driver.join_rooms(&scope, &[id]).await {
            Ok(ids) => ids.first().copied().flatten(),
            Err(err) => {
                self.abort_join(&registry, &scope, id);
                return Err(err);
            }
        };
        if confirmed.is_none() {
            self.abort_join(&registry, &scope, id);
            return Err(Error::Lookup(format!("room with id {id} not found")));
        }

        *self.core.id.lock().expect("room id lock poisoned") = Some(id);
        self.core.set_state(RoomState::Joined);
        tracing::debug!(%scope, id, "room joined");

        // One-time initialization; never repeated across rejoins. Runs
        // before the dispatch task starts, so it precedes on_join.
        if !self.core.init_done.swap(true, Ordering::SeqCst) {
            if let Some(hook) = &self.core.on_init {
                hook();
            }
        }
        self.spawn_dispatch(registry);

        if let Some((limit, rx)) = waiter {
            match tokio::time::timeout(limit, rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Err(Error::Lookup(
                        "room ended before the join completed".into(),
                    ));
                }
                Err(_) => return Err(Error::Timeout(limit)),
            }
        }
        Ok(())
    }

    /// Binds the reference to an id without joining — for rooms used
    /// only to emit events. Verifies the id names a room.
    pub async fn resolve<D: Driver>(&self, driver: &D) -> Result<u64> {
        let scope = self.bind_scope(driver);
        let id = self.resolve_reference(driver, &scope).await?;

        let mut vars = BTreeMap::new();
        vars.insert("id".to_owned(), Value::Int(id as i64));
        let ok = driver
            .query_raw(&scope, "!is_err(try(room(id)));", Some(vars))
            .await?;
        if ok.as_bool() != Some(true) {
            return Err(Error::Lookup(format!("id {id} is not a room")));
        }

        *self.core.id.lock().expect("room id lock poisoned") = Some(id);
        Ok(id)
    }

    /// Leaves the room. The state flips to [`RoomState::Left`] when
    /// the server's confirmation push arrives, not when this returns.
    ///
    /// Fails with [`Error::Lookup`] when the server no longer knows
    /// the room.
    pub async fn leave<D: Driver>(&self, driver: &D) -> Result<()> {
        let (scope, id) = self.bound()?;
        let previous = self.state();
        if previous == RoomState::Dropped {
            return Err(Error::Lookup("room was deleted server-side".into()));
        }
        self.core.set_state(RoomState::Leaving);

        match driver.leave_rooms(&scope, &[id]).await {
            Ok(ids) if ids.first().copied().flatten().is_some() => Ok(()),
            Ok(_) => {
                self.core.set_state(previous);
                Err(Error::Lookup(format!("room id {id} is not found (anymore)")))
            }
            Err(err) => {
                self.core.set_state(previous);
                Err(err)
            }
        }
    }

    /// Emits a fire-and-forget event to the room. Requires the room to
    /// be bound first (via [`join`](Self::join) or
    /// [`resolve`](Self::resolve)).
    pub async fn emit<D: Driver>(
        &self,
        driver: &D,
        event: &str,
        args: &[Value],
    ) -> Result<()> {
        let (scope, id) = self.bound()?;
        if self.state() == RoomState::Dropped {
            return Err(Error::Lookup("room was deleted server-side".into()));
        }
        driver.emit_event(&scope, id, event, args).await
    }

    // -- internals --------------------------------------------------------

    fn bind_scope<D: Driver>(&self, driver: &D) -> String {
        let mut slot = self.core.scope.lock().expect("room scope lock poisoned");
        slot.get_or_insert_with(|| driver.default_scope()).clone()
    }

    fn bound(&self) -> Result<(String, u64)> {
        let id = self.id().ok_or_else(|| {
            Error::Usage("room is not bound; call join() or resolve() first".into())
        })?;
        let scope = self.scope().ok_or_else(|| {
            Error::Usage("room has no scope; call join() or resolve() first".into())
        })?;
        Ok((scope, id))
    }

    async fn resolve_reference<D: Driver>(
        &self,
        driver: &D,
        scope: &str,
    ) -> Result<u64> {
        match &self.core.reference {
            RoomRef::Id(id) => Ok(*id),
            RoomRef::Name(name) => {
                let mut vars = BTreeMap::new();
                vars.insert("name".to_owned(), Value::Str(name.clone()));
                let value = driver
                    .query_raw(scope, "room(name).id();", Some(vars))
                    .await?;
                value
                    .as_int()
                    .filter(|i| *i >= 0)
                    .map(|i| i as u64)
                    .ok_or_else(|| {
                        Error::Lookup(format!("room named `{name}` not found"))
                    })
            }
            RoomRef::Code(code) => {
                let value = driver.query_raw(scope, code, None).await?;
                value
                    .as_int()
                    .filter(|i| *i >= 0)
                    .map(|i| i as u64)
                    .ok_or_else(|| {
                        Error::Usage(format!(
                            "expecting code `{code}` to return a room id \
                             (integer value), got {value}"
                        ))
                    })
            }
        }
    }

    /// Returns the live signal sender, creating the channel when none
    /// exists yet (the matching receiver is parked until the dispatch
    /// task starts, buffering signals in order).
    fn route_sender(&self) -> RoomTx {
        let mut slot = self.core.route_tx.lock().expect("route lock poisoned");
        if let Some(tx) = slot.as_ref() {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *slot = Some(tx.clone());
        *self.core.pending_rx.lock().expect("route lock poisoned") = Some(rx);
        tx
    }

    fn spawn_dispatch(&self, registry: Arc<RoomRegistry>) {
        let Some(rx) = self
            .core
            .pending_rx
            .lock()
            .expect("route lock poisoned")
            .take()
        else {
            return; // task already running (rejoin on the same instance)
        };
        tokio::spawn(dispatch_loop(self.core.clone(), registry, rx));
    }

    fn abort_join(&self, registry: &RoomRegistry, scope: &str, id: u64) {
        registry.unbind(scope, id);
        *self.core.wait_join.lock().expect("wait lock poisoned") = None;
        self.core.set_state(RoomState::Unbound);
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("reference", &self.core.reference)
            .field("id", &self.id())
            .field("scope", &self.scope())
            .field("state", &self.state())
            .finish()
    }
}

/// The per-room dispatch task. Consumes signals in order; ends when
/// the room is left or deleted.
async fn dispatch_loop(
    core: Arc<RoomCore>,
    registry: Arc<RoomRegistry>,
    mut rx: mpsc::UnboundedReceiver<RoomSignal>,
) {
    while let Some(signal) = rx.recv().await {
        match signal {
            RoomSignal::Suspended => {
                if core.state() == RoomState::Joined {
                    core.set_state(RoomState::Suspended);
                }
            }
            RoomSignal::Push(event) => match event.proto {
                Proto::RoomJoin => {
                    core.set_state(RoomState::Joined);
                    if let Some(hook) = &core.on_join {
                        // Awaited here: later events queue up behind
                        // the join hook instead of racing it.
                        hook().await;
                    }
                    let waiter =
                        core.wait_join.lock().expect("wait lock poisoned").take();
                    if let Some(tx) = waiter {
                        let _ = tx.send(());
                    }
                }
                Proto::RoomEmit => {
                    let name = event
                        .data
                        .get("event")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned();
                    let args: Vec<Value> = event
                        .data
                        .get("args")
                        .and_then(Value::as_list)
                        .map(<[Value]>::to_vec)
                        .unwrap_or_default();
                    match core.handlers.get(&name) {
                        Some(handler) => handler(&args),
                        None => (core.on_any)(&name, &args),
                    }
                }
                Proto::RoomLeave => {
                    finish_room(&core, &registry, RoomState::Left);
                    if let Some(hook) = &core.on_leave {
                        hook();
                    }
                    break;
                }
                Proto::RoomDelete => {
                    finish_room(&core, &registry, RoomState::Dropped);
                    if let Some(hook) = &core.on_delete {
                        hook();
                    }
                    break;
                }
                other => {
                    tracing::warn!(%other, "unexpected event type for a room");
                }
            },
        }
    }
}

/// Terminal cleanup shared by leave and delete: unregister, drop the
/// channel so a future join starts fresh, record the final state.
fn finish_room(core: &RoomCore, registry: &RoomRegistry, state: RoomState) {
    if let (Some(scope), Some(id)) = (
        core.scope.lock().expect("room scope lock poisoned").clone(),
        *core.id.lock().expect("room id lock poisoned"),
    ) {
        registry.unbind(&scope, id);
    }
    *core.route_tx.lock().expect("route lock poisoned") = None;
    *core.pending_rx.lock().expect("route lock poisoned") = None;
    core.set_state(state);
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds a [`Room`]: handlers and hooks are fixed here, resolved at
/// dispatch time by event-name lookup.
pub struct RoomBuilder {
    reference: RoomRef,
    scope: Option<String>,
    handlers: HashMap<String, EventHandler>,
    on_any: Option<AnyEventHandler>,
    on_init: Option<Hook>,
    on_join: Option<JoinHook>,
    on_leave: Option<Hook>,
    on_delete: Option<Hook>,
}

impl RoomBuilder {
    /// Pins the room to a scope instead of the client default.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Registers a handler for one event name.
    pub fn on_event(
        mut self,
        name: impl Into<String>,
        handler: impl Fn(&[Value]) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Replaces the default handler for unmatched event names.
    pub fn on_any(
        mut self,
        handler: impl Fn(&str, &[Value]) + Send + Sync + 'static,
    ) -> Self {
        self.on_any = Some(Arc::new(handler));
        self
    }

    /// One-time initialization hook: first successful join only.
    pub fn on_init(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_init = Some(Arc::new(hook));
        self
    }

    /// Join hook: every join confirmation, including rejoins.
    pub fn on_join<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_join = Some(Arc::new(move || Box::pin(hook()) as BoxFuture<'static, ()>));
        self
    }

    /// Leave hook.
    pub fn on_leave(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_leave = Some(Arc::new(hook));
        self
    }

    /// Deletion hook: the server removed the room.
    pub fn on_delete(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Arc::new(hook));
        self
    }

    /// Finalizes the room.
    pub fn build(self) -> Room {
        Room {
            core: Arc::new(RoomCore {
                reference: self.reference,
                scope: Mutex::new(self.scope),
                id: Mutex::new(None),
                state: Mutex::new(RoomState::Unbound),
                init_done: AtomicBool::new(false),
                wait_join: Mutex::new(None),
                route_tx: Mutex::new(None),
                pending_rx: Mutex::new(None),
                handlers: self.handlers,
                on_any: self.on_any.unwrap_or_else(|| {
                    Arc::new(|event, _args| {
                        tracing::debug!(event, "unhandled room event");
                    })
                }),
                on_init: self.on_init,
                on_join: self.on_join,
                on_leave: self.on_leave,
                on_delete: self.on_delete,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karst_session::Event;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    // =====================================================================
    // Mock driver: canned replies, recorded calls.
    // =====================================================================

    struct MockDriver {
        registry: Arc<RoomRegistry>,
        query_replies: Mutex<VecDeque<Result<Value>>>,
        join_reply: Mutex<Vec<Option<u64>>>,
        leave_reply: Mutex<Vec<Option<u64>>>,
        emits: Mutex<Vec<(String, u64, String)>>,
        joins: Mutex<Vec<(String, Vec<u64>)>>,
    }

    impl MockDriver {
        fn new() -> Self {
            Self {
                registry: Arc::new(RoomRegistry::new()),
                query_replies: Mutex::new(VecDeque::new()),
                join_reply: Mutex::new(vec![Some(7)]),
                leave_reply: Mutex::new(vec![Some(7)]),
                emits: Mutex::new(Vec::new()),
                joins: Mutex::new(Vec::new()),
            }
        }

        fn queue_query(&self, reply: Result<Value>) {
            self.query_replies.lock().unwrap().push_back(reply);
        }

        fn set_join_reply(&self, reply: Vec<Option<u64>>) {
            *self.join_reply.lock().unwrap() = reply;
        }

        fn set_leave_reply(&self, reply: Vec<Option<u64>>) {
            *self.leave_reply.lock().unwrap() = reply;
        }

        /// Pushes a room event the way the client dispatcher would.
        fn push(&self, room_id: u64, proto: Proto, data: Value) -> bool {
            self.registry.route(room_id, Event { proto, data })
        }
    }

    impl Driver for MockDriver {
        fn default_scope(&self) -> String {
            "@:test".into()
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn rooms(&self) -> Arc<RoomRegistry> {
            self.registry.clone()
        }

        async fn query_raw(
            &self,
            _scope: &str,
            _code: &str,
            _vars: Option<BTreeMap<String, Value>>,
        ) -> Result<Value> {
            self.query_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Value::Nil))
        }

        async fn join_rooms(
            &self,
            scope: &str,
            ids: &[u64],
        ) -> Result<Vec<Option<u64>>> {
            self.joins
                .lock()
                .unwrap()
                .push((scope.to_owned(), ids.to_vec()));
            Ok(self.join_reply.lock().unwrap().clone())
        }

        async fn leave_rooms(
            &self,
            _scope: &str,
            _ids: &[u64],
        ) -> Result<Vec<Option<u64>>> {
            Ok(self.leave_reply.lock().unwrap().clone())
        }

        async fn emit_event(
            &self,
            scope: &str,
            room_id: u64,
            event: &str,
            _args: &[Value],
        ) -> Result<()> {
            self.emits.lock().unwrap().push((
                scope.to_owned(),
                room_id,
                event.to_owned(),
            ));
            Ok(())
        }
    }

    fn emit_data(event: &str, args: Vec<Value>) -> Value {
        let mut m = BTreeMap::new();
        m.insert("id".to_owned(), Value::Int(7));
        m.insert("event".to_owned(), Value::Str(event.into()));
        m.insert("args".to_owned(), Value::List(args));
        Value::Map(m)
    }

    async fn settle() {
        // Let the dispatch task drain its queue.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    // =====================================================================
    // References
    // =====================================================================

    #[test]
    fn test_room_ref_classification() {
        assert_eq!(RoomRef::from(7u64), RoomRef::Id(7));
        assert_eq!(RoomRef::from("chat_room"), RoomRef::Name("chat_room".into()));
        assert_eq!(
            RoomRef::from(".chat.id();"),
            RoomRef::Code(".chat.id();".into())
        );
        assert_eq!(RoomRef::from("9lives"), RoomRef::Code("9lives".into()));
    }

    #[test]
    fn test_is_name_rules() {
        assert!(is_name("room_1"));
        assert!(is_name("_private"));
        assert!(!is_name(""));
        assert!(!is_name("1room"));
        assert!(!is_name("has space"));
        assert!(!is_name(&"x".repeat(256)));
    }

    // =====================================================================
    // Join
    // =====================================================================

    #[tokio::test]
    async fn test_join_literal_id_runs_on_init_once() {
        let driver = MockDriver::new();
        let inits = Arc::new(AtomicUsize::new(0));
        let room = Room::builder(7u64)
            .on_init({
                let inits = inits.clone();
                move || {
                    inits.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();

        room.join(&driver, None).await.expect("join should succeed");
        assert_eq!(room.state(), RoomState::Joined);
        assert_eq!(room.id(), Some(7));
        assert_eq!(room.scope().as_deref(), Some("@:test"));

        // A second join on the same instance must not re-run on_init.
        room.join(&driver, None).await.expect("rejoin should succeed");
        assert_eq!(inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_join_unknown_id_is_lookup_error() {
        let driver = MockDriver::new();
        driver.set_join_reply(vec![None]);
        let room = Room::new(99u64);

        let err = room.join(&driver, None).await.unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
        assert_eq!(room.state(), RoomState::Unbound);
        assert!(driver.registry.is_empty(), "failed join must unbind");
    }

    #[tokio::test]
    async fn test_join_code_reference_resolves_via_query() {
        let driver = MockDriver::new();
        driver.queue_query(Ok(Value::Int(7)));
        let room = Room::new(".chat.id();");

        room.join(&driver, None).await.expect("join should succeed");
        assert_eq!(room.id(), Some(7));
        assert_eq!(
            driver.joins.lock().unwrap().as_slice(),
            &[("@:test".to_owned(), vec![7])]
        );
    }

    #[tokio::test]
    async fn test_join_code_returning_non_integer_is_usage_error() {
        let driver = MockDriver::new();
        driver.queue_query(Ok(Value::Str("not an id".into())));
        let room = Room::new(".chat;");

        let err = room.join(&driver, None).await.unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        assert_eq!(room.state(), RoomState::Unbound);
    }

    #[tokio::test]
    async fn test_join_wait_completes_when_join_event_arrives() {
        let driver = Arc::new(MockDriver::new());
        let joined = Arc::new(AtomicUsize::new(0));
        let room = Room::builder(7u64)
            .on_join({
                let joined = joined.clone();
                move || {
                    let joined = joined.clone();
                    async move {
                        joined.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
            .build();

        let join = tokio::spawn({
            let driver = driver.clone();
            let room = room.clone();
            async move { room.join(&*driver, Some(Duration::from_secs(5))).await }
        });

        // Wait for the join request to land, then push the
        // confirmation event the server would send.
        tokio::time::timeout(Duration::from_secs(1), async {
            while driver.joins.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("join request expected");
        settle().await;
        assert!(driver.push(7, Proto::RoomJoin, Value::Nil));

        join.await.unwrap().expect("join should succeed");
        assert_eq!(joined.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_join_wait_times_out_without_event() {
        let driver = MockDriver::new();
        let room = Room::new(7u64);

        let err = room
            .join(&driver, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        // Membership itself was confirmed; only the wait expired.
        assert_eq!(room.state(), RoomState::Joined);
    }

    // =====================================================================
    // Event dispatch
    // =====================================================================

    #[tokio::test]
    async fn test_named_handler_receives_args_exactly_once() {
        let driver = MockDriver::new();
        let received = Arc::new(Mutex::new(Vec::<Vec<Value>>::new()));
        let room = Room::builder(7u64)
            .on_event("msg", {
                let received = received.clone();
                move |args| received.lock().unwrap().push(args.to_vec())
            })
            .build();
        room.join(&driver, None).await.unwrap();

        assert!(driver.push(
            7,
            Proto::RoomEmit,
            emit_data("msg", vec![Value::Str("hi".into())]),
        ));
        settle().await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1, "handler must fire exactly once");
        assert_eq!(received[0], vec![Value::Str("hi".into())]);
    }

    #[tokio::test]
    async fn test_unmatched_event_falls_through_to_default_handler() {
        let driver = MockDriver::new();
        let fallthrough = Arc::new(Mutex::new(Vec::<String>::new()));
        let room = Room::builder(7u64)
            .on_event("msg", |_args| {})
            .on_any({
                let fallthrough = fallthrough.clone();
                move |event, _args| {
                    fallthrough.lock().unwrap().push(event.to_owned())
                }
            })
            .build();
        room.join(&driver, None).await.unwrap();

        driver.push(7, Proto::RoomEmit, emit_data("other", vec![]));
        settle().await;

        assert_eq!(fallthrough.lock().unwrap().as_slice(), &["other".to_owned()]);
    }

    #[tokio::test]
    async fn test_events_dispatch_in_emission_order() {
        let driver = MockDriver::new();
        let order = Arc::new(Mutex::new(Vec::<i64>::new()));
        let room = Room::builder(7u64)
            .on_event("tick", {
                let order = order.clone();
                move |args| {
                    if let Some(n) = args.first().and_then(Value::as_int) {
                        order.lock().unwrap().push(n);
                    }
                }
            })
            .build();
        room.join(&driver, None).await.unwrap();

        for n in 0..10i64 {
            driver.push(7, Proto::RoomEmit, emit_data("tick", vec![Value::Int(n)]));
        }
        settle().await;

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    // =====================================================================
    // Leave / delete
    // =====================================================================

    #[tokio::test]
    async fn test_leave_unknown_room_is_lookup_error() {
        let driver = MockDriver::new();
        driver.set_leave_reply(vec![None]);
        let room = Room::new(7u64);
        room.join(&driver, None).await.unwrap();

        let err = room.leave(&driver).await.unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
        assert_eq!(room.state(), RoomState::Joined, "state reverts on failure");
    }

    #[tokio::test]
    async fn test_leave_confirmation_push_finishes_the_room() {
        let driver = MockDriver::new();
        let left = Arc::new(AtomicUsize::new(0));
        let room = Room::builder(7u64)
            .on_leave({
                let left = left.clone();
                move || {
                    left.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();
        room.join(&driver, None).await.unwrap();

        room.leave(&driver).await.expect("leave should succeed");
        assert_eq!(room.state(), RoomState::Leaving);

        driver.push(7, Proto::RoomLeave, Value::Nil);
        settle().await;

        assert_eq!(room.state(), RoomState::Left);
        assert_eq!(left.load(Ordering::SeqCst), 1);
        assert!(driver.registry.is_empty());
    }

    #[tokio::test]
    async fn test_delete_push_drops_the_room() {
        let driver = MockDriver::new();
        let deleted = Arc::new(AtomicUsize::new(0));
        let room = Room::builder(7u64)
            .on_delete({
                let deleted = deleted.clone();
                move || {
                    deleted.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();
        room.join(&driver, None).await.unwrap();

        driver.push(7, Proto::RoomDelete, Value::Nil);
        settle().await;

        assert_eq!(room.state(), RoomState::Dropped);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);

        // Every further operation on a dropped room fails.
        let err = room.emit(&driver, "msg", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
        let err = room.join(&driver, None).await.unwrap_err();
        assert!(matches!(err, Error::Lookup(_)));
    }

    // =====================================================================
    // Emit
    // =====================================================================

    #[tokio::test]
    async fn test_emit_before_binding_is_usage_error() {
        let driver = MockDriver::new();
        let room = Room::new(7u64);
        let err = room.emit(&driver, "msg", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[tokio::test]
    async fn test_emit_after_join_reaches_driver() {
        let driver = MockDriver::new();
        let room = Room::new(7u64);
        room.join(&driver, None).await.unwrap();

        room.emit(&driver, "msg", &[Value::Str("hi".into())])
            .await
            .expect("emit should succeed");
        assert_eq!(
            driver.emits.lock().unwrap().as_slice(),
            &[("@:test".to_owned(), 7, "msg".to_owned())]
        );
    }

    // =====================================================================
    // Suspension / rejoin
    // =====================================================================

    #[tokio::test]
    async fn test_suspend_marks_room_and_rejoin_reuses_handlers() {
        let driver = MockDriver::new();
        let inits = Arc::new(AtomicUsize::new(0));
        let msgs = Arc::new(AtomicUsize::new(0));
        let room = Room::builder(7u64)
            .on_init({
                let inits = inits.clone();
                move || {
                    inits.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_event("msg", {
                let msgs = msgs.clone();
                move |_args| {
                    msgs.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build();
        room.join(&driver, None).await.unwrap();

        // The connection drops.
        driver.registry.suspend_all();
        settle().await;
        assert_eq!(room.state(), RoomState::Suspended);

        // Rejoin on the same instance: no second on_init, handlers
        // still registered and live.
        room.join(&driver, None).await.unwrap();
        assert_eq!(room.state(), RoomState::Joined);
        assert_eq!(inits.load(Ordering::SeqCst), 1);

        driver.push(7, Proto::RoomEmit, emit_data("msg", vec![]));
        settle().await;
        assert_eq!(msgs.load(Ordering::SeqCst), 1);
    }
}
