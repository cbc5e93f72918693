//! Signals
//!
//! A [`Signal`] is an ordered multicast list of connections. Emitting the
//! signal calls every connected slot, in connection order, each through the
//! connection's [`ConnectionType`].
//!
//! Slots are either methods of an [`Object`] or plain closures. Method slots
//! hold a weak reference to their receiver and register the signal with it,
//! so dropping the receiver disconnects it. Dropping the signal unregisters
//! it from every receiver.
//!
//! The connection list is guarded by a mutex. `emit` only holds it long
//! enough to snapshot the list, so slots may connect or disconnect while the
//! signal is being emitted.

use crate::bound_method::ConnectionType;
use crate::error::Result;
use crate::object::{Object, ObjectId, ObjectImpl, ObjectInner, ObjectNode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace, warn};

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SignalId(u64);

/// Handle to one connection, returned by `connect*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Receiver-facing side of a signal, independent of its argument type
pub(crate) trait SignalBase: Send + Sync {
    /// Remove every connection to `receiver`, returning how many were removed
    fn disconnect_receiver(&self, receiver: ObjectId) -> usize;
}

trait Slot<A>: Send + Sync {
    fn activate(&self, args: A, connection: ConnectionType) -> Result<()>;
}

struct MethodSlot<T: ObjectImpl, A> {
    target: Weak<ObjectInner<T>>,
    method: fn(&mut T, A),
}

impl<T, A> Slot<A> for MethodSlot<T, A>
where
    T: ObjectImpl,
    A: Send + 'static,
{
    fn activate(&self, args: A, connection: ConnectionType) -> Result<()> {
        let Some(target) = self.target.upgrade().filter(|t| !t.core().is_dying()) else {
            return Ok(());
        };
        let method = self.method;
        target
            .invoke(connection, move |object: &mut T| method(object, args))
            .map(|_| ())
    }
}

struct FnSlot<F>(F);

impl<A, F> Slot<A> for FnSlot<F>
where
    F: Fn(A) + Send + Sync,
{
    fn activate(&self, args: A, _connection: ConnectionType) -> Result<()> {
        (self.0)(args);
        Ok(())
    }
}

struct Receiver {
    id: ObjectId,
    node: Weak<dyn ObjectNode>,
}

struct Connection<A> {
    id: ConnectionId,
    receiver: Option<Receiver>,
    method: Option<usize>,
    connection: ConnectionType,
    slot: Arc<dyn Slot<A>>,
}

impl<A> Connection<A> {
    fn targets(&self, receiver: ObjectId) -> bool {
        self.receiver.as_ref().is_some_and(|r| r.id == receiver)
    }
}

struct SignalInner<A> {
    id: SignalId,
    connections: Mutex<Vec<Connection<A>>>,
}

impl<A: Send + 'static> SignalBase for SignalInner<A> {
    fn disconnect_receiver(&self, receiver: ObjectId) -> usize {
        let mut connections = self.connections.lock();
        let before = connections.len();
        connections.retain(|c| !c.targets(receiver));
        before - connections.len()
    }
}

/// Ordered multicast of `A` to connected slots
///
/// Use a tuple for signals carrying several values and `()` for signals
/// carrying none.
pub struct Signal<A> {
    inner: Arc<SignalInner<A>>,
}

impl<A: Clone + Send + 'static> Signal<A> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: SignalId(NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed)),
                connections: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connect `method` of `receiver`, delivered with `connection`
    pub fn connect<T: ObjectImpl>(
        &self,
        receiver: &Object<T>,
        method: fn(&mut T, A),
        connection: ConnectionType,
    ) -> ConnectionId {
        let id = ConnectionId::next();
        let inner = receiver.inner();
        let node: Weak<dyn ObjectNode> = Arc::downgrade(inner) as Weak<dyn ObjectNode>;

        self.inner.connections.lock().push(Connection {
            id,
            receiver: Some(Receiver {
                id: receiver.id(),
                node,
            }),
            method: Some(method as usize),
            connection,
            slot: Arc::new(MethodSlot {
                target: Arc::downgrade(inner),
                method,
            }),
        });

        let signal: Weak<dyn SignalBase> = Arc::downgrade(&self.inner) as Weak<dyn SignalBase>;
        inner.core().remember_signal(self.inner.id, signal);

        trace!(
            receiver = %receiver.id(),
            connection = ?connection,
            "Signal connected"
        );
        id
    }

    /// Connect `method` of `receiver` with [`ConnectionType::Auto`]
    pub fn connect_auto<T: ObjectImpl>(&self, receiver: &Object<T>, method: fn(&mut T, A)) -> ConnectionId {
        self.connect(receiver, method, ConnectionType::Auto)
    }

    /// Connect a closure, always called on the emitting thread
    pub fn connect_fn<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        let id = ConnectionId::next();
        self.inner.connections.lock().push(Connection {
            id,
            receiver: None,
            method: None,
            connection: ConnectionType::Direct,
            slot: Arc::new(FnSlot(slot)),
        });
        id
    }

    /// Remove every connection to `receiver`
    pub fn disconnect<T: ObjectImpl>(&self, receiver: &Object<T>) -> usize {
        let removed = self.inner.disconnect_receiver(receiver.id());
        if removed > 0 {
            receiver.inner().core().forget_signal(self.inner.id);
        }
        removed
    }

    /// Remove the connections of `method` on `receiver`
    pub fn disconnect_method<T: ObjectImpl>(&self, receiver: &Object<T>, method: fn(&mut T, A)) -> usize {
        let target = receiver.id();
        let method = method as usize;
        let (removed, remaining) = {
            let mut connections = self.inner.connections.lock();
            let before = connections.len();
            connections.retain(|c| !(c.targets(target) && c.method == Some(method)));
            let removed = before - connections.len();
            (removed, connections.iter().any(|c| c.targets(target)))
        };
        if removed > 0 && !remaining {
            receiver.inner().core().forget_signal(self.inner.id);
        }
        removed
    }

    /// Remove a single connection
    pub fn disconnect_connection(&self, id: ConnectionId) -> bool {
        let (removed, orphaned) = {
            let mut connections = self.inner.connections.lock();
            let Some(index) = connections.iter().position(|c| c.id == id) else {
                return false;
            };
            let removed = connections.remove(index);
            let orphaned = removed
                .receiver
                .as_ref()
                .filter(|r| !connections.iter().any(|c| c.targets(r.id)))
                .and_then(|r| r.node.upgrade());
            (removed, orphaned)
        };
        if let Some(node) = orphaned {
            node.core().forget_signal(self.inner.id);
        }
        drop(removed);
        true
    }

    /// Remove every connection
    pub fn disconnect_all(&self) {
        let connections = std::mem::take(&mut *self.inner.connections.lock());
        self.forget_receivers(connections);
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    pub fn is_connected<T: ObjectImpl>(&self, receiver: &Object<T>) -> bool {
        let target = receiver.id();
        self.inner
            .connections
            .lock()
            .iter()
            .any(|c| c.targets(target))
    }

    /// Deliver `args` to every connected slot, in connection order
    ///
    /// Each slot receives its own clone of `args`. A slot that cannot be
    /// delivered is logged and skipped.
    pub fn emit(&self, args: A) {
        let slots: Vec<(ConnectionType, Arc<dyn Slot<A>>)> = {
            let connections = self.inner.connections.lock();
            if connections.is_empty() {
                return;
            }
            connections
                .iter()
                .map(|c| (c.connection, Arc::clone(&c.slot)))
                .collect()
        };

        for (connection, slot) in slots {
            match slot.activate(args.clone(), connection) {
                Ok(()) => {}
                Err(err) if err.is_precondition() => {
                    error!(error = %err, connection = ?connection, "Signal slot invoked from the wrong context");
                }
                Err(err) => warn!(error = %err, connection = ?connection, "Signal delivery failed"),
            }
        }
    }
}

impl<A> Signal<A> {
    fn forget_receivers(&self, connections: Vec<Connection<A>>) {
        for connection in &connections {
            if let Some(node) = connection.receiver.as_ref().and_then(|r| r.node.upgrade()) {
                node.core().forget_signal(self.inner.id);
            }
        }
    }
}

impl<A: Clone + Send + 'static> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Drop for Signal<A> {
    fn drop(&mut self) {
        let connections = std::mem::take(&mut *self.inner.connections.lock());
        self.forget_receivers(connections);
    }
}

impl<A> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.inner.connections.lock().len())
            .finish()
    }
}
