//! Thread-Affine Objects
//!
//! An [`Object`] wraps application state `T` and binds it to exactly one
//! [`Thread`]. Queued and blocking calls into the object run on that thread,
//! through the object's [`ObjectImpl::message`] handler.
//!
//! Objects form a structural parent/child tree that owns nothing: the caller
//! owns every `Object`, parents hold weak handles to their children and
//! children a weak handle to their parent.
//!
//! # Destruction
//!
//! Dropping an object, in order:
//! 1. disconnects it from every signal it is connected to,
//! 2. purges the messages still queued for it on its thread,
//! 3. unlinks it from its parent,
//! 4. orphans its children, which stay alive and bound to their thread.
//!
//! The object is marked dying before step 1. Queue entries and signal
//! connections only hold weak references, and check the mark once they
//! upgrade, so a call racing with the drop is discarded undelivered. A direct
//! call already running on another thread when the drop begins is left to
//! finish.

use crate::bound_method::{BoundMethod, ConnectionType};
use crate::error::{ObjectError, Result};
use crate::message::{Deliver, Envelope, Message};
use crate::signal::{SignalBase, SignalId};
use crate::thread::Thread;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Unique object identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

/// Behavior of the state held by an [`Object`]
///
/// The default handler runs invoke payloads and ignores everything else.
/// Types that want thread move notifications or user messages override
/// `message` and forward the kinds they do not handle:
///
/// ```rust
/// use messaging_objects::{Message, ObjectImpl};
///
/// struct Worker {
///     moves: u32,
/// }
///
/// impl ObjectImpl for Worker {
///     fn message(&mut self, msg: Message<Self>) {
///         match msg {
///             Message::ThreadMove(_) => self.moves += 1,
///             other => other.dispatch(self),
///         }
///     }
/// }
/// ```
pub trait ObjectImpl: Send + Sized + 'static {
    fn message(&mut self, msg: Message<Self>) {
        msg.dispatch(self);
    }
}

/// Type-erased view of an object, used for tree links and signal bookkeeping
pub(crate) trait ObjectNode: Send + Sync {
    fn core(&self) -> &ObjectCore;

    /// Deliver the thread move notification to this object and its subtree
    fn notify_thread_move(&self, target: &Thread);
}

type NodeLink = (ObjectId, Weak<dyn ObjectNode>);

pub(crate) struct ObjectCore {
    id: ObjectId,
    thread: RwLock<Thread>,
    parent: Mutex<Option<NodeLink>>,
    children: Mutex<Vec<NodeLink>>,
    signals: Mutex<Vec<(SignalId, Weak<dyn SignalBase>)>>,
    pending: AtomicUsize,
    /// Set when the owning `Object` starts dropping
    dying: AtomicBool,
}

impl ObjectCore {
    fn new(thread: Thread, parent: Option<NodeLink>) -> Self {
        Self {
            id: ObjectId::next(),
            thread: RwLock::new(thread),
            parent: Mutex::new(parent),
            children: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            pending: AtomicUsize::new(0),
            dying: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn thread(&self) -> Thread {
        self.thread.read().clone()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dying(&self) {
        self.dying.store(true, Ordering::Release);
    }

    fn message_released(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Record a signal this object is connected to
    pub(crate) fn remember_signal(&self, id: SignalId, signal: Weak<dyn SignalBase>) {
        let mut signals = self.signals.lock();
        if !signals.iter().any(|(known, _)| *known == id) {
            signals.push((id, signal));
        }
    }

    /// Forget a signal once no connection to this object remains on it
    pub(crate) fn forget_signal(&self, id: SignalId) {
        self.signals.lock().retain(|(known, _)| *known != id);
    }

    pub(crate) fn signal_count(&self) -> usize {
        self.signals.lock().len()
    }

    fn live_children(&self) -> Vec<Arc<dyn ObjectNode>> {
        self.children
            .lock()
            .iter()
            .filter_map(|(_, child)| child.upgrade())
            .collect()
    }

    /// Rebind this object and its subtree to `target`
    ///
    /// Pending messages follow the objects, in order.
    fn reassign(&self, target: &Thread) {
        {
            let mut thread = self.thread.write();
            if self.pending() > 0 {
                let moved = thread.take_messages(self.id);
                trace!(object = %self.id, count = moved.len(), "Moving pending messages");
                target.post_messages(moved);
            }
            *thread = target.clone();
        }

        for child in self.live_children() {
            child.core().reassign(target);
        }
    }
}

pub(crate) struct ObjectInner<T: ObjectImpl> {
    core: ObjectCore,
    state: ReentrantMutex<RefCell<T>>,
}

impl<T: ObjectImpl> ObjectNode for ObjectInner<T> {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn notify_thread_move(&self, target: &Thread) {
        if let Err(err) = self.handle(Message::ThreadMove(target.clone())) {
            warn!(object = %self.core.id, error = %err, "Thread move notification not delivered");
        }
        for child in self.core.live_children() {
            child.notify_thread_move(target);
        }
    }
}

impl<T: ObjectImpl> ObjectInner<T> {
    /// Run `f` on the state, on the caller's stack
    fn with_state<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let guard = self.state.lock();
        let mut state = guard
            .try_borrow_mut()
            .map_err(|_| ObjectError::Reentrant {
                object: self.core.id,
            })?;
        Ok(f(&mut state))
    }

    fn handle(&self, message: Message<T>) -> Result<()> {
        self.with_state(|state| {
            if self.core.is_dying() {
                trace!(object = %self.core.id, kind = ?message.kind(), "Receiver dropping, message discarded");
                return;
            }
            state.message(message);
        })
    }

    fn envelope(self: &Arc<Self>, message: Message<T>) -> Envelope {
        let kind = message.kind();
        self.core.pending.fetch_add(1, Ordering::AcqRel);
        Envelope::new(
            self.core.id,
            kind,
            Box::new(Posted {
                target: Arc::downgrade(self),
                message: Some(message),
            }),
        )
    }

    pub(crate) fn post(self: &Arc<Self>, message: Message<T>) {
        // Holding the binding keeps a concurrent move from splitting the queue.
        let thread = self.core.thread.read();
        thread.post_message(self.envelope(message));
    }

    /// Dispatch a call according to `connection`
    ///
    /// Returns the call's result for direct and blocking delivery, `None` for
    /// queued delivery.
    pub(crate) fn invoke<F, R>(self: &Arc<Self>, connection: ConnectionType, method: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        let thread = self.core.thread();
        match connection.resolve(&thread) {
            ConnectionType::Direct | ConnectionType::Auto => {
                self.with_state(|state| (!self.core.is_dying()).then(|| method(state)))
            }
            ConnectionType::Queued => {
                self.invoke_queued(std::any::type_name::<F>(), move |state: &mut T| {
                    let _ = method(state);
                });
                Ok(None)
            }
            ConnectionType::Blocking => self.invoke_blocking(method).map(Some),
        }
    }

    pub(crate) fn invoke_queued<F>(self: &Arc<Self>, name: &'static str, method: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.post(Message::Invoke(BoundMethod::new(
            name,
            ConnectionType::Queued,
            method,
        )));
    }

    pub(crate) fn invoke_blocking<'a, F, R>(self: &Arc<Self>, method: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'a,
        R: Send + 'a,
    {
        let binding = self.core.thread.read();
        let caller = Thread::current();
        if *binding == caller {
            error!(
                object = %self.core.id,
                thread = %caller.name(),
                "Rejecting blocking call from the receiver's own thread"
            );
            return Err(ObjectError::BlockingSelfCall {
                object: self.core.id,
                thread: caller.id(),
            });
        }

        let (bound, result) = BoundMethod::blocking(std::any::type_name::<F>(), method);
        if binding.post_if_running(self.envelope(Message::Invoke(bound))).is_err() {
            return Err(ObjectError::ThreadNotRunning {
                object: self.core.id,
                thread: binding.id(),
            });
        }
        drop(binding);

        result.recv().map_err(|_| {
            warn!(object = %self.core.id, "Blocking call discarded before delivery");
            ObjectError::CallAbandoned {
                object: self.core.id,
            }
        })
    }
}

/// Queue payload: a message for an object of type `T`
struct Posted<T: ObjectImpl> {
    target: Weak<ObjectInner<T>>,
    message: Option<Message<T>>,
}

impl<T: ObjectImpl> Deliver for Posted<T> {
    fn deliver(mut self: Box<Self>) {
        let Some(message) = self.message.take() else {
            return;
        };
        match self.target.upgrade() {
            Some(target) => {
                if let Err(err) = target.handle(message) {
                    warn!(object = %target.core.id, error = %err, "Message not delivered");
                }
            }
            None => trace!("Receiver gone, dropping message"),
        }
    }
}

impl<T: ObjectImpl> Drop for Posted<T> {
    fn drop(&mut self) {
        if let Some(target) = self.target.upgrade() {
            target.core.message_released();
        }
    }
}

/// Caller-owned, thread-affine object
pub struct Object<T: ObjectImpl> {
    inner: Arc<ObjectInner<T>>,
}

impl<T: ObjectImpl> Object<T> {
    /// Create an object bound to the calling thread
    pub fn new(state: T) -> Self {
        Self::build(state, Thread::current(), None)
    }

    /// Create a child of `parent`, bound to the parent's thread
    pub fn with_parent<P: ObjectImpl>(state: T, parent: &Object<P>) -> Self {
        let parent_link: Weak<dyn ObjectNode> = Arc::downgrade(&parent.inner) as Weak<dyn ObjectNode>;
        let object = Self::build(state, parent.thread(), Some((parent.id(), parent_link)));

        let child_link: Weak<dyn ObjectNode> = Arc::downgrade(&object.inner) as Weak<dyn ObjectNode>;
        parent
            .inner
            .core
            .children
            .lock()
            .push((object.id(), child_link));
        object
    }

    fn build(state: T, thread: Thread, parent: Option<NodeLink>) -> Self {
        let object = Self {
            inner: Arc::new(ObjectInner {
                core: ObjectCore::new(thread, parent),
                state: ReentrantMutex::new(RefCell::new(state)),
            }),
        };
        trace!(
            object = %object.id(),
            thread = %object.inner.core.thread().name(),
            kind = std::any::type_name::<T>(),
            "Object created"
        );
        object
    }

    pub(crate) fn inner(&self) -> &Arc<ObjectInner<T>> {
        &self.inner
    }

    pub fn id(&self) -> ObjectId {
        self.inner.core.id
    }

    /// Thread the object is currently bound to
    pub fn thread(&self) -> Thread {
        self.inner.core.thread()
    }

    pub fn parent_id(&self) -> Option<ObjectId> {
        self.inner.core.parent.lock().as_ref().map(|(id, _)| *id)
    }

    pub fn has_parent(&self) -> bool {
        self.inner.core.parent.lock().is_some()
    }

    /// Ids of the children still alive
    pub fn children(&self) -> Vec<ObjectId> {
        self.inner
            .core
            .children
            .lock()
            .iter()
            .filter(|(_, child)| child.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Messages queued for this object and not yet delivered
    pub fn pending_messages(&self) -> usize {
        self.inner.core.pending()
    }

    /// Number of signals this object is connected to
    pub fn signal_count(&self) -> usize {
        self.inner.core.signal_count()
    }

    /// Read the state on the caller's stack
    ///
    /// Fails with [`ObjectError::Reentrant`] when called from inside one of
    /// this object's own handlers.
    pub fn with_state<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.inner.with_state(|state| f(state))
    }

    /// Invoke `method` on the object with the given delivery strategy
    ///
    /// Returns `Some(result)` for direct and blocking delivery and `None` for
    /// queued delivery.
    pub fn invoke_method<F, R>(&self, connection: ConnectionType, method: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut T) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner.invoke(connection, method)
    }

    /// Run `method` synchronously on the caller's thread
    pub fn invoke_direct<R>(&self, method: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.inner.with_state(method)
    }

    /// Post `method` to the object's thread and return immediately
    pub fn invoke_queued<F>(&self, method: F)
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.inner.invoke_queued(std::any::type_name::<F>(), method);
    }

    /// Run `method` on the object's thread and wait for its result
    ///
    /// `method` may borrow from the caller: the caller stays suspended until
    /// the call ran or was discarded. Fails with
    /// [`ObjectError::BlockingSelfCall`] when called from the object's own
    /// thread, [`ObjectError::ThreadNotRunning`] when the object's thread is
    /// stopped, and [`ObjectError::CallAbandoned`] when the call was dropped
    /// before it ran.
    pub fn invoke_blocking<'a, F, R>(&self, method: F) -> Result<R>
    where
        F: FnOnce(&mut T) -> R + Send + 'a,
        R: Send + 'a,
    {
        self.inner.invoke_blocking(method)
    }

    /// Queue a message for delivery on the object's thread
    pub fn post_message(&self, message: Message<T>) {
        self.inner.post(message);
    }

    /// Queue an application payload as a user message
    pub fn post_user_message<P: Any + Send>(&self, payload: P) {
        self.inner.post(Message::user(payload));
    }

    /// Bind the object and all its children to `target`
    ///
    /// Must be called from the object's current thread, on an object without
    /// a parent. The object and every descendant first receive a
    /// [`Message::ThreadMove`] on the current thread, then the whole subtree is
    /// rebound and its pending messages move to `target`'s queue.
    pub fn move_to_thread(&self, target: &Thread) -> Result<()> {
        let owner = self.thread();
        let caller = Thread::current();
        if caller != owner {
            error!(
                object = %self.id(),
                owner = %owner.name(),
                caller = %caller.name(),
                "Object can only be moved from the thread it lives in"
            );
            return Err(ObjectError::WrongThread {
                target: self.id().to_string(),
                expected: owner.id(),
                actual: caller.id(),
            });
        }

        if owner == *target {
            return Ok(());
        }

        if self.has_parent() {
            error!(object = %self.id(), "Moving object to thread with a parent is not permitted");
            return Err(ObjectError::HasParent { object: self.id() });
        }

        self.inner.notify_thread_move(target);
        self.inner.core.reassign(target);

        debug!(
            object = %self.id(),
            from = %owner.name(),
            to = %target.name(),
            "Object moved to thread"
        );
        Ok(())
    }
}

impl<T: ObjectImpl> Drop for Object<T> {
    fn drop(&mut self) {
        let core = &self.inner.core;
        core.mark_dying();

        let signals = std::mem::take(&mut *core.signals.lock());
        for (_, signal) in signals {
            if let Some(signal) = signal.upgrade() {
                signal.disconnect_receiver(core.id);
            }
        }

        if core.pending() > 0 {
            let thread = core.thread.read();
            thread.remove_messages(core.id);
        }

        let parent = core.parent.lock().take();
        if let Some(parent) = parent.and_then(|(_, parent)| parent.upgrade()) {
            parent
                .core()
                .children
                .lock()
                .retain(|(child, _)| *child != core.id);
        }

        let children = std::mem::take(&mut *core.children.lock());
        for (_, child) in children {
            if let Some(child) = child.upgrade() {
                *child.core().parent.lock() = None;
            }
        }

        trace!(object = %core.id, "Object destroyed");
    }
}

impl<T: ObjectImpl> fmt::Debug for Object<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id())
            .field("type", &std::any::type_name::<T>())
            .field("thread", &self.thread().name())
            .field("parent", &self.parent_id())
            .finish()
    }
}
