//! Threads and Event Loops
//!
//! A [`Thread`] owns one OS thread running a cooperative event loop and one
//! FIFO message queue. Any thread may post to the queue; only the loop
//! consumes it, one message at a time.
//!
//! # Loop lifecycle
//!
//! ```text
//!   new() ──► Stopped ──start()──► Running ──exit()──► Stopping ──► Stopped
//!                 ▲                                          │
//!                 └──────────── pending messages discarded ◄─┘
//! ```
//!
//! OS threads not started through this module (the process main thread, test
//! harness threads) are *adopted* the first time they call
//! [`Thread::current`]. An adopted thread is considered running until its OS
//! thread exits; its queue is drained by calling [`Thread::dispatch_messages`]
//! on it. Messages still queued when the OS thread exits are discarded.
//!
//! A loop whose handler panics ends like one that was asked to exit: pending
//! messages are discarded, [`Thread::finished`] is emitted and the thread may
//! be started again.
//!
//! # Lock Ordering
//!
//! 1. object thread binding (`ObjectCore::thread`)
//! 2. `queue`
//!
//! Messages are always delivered with no queue lock held.

use crate::error::{ObjectError, Result};
use crate::message::Envelope;
use crate::object::ObjectId;
use crate::signal::Signal;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, trace, warn};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<CurrentThread>> = const { RefCell::new(None) };
}

/// Unique thread identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    fn next() -> Self {
        Self(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// Event loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Stopped,
    Running,
    Stopping,
}

/// Construction options for a [`Thread`]
#[derive(Debug, Clone, Default)]
pub struct ThreadOptions {
    /// OS thread name, defaults to the thread id
    pub name: Option<String>,
    /// OS thread stack size in bytes
    pub stack_size: Option<usize>,
    /// Queue depth at which a warning is logged
    pub queue_warn_depth: Option<usize>,
}

impl ThreadOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn with_queue_warn_depth(mut self, depth: usize) -> Self {
        self.queue_warn_depth = Some(depth);
        self
    }
}

/// Per-thread delivery counters
#[derive(Debug, Default)]
pub struct ThreadStats {
    pub messages_posted: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub messages_removed: AtomicU64,
    pub messages_discarded: AtomicU64,
    pub wakeups: AtomicU64,
    pub queue_high_water: AtomicUsize,
}

impl ThreadStats {
    fn record_post(&self, depth: usize) {
        self.messages_posted.fetch_add(1, Ordering::Relaxed);
        self.queue_high_water.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ThreadStatsSnapshot {
        ThreadStatsSnapshot {
            messages_posted: self.messages_posted.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_removed: self.messages_removed.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            queue_high_water: self.queue_high_water.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ThreadStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadStatsSnapshot {
    pub messages_posted: u64,
    pub messages_delivered: u64,
    pub messages_removed: u64,
    pub messages_discarded: u64,
    pub wakeups: u64,
    pub queue_high_water: usize,
}

struct MessageQueue {
    messages: VecDeque<Envelope>,
    state: ThreadState,
    /// Incremented on every start; a loop exits once it no longer matches
    generation: u64,
    exit_requested: bool,
    interrupted: bool,
}

enum Wake {
    Message(Envelope),
    Interrupted,
    Exit,
}

struct ThreadInner {
    id: ThreadId,
    name: String,
    adopted: bool,
    options: ThreadOptions,
    queue: Mutex<MessageQueue>,
    wake: Condvar,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: ThreadStats,
    finished: Signal<ThreadId>,
    interrupted: Signal<ThreadId>,
}

/// Handle to an event loop thread
///
/// Handles are cheap to clone and compare equal when they refer to the same
/// thread. A running loop keeps its own handle alive, so dropping every
/// handle does not stop it: call [`Thread::stop`].
#[derive(Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

impl Thread {
    /// Create a stopped thread
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(ThreadOptions::named(name))
    }

    pub fn with_options(options: ThreadOptions) -> Self {
        let id = ThreadId::next();
        let name = options.name.clone().unwrap_or_else(|| id.to_string());
        Self::build(id, name, false, options, ThreadState::Stopped)
    }

    fn adopt() -> Self {
        let id = ThreadId::next();
        let name = std::thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("adopted-{}", id.as_u64()));
        trace!(thread = %name, id = %id, "Adopting OS thread");
        Self::build(id, name, true, ThreadOptions::default(), ThreadState::Running)
    }

    fn build(
        id: ThreadId,
        name: String,
        adopted: bool,
        options: ThreadOptions,
        state: ThreadState,
    ) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id,
                name,
                adopted,
                options,
                queue: Mutex::new(MessageQueue {
                    messages: VecDeque::new(),
                    state,
                    generation: 0,
                    exit_requested: false,
                    interrupted: false,
                }),
                wake: Condvar::new(),
                handle: Mutex::new(None),
                stats: ThreadStats::default(),
                finished: Signal::new(),
                interrupted: Signal::new(),
            }),
        }
    }

    /// Thread the caller is running on
    ///
    /// Adopts the calling OS thread on first use if it was not started by
    /// [`Thread::start`].
    pub fn current() -> Thread {
        CURRENT
            .try_with(|current| {
                current
                    .borrow_mut()
                    .get_or_insert_with(|| CurrentThread(Thread::adopt()))
                    .0
                    .clone()
            })
            .unwrap_or_else(|_| Thread::adopt())
    }

    pub fn id(&self) -> ThreadId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_adopted(&self) -> bool {
        self.inner.adopted
    }

    pub fn state(&self) -> ThreadState {
        self.inner.queue.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ThreadState::Running
    }

    /// True if the caller is running on this thread
    pub fn is_current(&self) -> bool {
        Thread::current() == *self
    }

    /// Number of messages waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().messages.len()
    }

    pub fn stats(&self) -> ThreadStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Emitted from the loop thread after the loop exited
    pub fn finished(&self) -> &Signal<ThreadId> {
        &self.inner.finished
    }

    /// Emitted from the loop thread each time [`Thread::wakeup`] interrupts it
    pub fn interrupted(&self) -> &Signal<ThreadId> {
        &self.inner.interrupted
    }

    /// Launch the event loop on a new OS thread
    ///
    /// Does nothing if the loop is already running. A thread that was stopped
    /// may be started again.
    pub fn start(&self) -> Result<()> {
        if self.inner.adopted {
            return Err(ObjectError::AdoptedThread { thread: self.id() });
        }

        let mut handle = self.inner.handle.lock();
        if self.is_running() {
            return Ok(());
        }

        if let Some(previous) = handle.take() {
            if previous.join().is_err() {
                warn!(thread = %self.inner.name, "Previous event loop terminated by panic");
            }
        }

        let generation = {
            let mut queue = self.inner.queue.lock();
            queue.generation += 1;
            queue.state = ThreadState::Running;
            queue.exit_requested = false;
            queue.interrupted = false;
            queue.generation
        };

        let mut builder = std::thread::Builder::new().name(self.inner.name.clone());
        if let Some(stack_size) = self.inner.options.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let thread = self.clone();
        match builder.spawn(move || thread.run(generation)) {
            Ok(join_handle) => {
                *handle = Some(join_handle);
                debug!(thread = %self.inner.name, id = %self.inner.id, "Thread started");
                Ok(())
            }
            Err(source) => {
                self.inner.queue.lock().state = ThreadState::Stopped;
                Err(ObjectError::Spawn {
                    name: self.inner.name.clone(),
                    source,
                })
            }
        }
    }

    /// Ask the event loop to terminate
    ///
    /// Messages still queued when the loop notices the request are discarded.
    pub fn exit(&self) {
        let mut queue = self.inner.queue.lock();
        if queue.state == ThreadState::Running && !self.inner.adopted {
            queue.exit_requested = true;
            queue.state = ThreadState::Stopping;
            debug!(thread = %self.inner.name, "Thread exit requested");
        }
        drop(queue);
        self.inner.wake.notify_all();
    }

    /// Wait for the event loop's OS thread to finish
    pub fn join(&self) -> Result<()> {
        if self.is_current() {
            return Err(ObjectError::JoinSelf { thread: self.id() });
        }

        let handle = self.inner.handle.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| ObjectError::ThreadPanicked { thread: self.id() }),
            None => Ok(()),
        }
    }

    /// [`Thread::exit`] followed by [`Thread::join`]
    pub fn stop(&self) -> Result<()> {
        self.exit();
        self.join()
    }

    /// Interrupt the loop's idle wait without posting a message
    ///
    /// The loop emits [`Thread::interrupted`] on its own thread in response.
    pub fn wakeup(&self) {
        self.inner.queue.lock().interrupted = true;
        self.inner.wake.notify_all();
    }

    /// Deliver every message queued on the calling thread
    ///
    /// Must be called from this thread. Returns the number of messages
    /// delivered.
    pub fn dispatch_messages(&self) -> Result<usize> {
        let caller = Thread::current();
        if caller != *self {
            return Err(ObjectError::WrongThread {
                target: format!("queue of {}", self.inner.name),
                expected: self.id(),
                actual: caller.id(),
            });
        }

        let mut delivered = 0;
        loop {
            let next = self.inner.queue.lock().messages.pop_front();
            match next {
                Some(envelope) => {
                    self.deliver(envelope);
                    delivered += 1;
                }
                None => break,
            }
        }
        Ok(delivered)
    }

    /// Queue a message and wake the loop
    pub(crate) fn post_message(&self, envelope: Envelope) {
        let depth = {
            let mut queue = self.inner.queue.lock();
            queue.messages.push_back(envelope);
            queue.messages.len()
        };
        self.inner.wake.notify_one();
        self.record_post(depth);
    }

    /// Queue a message only if the loop will get to it
    ///
    /// Hands the envelope back when the loop is stopping or stopped. Checked
    /// under the queue lock, so a message accepted here is either delivered or
    /// discarded by the exiting loop.
    pub(crate) fn post_if_running(&self, envelope: Envelope) -> std::result::Result<(), Envelope> {
        let depth = {
            let mut queue = self.inner.queue.lock();
            if queue.state != ThreadState::Running {
                return Err(envelope);
            }
            queue.messages.push_back(envelope);
            queue.messages.len()
        };
        self.inner.wake.notify_one();
        self.record_post(depth);
        Ok(())
    }

    /// Append already-posted messages, preserving their order
    pub(crate) fn post_messages(&self, envelopes: Vec<Envelope>) {
        if envelopes.is_empty() {
            return;
        }
        let depth = {
            let mut queue = self.inner.queue.lock();
            queue.messages.extend(envelopes);
            queue.messages.len()
        };
        self.inner.wake.notify_one();
        self.inner.stats.queue_high_water.fetch_max(depth, Ordering::Relaxed);
    }

    /// Drop, undelivered, every pending message addressed to `receiver`
    pub(crate) fn remove_messages(&self, receiver: ObjectId) -> usize {
        let removed = self.take_messages(receiver);
        let count = removed.len();
        if count > 0 {
            self.inner
                .stats
                .messages_removed
                .fetch_add(count as u64, Ordering::Relaxed);
            trace!(thread = %self.inner.name, object = %receiver, count, "Removed pending messages");
        }
        // Dropped outside the queue lock: releasing a blocking call wakes its caller.
        drop(removed);
        count
    }

    /// Take every pending message addressed to `receiver` out of the queue
    pub(crate) fn take_messages(&self, receiver: ObjectId) -> Vec<Envelope> {
        let mut queue = self.inner.queue.lock();
        if !queue.messages.iter().any(|e| e.receiver() == receiver) {
            return Vec::new();
        }
        let messages = std::mem::take(&mut queue.messages);
        let (taken, kept): (Vec<Envelope>, Vec<Envelope>) = messages
            .into_iter()
            .partition(|envelope| envelope.receiver() == receiver);
        queue.messages = kept.into();
        taken
    }

    fn record_post(&self, depth: usize) {
        self.inner.stats.record_post(depth);
        if self.inner.options.queue_warn_depth == Some(depth) {
            warn!(
                thread = %self.inner.name,
                depth,
                "Message queue reached warning depth"
            );
        }
    }

    fn deliver(&self, envelope: Envelope) {
        trace!(
            thread = %self.inner.name,
            object = %envelope.receiver(),
            kind = ?envelope.kind(),
            "Delivering message"
        );
        envelope.deliver();
        self.inner
            .stats
            .messages_delivered
            .fetch_add(1, Ordering::Relaxed);
    }

    fn run(self, generation: u64) {
        CURRENT.with(|current| *current.borrow_mut() = Some(CurrentThread(self.clone())));
        let _current = CurrentGuard;
        let _finish = LoopFinish {
            thread: self.clone(),
            generation,
        };

        debug!(thread = %self.inner.name, "Event loop running");
        self.exec(generation);
    }

    /// Mark the loop stopped and discard what is left in its queue
    ///
    /// Only acts while `generation` is still current, so a loop that was
    /// restarted in the meantime keeps its queue.
    fn shut_down(&self, generation: u64) {
        let discarded = {
            let mut queue = self.inner.queue.lock();
            if queue.generation != generation {
                return;
            }
            queue.state = ThreadState::Stopped;
            queue.exit_requested = false;
            std::mem::take(&mut queue.messages)
        };
        if !discarded.is_empty() {
            self.inner
                .stats
                .messages_discarded
                .fetch_add(discarded.len() as u64, Ordering::Relaxed);
            debug!(
                thread = %self.inner.name,
                count = discarded.len(),
                "Discarding messages pending at exit"
            );
        }
        // Dropped outside the queue lock: releasing a blocking call wakes its caller.
        drop(discarded);
    }

    fn generation(&self) -> u64 {
        self.inner.queue.lock().generation
    }

    fn exec(&self, generation: u64) {
        loop {
            match self.wait(generation) {
                Wake::Message(envelope) => self.deliver(envelope),
                Wake::Interrupted => {
                    self.inner.stats.wakeups.fetch_add(1, Ordering::Relaxed);
                    self.inner.interrupted.emit(self.inner.id);
                }
                Wake::Exit => return,
            }
        }
    }

    fn wait(&self, generation: u64) -> Wake {
        let mut queue = self.inner.queue.lock();
        loop {
            if queue.exit_requested || queue.generation != generation {
                return Wake::Exit;
            }
            if let Some(envelope) = queue.messages.pop_front() {
                return Wake::Message(envelope);
            }
            if queue.interrupted {
                queue.interrupted = false;
                return Wake::Interrupted;
            }
            self.inner.wake.wait(&mut queue);
        }
    }
}

/// Ends the loop on return and on unwind out of a panicking handler
struct LoopFinish {
    thread: Thread,
    generation: u64,
}

impl Drop for LoopFinish {
    fn drop(&mut self) {
        let inner = &self.thread.inner;
        if std::thread::panicking() {
            error!(thread = %inner.name, "Event loop handler panicked, stopping loop");
        }
        self.thread.shut_down(self.generation);
        inner.finished.emit(inner.id);
        debug!(thread = %inner.name, "Event loop finished");
    }
}

/// `CURRENT` slot; retires an adopted thread when its OS thread exits
struct CurrentThread(Thread);

impl Drop for CurrentThread {
    fn drop(&mut self) {
        let thread = &self.0;
        if thread.inner.adopted {
            trace!(thread = %thread.inner.name, "Adopted OS thread exiting");
            thread.shut_down(thread.generation());
        }
    }
}

struct CurrentGuard;

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
    }
}

impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Thread {}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("adopted", &self.inner.adopted)
            .finish()
    }
}
