//! Bound Methods and Connection Types
//!
//! A [`BoundMethod`] is a deferred call on an object of type `T` with its
//! arguments already captured. How the call reaches the object is decided by
//! the [`ConnectionType`] it is dispatched with.
//!
//! # Capture rules
//!
//! - **Queued** calls outlive the caller's stack frame, so everything they
//!   capture must be owned (`'static`). Arguments are moved or cloned into the
//!   capture.
//! - **Blocking** calls may borrow from the caller. The caller stays suspended
//!   until the call either ran or was dropped undelivered, so the borrowed data
//!   outlives every use of it.
//! - **Direct** calls run on the caller's stack and may borrow freely.

use crate::thread::Thread;
use crossbeam_channel::{Receiver, Sender};
use std::fmt;

/// Delivery strategy for a call into an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionType {
    /// Direct when the caller runs on the receiver's thread, Queued otherwise
    #[default]
    Auto,
    /// Run synchronously on the caller's thread
    Direct,
    /// Post to the receiver's thread and return immediately
    Queued,
    /// Post to the receiver's thread and wait for the call to complete
    Blocking,
}

impl ConnectionType {
    /// Resolve `Auto` against the receiver's thread
    ///
    /// Never returns `Auto`.
    pub fn resolve(self, receiver_thread: &Thread) -> ConnectionType {
        match self {
            ConnectionType::Auto if receiver_thread.is_current() => ConnectionType::Direct,
            ConnectionType::Auto => ConnectionType::Queued,
            other => other,
        }
    }

    /// True if the call travels through the receiver thread's queue
    pub fn is_queued(self) -> bool {
        matches!(self, ConnectionType::Queued | ConnectionType::Blocking)
    }
}

/// Deferred call on an object of type `T`
pub struct BoundMethod<T> {
    name: &'static str,
    connection: ConnectionType,
    call: Box<dyn FnOnce(&mut T) + Send + 'static>,
}

impl<T> BoundMethod<T> {
    /// Bind an owned call
    pub fn new<F>(name: &'static str, connection: ConnectionType, method: F) -> Self
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        Self {
            name,
            connection,
            call: Box::new(method),
        }
    }

    /// Bind a call whose caller will wait for its completion
    ///
    /// The returned receiver yields the call's result once it ran, or
    /// disconnects if the bound method is dropped undelivered.
    pub(crate) fn blocking<'a, F, R>(name: &'static str, method: F) -> (Self, Receiver<R>)
    where
        F: FnOnce(&mut T) -> R + Send + 'a,
        R: Send + 'a,
        T: 'a,
    {
        let (reply, result) = crossbeam_channel::bounded(1);
        let call = BlockingCall {
            method: Some(method),
            reply,
        };
        let scoped: Box<dyn FnOnce(&mut T) + Send + 'a> =
            Box::new(move |target: &mut T| call.run(target));

        // SAFETY: the only lifetime being extended is `'a`, the lifetime of data
        // borrowed by the caller. `Object::invoke_blocking` is the only user of
        // this constructor and does not return before `result` yields a value or
        // reports disconnection. Both happen only after `method` has been
        // consumed or dropped: `BlockingCall` declares `method` before `reply`,
        // so on drop the captures go first and the sender disconnects last.
        let call: Box<dyn FnOnce(&mut T) + Send + 'static> = unsafe {
            std::mem::transmute::<
                Box<dyn FnOnce(&mut T) + Send + 'a>,
                Box<dyn FnOnce(&mut T) + Send + 'static>,
            >(scoped)
        };

        (
            Self {
                name,
                connection: ConnectionType::Blocking,
                call,
            },
            result,
        )
    }

    /// Method identity, for diagnostics
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Strategy this call was dispatched with
    pub fn connection(&self) -> ConnectionType {
        self.connection
    }

    /// Run the call against `target`
    pub fn invoke(self, target: &mut T) {
        (self.call)(target);
    }
}

impl<T> fmt::Debug for BoundMethod<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMethod")
            .field("name", &self.name)
            .field("connection", &self.connection)
            .finish()
    }
}

struct BlockingCall<F, R> {
    // Drop order is declaration order: `method` must go before `reply`.
    method: Option<F>,
    reply: Sender<R>,
}

impl<F, R> BlockingCall<F, R> {
    fn run<T>(mut self, target: &mut T)
    where
        F: FnOnce(&mut T) -> R,
    {
        if let Some(method) = self.method.take() {
            let result = method(target);
            // The caller is parked on the other end and cannot have gone away.
            let _ = self.reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        value: u64,
    }

    #[test]
    fn test_auto_resolves_against_current_thread() {
        let here = Thread::current();
        assert_eq!(ConnectionType::Auto.resolve(&here), ConnectionType::Direct);

        let elsewhere = Thread::new("resolve-target");
        assert_eq!(ConnectionType::Auto.resolve(&elsewhere), ConnectionType::Queued);
        assert_eq!(
            ConnectionType::Blocking.resolve(&elsewhere),
            ConnectionType::Blocking
        );
    }

    #[test]
    fn test_is_queued() {
        assert!(ConnectionType::Queued.is_queued());
        assert!(ConnectionType::Blocking.is_queued());
        assert!(!ConnectionType::Direct.is_queued());
        assert!(!ConnectionType::Auto.is_queued());
    }

    #[test]
    fn test_owned_call_moves_arguments() {
        let label = String::from("frame-7");
        let method = BoundMethod::new("record", ConnectionType::Queued, move |c: &mut Counter| {
            c.value += label.len() as u64;
        });
        assert_eq!(method.name(), "record");
        assert_eq!(method.connection(), ConnectionType::Queued);

        let mut counter = Counter::default();
        method.invoke(&mut counter);
        assert_eq!(counter.value, 7);
    }

    #[test]
    fn test_blocking_call_replies_with_result() {
        let increments = vec![1u64, 2, 3];
        let (method, result) = BoundMethod::blocking("sum", |c: &mut Counter| {
            c.value += increments.iter().sum::<u64>();
            c.value
        });

        let mut counter = Counter::default();
        method.invoke(&mut counter);
        assert_eq!(result.recv().unwrap(), 6);
    }

    #[test]
    fn test_dropped_blocking_call_disconnects() {
        let (method, result) = BoundMethod::blocking("never", |c: &mut Counter| c.value);
        drop(method);
        assert!(result.recv().is_err());
    }
}
