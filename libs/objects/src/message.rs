//! Object Messages
//!
//! Messages are the unit of work a [`Thread`] delivers to an object. Each
//! message is a closed tagged variant; objects handle the kinds they care
//! about in [`ObjectImpl::message`](crate::ObjectImpl::message) and forward the rest to
//! [`Message::dispatch`], the base handler.
//!
//! Once posted, a message is owned by the target thread's queue. The loop
//! takes it out, delivers it and drops it. Queue entries only hold weak
//! references to their receiver, so a message whose receiver is gone is
//! dropped undelivered.

use crate::bound_method::BoundMethod;
use crate::object::ObjectId;
use crate::thread::Thread;
use std::any::Any;
use std::fmt;
use tracing::trace;

/// Message delivered to an object of type `T` on its thread
pub enum Message<T> {
    /// Run a bound method on the receiver
    Invoke(BoundMethod<T>),
    /// The receiver is about to be moved to the given thread
    ThreadMove(Thread),
    /// Application-defined payload
    User(Box<dyn Any + Send>),
}

/// Message discriminant, used for routing decisions and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Invoke,
    ThreadMove,
    User,
}

impl<T> Message<T> {
    /// Wrap an application payload
    pub fn user<P: Any + Send>(payload: P) -> Self {
        Message::User(Box::new(payload))
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Invoke(_) => MessageKind::Invoke,
            Message::ThreadMove(_) => MessageKind::ThreadMove,
            Message::User(_) => MessageKind::User,
        }
    }

    /// Borrow a user payload as `P`, if this is a user message carrying one
    pub fn user_payload<P: Any>(&self) -> Option<&P> {
        match self {
            Message::User(payload) => payload.downcast_ref::<P>(),
            _ => None,
        }
    }

    /// Base message handler
    ///
    /// Runs invoke payloads against `target`. Thread move notifications and
    /// user payloads have no default behavior.
    pub fn dispatch(self, target: &mut T) {
        match self {
            Message::Invoke(method) => method.invoke(target),
            Message::ThreadMove(thread) => {
                trace!(thread = %thread.name(), "Thread move notification not handled");
            }
            Message::User(_) => {
                trace!(
                    receiver = std::any::type_name::<T>(),
                    "User message not handled, dropping"
                );
            }
        }
    }
}

impl<T> fmt::Debug for Message<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Invoke(method) => f.debug_tuple("Invoke").field(method).finish(),
            Message::ThreadMove(thread) => f.debug_tuple("ThreadMove").field(thread).finish(),
            Message::User(_) => f.write_str("User(..)"),
        }
    }
}

/// Type-erased delivery of a posted message
///
/// Dropping a `Deliver` without calling [`Deliver::deliver`] discards the
/// message.
pub(crate) trait Deliver: Send {
    fn deliver(self: Box<Self>);
}

/// Queue entry: a message addressed to one object
pub(crate) struct Envelope {
    receiver: ObjectId,
    kind: MessageKind,
    payload: Box<dyn Deliver>,
}

impl Envelope {
    pub(crate) fn new(receiver: ObjectId, kind: MessageKind, payload: Box<dyn Deliver>) -> Self {
        Self {
            receiver,
            kind,
            payload,
        }
    }

    pub(crate) fn receiver(&self) -> ObjectId {
        self.receiver
    }

    pub(crate) fn kind(&self) -> MessageKind {
        self.kind
    }

    pub(crate) fn deliver(self) {
        self.payload.deliver();
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("receiver", &self.receiver)
            .field("kind", &self.kind)
            .finish()
    }
}
