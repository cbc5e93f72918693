//! Object Runtime Error Types
//!
//! Precondition violations and delivery failures surfaced by the object
//! runtime. None of these are fatal: callers get an `Err` and the runtime
//! state is left untouched.

use crate::object::ObjectId;
use crate::thread::ThreadId;
use thiserror::Error;

/// Result alias used throughout the object runtime
pub type Result<T> = std::result::Result<T, ObjectError>;

/// Main object runtime error type
#[derive(Error, Debug)]
pub enum ObjectError {
    /// Blocking invocation issued from the receiver's own thread
    #[error("Blocking call to object {object} from its own thread {thread} would deadlock")]
    BlockingSelfCall { object: ObjectId, thread: ThreadId },

    /// Blocking invocation targeting a thread whose loop is not running
    #[error("Thread {thread} is not running, blocking call to object {object} cannot complete")]
    ThreadNotRunning { object: ObjectId, thread: ThreadId },

    /// The queued call was discarded before it could run
    #[error("Call to object {object} was discarded before delivery")]
    CallAbandoned { object: ObjectId },

    /// Direct call into an object whose handler is already running on this stack
    #[error("Object {object} is already handling a call on this thread")]
    Reentrant { object: ObjectId },

    /// Thread move requested for an object that still has a parent
    #[error("Object {object} has a parent and cannot be moved to another thread")]
    HasParent { object: ObjectId },

    /// Operation invoked from a thread that does not own the target
    #[error("Operation on {target} must run on thread {expected}, called from {actual}")]
    WrongThread {
        target: String,
        expected: ThreadId,
        actual: ThreadId,
    },

    /// Start requested on a handle adopted from a foreign OS thread
    #[error("Thread {thread} was adopted from an existing OS thread and cannot be started")]
    AdoptedThread { thread: ThreadId },

    /// Join requested from the thread being joined
    #[error("Thread {thread} cannot join itself")]
    JoinSelf { thread: ThreadId },

    /// The OS refused to spawn the event loop thread
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The event loop thread terminated by panicking
    #[error("Thread {thread} panicked")]
    ThreadPanicked { thread: ThreadId },
}

impl ObjectError {
    /// True for errors caused by calling an operation from the wrong context
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ObjectError::BlockingSelfCall { .. }
                | ObjectError::Reentrant { .. }
                | ObjectError::HasParent { .. }
                | ObjectError::WrongThread { .. }
                | ObjectError::AdoptedThread { .. }
                | ObjectError::JoinSelf { .. }
        )
    }
}
