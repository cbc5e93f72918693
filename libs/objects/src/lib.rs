//! Thread-Affine Object Runtime
//!
//! Concurrency substrate for the Lumen camera stack. Every [`Object`] is bound
//! to one [`Thread`] and is only ever touched by that thread's event loop.
//! Other threads reach it by posting messages: queued method calls, blocking
//! method calls that wait for a result, or application payloads. Objects
//! notify each other through [`Signal`]s.
//!
//! # Architecture
//!
//! ```text
//!  caller thread                          receiver thread
//! ┌──────────────────────┐               ┌─────────────────────────────┐
//! │ signal.emit(args)    │               │ Thread (event loop)         │
//! │   │                  │   Envelope    │  ┌───────────────────────┐  │
//! │   ├─ Direct ─────────┼──► runs now   │  │ FIFO message queue    │  │
//! │   ├─ Queued ─────────┼───────────────┼─►│ [m1][m2][m3] ...      │  │
//! │   └─ Blocking ───────┼───────────────┼─►│                       │  │
//! │        ▲ wait reply  │               │  └──────────┬────────────┘  │
//! │        └─────────────┼───────────────┼─────────────┤               │
//! └──────────────────────┘  result       │   Object<T>::message(msg)   │
//!                                        └─────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - Messages posted by one thread to one receiver are delivered in posting
//!   order, one at a time, on the receiver's thread
//! - A blocking call has completed, side effects included, when it returns
//! - Dropping an object drops its undelivered messages and disconnects it
//!   from every signal
//! - Emitting a signal with no connections does nothing
//!
//! # Examples
//!
//! ```rust
//! use messaging_objects::{ConnectionType, Object, ObjectImpl, Signal, Thread};
//!
//! #[derive(Default)]
//! struct Counter {
//!     total: u64,
//! }
//!
//! impl Counter {
//!     fn add(&mut self, value: u64) {
//!         self.total += value;
//!     }
//! }
//!
//! impl ObjectImpl for Counter {}
//!
//! let worker = Thread::new("counter");
//! worker.start().unwrap();
//!
//! let counter = Object::new(Counter::default());
//! counter.move_to_thread(&worker).unwrap();
//!
//! let added: Signal<u64> = Signal::new();
//! added.connect(&counter, Counter::add, ConnectionType::Queued);
//! added.emit(2);
//! added.emit(3);
//!
//! let total = counter.invoke_blocking(|c: &mut Counter| c.total).unwrap();
//! assert_eq!(total, 5);
//!
//! worker.stop().unwrap();
//! ```

pub mod bound_method;
pub mod error;
pub mod idle;
pub mod message;
pub mod object;
pub mod signal;
pub mod thread;

pub use bound_method::{BoundMethod, ConnectionType};
pub use error::{ObjectError, Result};
pub use idle::{BusyGuard, IdleTracker};
pub use message::{Message, MessageKind};
pub use object::{Object, ObjectId, ObjectImpl};
pub use signal::{ConnectionId, Signal};
pub use thread::{Thread, ThreadId, ThreadOptions, ThreadState, ThreadStats, ThreadStatsSnapshot};
