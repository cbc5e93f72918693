//! Shared fixtures for object runtime integration tests

#![allow(dead_code)]

use messaging_objects::{Message, ObjectImpl, Thread};
use std::time::{Duration, Instant};

/// Records every value it receives along with the thread it ran on
#[derive(Debug, Default)]
pub struct Recorder {
    pub values: Vec<u64>,
    pub threads: Vec<String>,
    pub moves: Vec<String>,
}

impl Recorder {
    pub fn record(&mut self, value: u64) {
        self.values.push(value);
        self.threads.push(Thread::current().name().to_string());
    }

    pub fn record_pair(&mut self, (producer, seq): (u64, u64)) {
        self.record(producer * 1_000_000 + seq);
    }
}

impl ObjectImpl for Recorder {
    fn message(&mut self, msg: Message<Self>) {
        match msg {
            Message::ThreadMove(target) => self.moves.push(target.name().to_string()),
            other => other.dispatch(self),
        }
    }
}

/// Plain counter with the default message handler
#[derive(Debug, Default)]
pub struct Counter {
    pub value: u64,
}

impl Counter {
    pub fn increment(&mut self, by: u64) {
        self.value += by;
    }
}

impl ObjectImpl for Counter {}

/// Create and start a named event loop thread
pub fn started(name: &str) -> Thread {
    let thread = Thread::new(name);
    thread.start().expect("failed to start event loop");
    thread
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}
