//! Object and Thread Lifecycle Tests
//!
//! Covers destruction with messages in flight, parent/child orphaning,
//! thread migration of object subtrees and calls abandoned by an exiting
//! event loop.

mod common;

use common::{started, wait_until, Counter, Recorder};
use messaging_objects::{Object, ObjectError, Thread, ThreadState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[test]
fn test_destroy_with_pending_delivers_nothing() {
    let worker = Thread::new("pending-worker");
    let counter = Object::new(Counter::default());
    counter.move_to_thread(&worker).unwrap();

    let deliveries = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let deliveries = Arc::clone(&deliveries);
        counter.invoke_queued(move |c: &mut Counter| {
            deliveries.fetch_add(1, Ordering::SeqCst);
            c.increment(1);
        });
    }
    assert_eq!(worker.queue_len(), 3);

    drop(counter);
    assert_eq!(worker.queue_len(), 0);

    worker.start().unwrap();
    worker.stop().unwrap();
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
    assert_eq!(worker.stats().messages_removed, 3);
}

#[test]
fn test_destroy_keeps_other_receivers_messages() {
    let worker = Thread::new("shared-queue-worker");
    let kept = Object::new(Recorder::default());
    let dropped = Object::new(Recorder::default());
    kept.move_to_thread(&worker).unwrap();
    dropped.move_to_thread(&worker).unwrap();

    kept.invoke_queued(|r: &mut Recorder| r.record(1));
    dropped.invoke_queued(|r: &mut Recorder| r.record(2));
    kept.invoke_queued(|r: &mut Recorder| r.record(3));

    drop(dropped);
    assert_eq!(worker.queue_len(), 2);

    worker.start().unwrap();
    let values = kept
        .invoke_blocking(|r: &mut Recorder| r.values.clone())
        .unwrap();
    assert_eq!(values, vec![1, 3]);
    worker.stop().unwrap();
}

#[test]
fn test_orphaning_children() {
    let parent = Object::new(Counter::default());
    let children: Vec<_> = (0..3)
        .map(|_| Object::with_parent(Recorder::default(), &parent))
        .collect();
    assert_eq!(parent.children().len(), 3);

    drop(parent);

    for child in &children {
        assert!(!child.has_parent());
        assert_eq!(child.parent_id(), None);
        assert_eq!(child.thread(), Thread::current());
        child.invoke_direct(|r: &mut Recorder| r.record(1)).unwrap();
    }
}

#[test]
fn test_move_subtree_with_pending_messages() {
    let worker = Thread::new("subtree-worker");
    let parent = Object::new(Recorder::default());
    let child = Object::with_parent(Recorder::default(), &parent);
    let grandchild = Object::with_parent(Recorder::default(), &child);

    parent.invoke_queued(|r: &mut Recorder| r.record(1));
    grandchild.invoke_queued(|r: &mut Recorder| r.record(2));
    parent.invoke_queued(|r: &mut Recorder| r.record(3));

    parent.move_to_thread(&worker).unwrap();
    assert_eq!(Thread::current().queue_len(), 0);
    assert_eq!(worker.queue_len(), 3);

    worker.start().unwrap();
    for object in [&parent, &child, &grandchild] {
        assert_eq!(object.thread(), worker);
        let moves = object
            .invoke_blocking(|r: &mut Recorder| r.moves.clone())
            .unwrap();
        assert_eq!(moves, vec!["subtree-worker".to_string()]);
    }

    let (values, threads) = parent
        .invoke_blocking(|r: &mut Recorder| (r.values.clone(), r.threads.clone()))
        .unwrap();
    assert_eq!(values, vec![1, 3]);
    assert!(threads.iter().all(|name| name == "subtree-worker"));
    assert_eq!(
        grandchild
            .invoke_blocking(|r: &mut Recorder| r.values.clone())
            .unwrap(),
        vec![2]
    );

    worker.stop().unwrap();
}

#[test]
fn test_move_notification_runs_on_old_thread() {
    let worker = Thread::new("notify-worker");
    let (tx, rx) = mpsc::channel();

    struct Probe(mpsc::Sender<String>);
    impl messaging_objects::ObjectImpl for Probe {
        fn message(&mut self, msg: messaging_objects::Message<Self>) {
            if let messaging_objects::Message::ThreadMove(_) = &msg {
                let _ = self.0.send(Thread::current().name().to_string());
            }
            msg.dispatch(self);
        }
    }

    let probe = Object::new(Probe(tx));
    probe.move_to_thread(&worker).unwrap();

    let notified_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(notified_on, Thread::current().name());
}

#[test]
fn test_exit_abandons_queued_blocking_call() {
    let worker = started("abandon-worker");
    let counter = Object::new(Counter::default());
    counter.move_to_thread(&worker).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    counter.invoke_queued(move |_c: &mut Counter| {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
    });
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    std::thread::scope(|scope| {
        let caller = scope.spawn(|| counter.invoke_blocking(|c: &mut Counter| c.value));

        assert!(wait_until(Duration::from_secs(5), || worker.queue_len() == 1));
        worker.exit();
        release_tx.send(()).unwrap();

        let result = caller.join().unwrap();
        assert!(matches!(result, Err(ObjectError::CallAbandoned { .. })));
    });

    worker.join().unwrap();
    assert_eq!(worker.state(), ThreadState::Stopped);
    assert_eq!(worker.stats().messages_discarded, 1);
    assert_eq!(counter.pending_messages(), 0);
}

#[test]
fn test_blocking_call_after_exit_is_rejected() {
    let worker = started("exited-worker");
    let counter = Object::new(Counter::default());
    counter.move_to_thread(&worker).unwrap();
    worker.stop().unwrap();

    let err = counter
        .invoke_blocking(|c: &mut Counter| c.value)
        .unwrap_err();
    assert!(matches!(err, ObjectError::ThreadNotRunning { .. }));
}

#[test]
fn test_restarted_thread_delivers_again() {
    let worker = started("restart-worker");
    let counter = Object::new(Counter::default());
    counter.move_to_thread(&worker).unwrap();

    counter.invoke_blocking(|c: &mut Counter| c.increment(1)).unwrap();
    worker.stop().unwrap();
    worker.start().unwrap();
    let value = counter
        .invoke_blocking(|c: &mut Counter| {
            c.increment(1);
            c.value
        })
        .unwrap();
    assert_eq!(value, 2);
    worker.stop().unwrap();
}

#[test]
fn test_handler_panic_stops_loop_and_releases_callers() {
    let worker = started("panicking-worker");
    let counter = Object::new(Counter::default());
    counter.move_to_thread(&worker).unwrap();

    let (finished_tx, finished_rx) = mpsc::channel();
    worker.finished().connect_fn(move |_| {
        let _ = finished_tx.send(());
    });

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    counter.invoke_queued(move |_c: &mut Counter| {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        panic!("handler failed");
    });
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    std::thread::scope(|scope| {
        let caller = scope.spawn(|| counter.invoke_blocking(|c: &mut Counter| c.value));

        assert!(wait_until(Duration::from_secs(5), || worker.queue_len() == 1));
        release_tx.send(()).unwrap();

        let result = caller.join().unwrap();
        assert!(matches!(result, Err(ObjectError::CallAbandoned { .. })));
    });

    finished_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(worker.state(), ThreadState::Stopped);
    assert!(matches!(
        worker.join().unwrap_err(),
        ObjectError::ThreadPanicked { .. }
    ));
    assert_eq!(worker.stats().messages_discarded, 1);

    let err = counter
        .invoke_blocking(|c: &mut Counter| c.value)
        .unwrap_err();
    assert!(matches!(err, ObjectError::ThreadNotRunning { .. }));

    worker.start().unwrap();
    let value = counter
        .invoke_blocking(|c: &mut Counter| {
            c.increment(2);
            c.value
        })
        .unwrap();
    assert_eq!(value, 2);
    worker.stop().unwrap();
    assert_eq!(counter.pending_messages(), 0);
}

#[test]
fn test_exited_adopted_thread_rejects_blocking_calls() {
    let counter = std::thread::spawn(|| Object::new(Counter::default()))
        .join()
        .unwrap();
    let owner = counter.thread();
    assert!(owner.is_adopted());
    assert!(wait_until(Duration::from_secs(5), || owner.state() == ThreadState::Stopped));

    let err = counter
        .invoke_blocking(|c: &mut Counter| c.value)
        .unwrap_err();
    assert!(matches!(err, ObjectError::ThreadNotRunning { .. }));
}

#[test]
fn test_adopted_thread_exit_abandons_blocking_call() {
    let (object_tx, object_rx) = mpsc::channel();
    let (exit_tx, exit_rx) = mpsc::channel::<()>();
    let owner = std::thread::spawn(move || {
        let counter = Arc::new(Object::new(Counter::default()));
        object_tx.send(Arc::clone(&counter)).unwrap();
        let _ = exit_rx.recv();
    });
    let counter = object_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    std::thread::scope(|scope| {
        let caller = scope.spawn(|| counter.invoke_blocking(|c: &mut Counter| c.value));

        assert!(wait_until(Duration::from_secs(5), || counter.pending_messages() == 1));
        exit_tx.send(()).unwrap();

        let result = caller.join().unwrap();
        assert!(matches!(result, Err(ObjectError::CallAbandoned { .. })));
    });

    owner.join().unwrap();
    let thread = counter.thread();
    assert!(wait_until(Duration::from_secs(5), || thread.state() == ThreadState::Stopped));
    assert_eq!(thread.stats().messages_discarded, 1);
    assert_eq!(counter.pending_messages(), 0);
}
