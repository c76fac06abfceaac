//! Integration tests exercising cross-handle advisory lock contention.

use std::{
    thread,
    time::{Duration, Instant},
};

use tempfile::tempdir;
use unilock::{
    cancel::{CancelToken, WaitContext},
    error::FilelockError,
    filelock::Filelock,
};

#[test]
fn exclusive_holders_exclude_each_other() {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join("exclusive.lock");

    let holder = Filelock::new(&path);
    holder.lock().expect("holder lock");

    let contender = Filelock::new(&path);
    assert!(!contender.try_lock().expect("contender try_lock"));

    holder.unlock().expect("holder unlock");
    assert!(contender.try_lock().expect("retry after release"));
    contender.unlock().expect("contender unlock");
}

#[test]
fn shared_holders_coexist_until_a_writer_arrives() {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join("shared.lock");

    let reader_a = Filelock::new(&path);
    let reader_b = Filelock::new(&path);
    reader_a.rlock().expect("reader a");
    assert!(reader_b.try_rlock().expect("reader b"));

    let writer = Filelock::new(&path);
    assert!(!writer.try_lock().expect("writer blocked by readers"));

    reader_a.unlock().expect("reader a unlock");
    reader_b.unlock().expect("reader b unlock");
    assert!(writer.try_lock().expect("writer after readers leave"));
    writer.unlock().expect("writer unlock");
}

#[test]
fn blocking_lock_waits_for_the_current_holder() {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join("handoff.lock");

    let holder = Filelock::new(&path);
    holder.lock().expect("holder lock");

    let waiter_path = path.clone();
    let started = Instant::now();
    let waiter = thread::spawn(move || {
        let waiter = Filelock::new(&waiter_path);
        waiter.lock().expect("waiter lock");
        let waited = started.elapsed();
        waiter.unlock().expect("waiter unlock");
        waited
    });

    thread::sleep(Duration::from_millis(150));
    holder.unlock().expect("holder unlock");

    let waited = waiter.join().expect("waiter thread");
    assert!(
        waited >= Duration::from_millis(100),
        "waiter acquired after {waited:?}, expected to block behind the holder"
    );
}

#[test]
fn polled_acquire_respects_deadline_and_cancellation() {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join("polled.lock");

    let holder = Filelock::new(&path);
    holder.lock().expect("holder lock");

    let contender = Filelock::new(&path);
    let ctx = WaitContext::with_timeout(Duration::from_millis(120));
    let err = contender
        .try_lock_context(&ctx, Duration::from_millis(20))
        .expect_err("deadline should fire while the holder keeps the lock");
    assert!(matches!(err, FilelockError::DeadlineExceeded));

    let token = CancelToken::new();
    token.cancel();
    let ctx = WaitContext::background().token(token);
    let err = contender
        .try_lock_context(&ctx, Duration::from_millis(20))
        .expect_err("cancelled context should abort immediately");
    assert!(matches!(err, FilelockError::Cancelled));

    holder.unlock().expect("holder unlock");
}

#[test]
fn polled_acquire_wins_once_the_holder_leaves() {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join("eventual.lock");

    let holder = Filelock::new(&path);
    holder.lock().expect("holder lock");

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(80));
        holder.unlock().expect("holder unlock");
    });

    let contender = Filelock::new(&path);
    let ctx = WaitContext::with_timeout(Duration::from_secs(5));
    assert!(
        contender
            .try_lock_context(&ctx, Duration::from_millis(10))
            .expect("contender should win after the holder releases")
    );
    contender.unlock().expect("contender unlock");

    releaser.join().expect("releaser thread");
}

#[test]
fn contents_written_under_the_lock_survive_a_handoff() {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join("payload.lock");

    let writer = Filelock::new(&path);
    writer.lock().expect("writer lock");
    writer.write_contents("instance-a").expect("write payload");
    writer.unlock().expect("writer unlock");

    let reader = Filelock::new(&path);
    reader.rlock().expect("reader rlock");
    let payload = reader.read_contents().expect("read payload");
    assert_eq!(payload, "instance-a");
    reader.unlock().expect("reader unlock");
}
