// tests/test_task_scheduler.rs
// Tests for the N-buffered task scheduler driven by a host-controlled queue
// This file exists to validate the frames-in-flight bound, flush completeness and misuse handling.
// RELEVANT FILES:src/core/scheduler.rs,src/core/queue.rs,src/core/fence.rs

use raytrace_accel::core::{CommandQueue, SyncFence, TaskScheduler};
use raytrace_accel::{AccelError, AccelResult, ErrorKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const LONG_WAIT: Duration = Duration::from_secs(10);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A submitted slot the test can complete by hand
#[derive(Clone)]
struct Submission {
    slot: usize,
    value: u64,
    fence: Arc<SyncFence>,
    commands: Vec<String>,
}

#[derive(Default)]
struct DeviceLog {
    submissions: Mutex<Vec<Submission>>,
    resets: Mutex<Vec<usize>>,
    waits: Mutex<Vec<u64>>,
    fail_next_submit: AtomicBool,
    complete_on_submit: AtomicBool,
}

/// Queue whose "device" only finishes work when the test says so
#[derive(Clone, Default)]
struct ManualQueue(Arc<DeviceLog>);

impl std::ops::Deref for ManualQueue {
    type Target = DeviceLog;

    fn deref(&self) -> &DeviceLog {
        &self.0
    }
}

impl ManualQueue {
    fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    fn complete_all(&self) {
        for s in self.submissions() {
            s.fence.signal(s.value).unwrap();
        }
    }
}

impl CommandQueue for ManualQueue {
    type Recorder = Vec<String>;

    fn create_recorder(&self, _slot: usize) -> AccelResult<Vec<String>> {
        Ok(Vec::new())
    }

    fn reset_recorder(&self, slot: usize, recorder: &mut Vec<String>) -> AccelResult<()> {
        recorder.clear();
        self.resets.lock().unwrap().push(slot);
        Ok(())
    }

    fn submit(
        &self,
        slot: usize,
        recorder: &mut Vec<String>,
        fence: &Arc<SyncFence>,
        value: u64,
    ) -> AccelResult<()> {
        if self.fail_next_submit.swap(false, Ordering::SeqCst) {
            return Err(AccelError::submission("device lost"));
        }
        fence.request(value)?;
        self.submissions.lock().unwrap().push(Submission {
            slot,
            value,
            fence: fence.clone(),
            commands: std::mem::take(recorder),
        });
        if self.complete_on_submit.load(Ordering::SeqCst) {
            fence.signal(value)?;
        }
        Ok(())
    }

    fn wait(&self, fence: &SyncFence, value: u64, timeout: Duration) -> AccelResult<()> {
        self.waits.lock().unwrap().push(value);
        fence.wait_for(value, timeout)
    }
}

fn scheduler(slots: usize, timeout: Duration) -> (ManualQueue, TaskScheduler<ManualQueue>) {
    let queue = ManualQueue::default();
    let scheduler = TaskScheduler::initialize(queue.clone(), slots, timeout).unwrap();
    (queue, scheduler)
}

#[test]
fn slots_round_robin_with_increasing_fence_values() -> AccelResult<()> {
    init_logging();
    let (queue, mut scheduler) = scheduler(3, LONG_WAIT);

    for frame in 0..3 {
        scheduler.record()?;
        scheduler.recorder_mut()?.push(format!("frame-{}", frame));
        scheduler.execute()?;
    }

    let subs = queue.submissions();
    assert_eq!(subs.iter().map(|s| s.slot).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(subs.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(subs[1].commands, vec!["frame-1".to_string()]);
    assert_eq!(scheduler.current_slot(), 0);
    assert_eq!(scheduler.last_fence_value(), 3);
    assert_eq!(scheduler.stats().frames_submitted, 3);

    queue.complete_all();
    Ok(())
}

#[test]
fn record_blocks_until_the_oldest_slot_completes() -> AccelResult<()> {
    init_logging();
    let slots = 2;
    let (queue, mut scheduler) = scheduler(slots, LONG_WAIT);

    for _ in 0..slots {
        scheduler.record()?;
        scheduler.execute()?;
    }

    let first = queue.submissions()[0].clone();
    let released = Arc::new(AtomicBool::new(false));
    let signaller = {
        let released = released.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            released.store(true, Ordering::SeqCst);
            first.fence.signal(first.value).unwrap();
        })
    };

    let started = Instant::now();
    scheduler.record()?;
    assert!(
        released.load(Ordering::SeqCst),
        "record returned before slot 0 was signalled"
    );
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(scheduler.stats().stalled_records, 1);
    signaller.join().unwrap();

    scheduler.execute()?;
    queue.complete_all();
    Ok(())
}

#[test]
fn flush_waits_for_every_slot() -> AccelResult<()> {
    init_logging();
    let (queue, mut scheduler) = scheduler(3, LONG_WAIT);
    for _ in 0..5 {
        if scheduler.current_slot() == 0 && scheduler.last_fence_value() > 0 {
            queue.complete_all();
        }
        scheduler.record()?;
        scheduler.execute()?;
    }

    let pending = queue.clone();
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        pending.complete_all();
    });
    scheduler.flush()?;
    worker.join().unwrap();

    for slot in 0..scheduler.slot_count() {
        let fence = scheduler.slot_fence(slot).unwrap();
        let value = scheduler.slot_fence_value(slot).unwrap();
        assert!(fence.is_complete(value), "slot {} still pending after flush", slot);
    }
    Ok(())
}

#[test]
fn stuck_fence_times_out_as_a_submission_failure() -> AccelResult<()> {
    init_logging();
    let (_queue, mut scheduler) = scheduler(1, Duration::from_millis(20));
    scheduler.record()?;
    scheduler.execute()?;

    let err = scheduler.record().unwrap_err();
    assert!(matches!(err, AccelError::FenceTimeout { value: 1, .. }));
    assert_eq!(err.kind(), ErrorKind::Submission);
    Ok(())
}

#[test]
fn misuse_is_rejected_before_touching_the_queue() -> AccelResult<()> {
    init_logging();
    let (queue, mut scheduler) = scheduler(2, LONG_WAIT);

    let err = scheduler.execute().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(scheduler.recorder_mut().is_err());

    scheduler.record()?;
    let err = scheduler.record().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    scheduler.execute()?;

    assert_eq!(queue.submissions().len(), 1);
    assert!(TaskScheduler::initialize(ManualQueue::default(), 0, LONG_WAIT).is_err());

    queue.complete_all();
    Ok(())
}

#[test]
fn failed_submission_faults_the_slot() -> AccelResult<()> {
    init_logging();
    let (queue, mut scheduler) = scheduler(1, LONG_WAIT);

    scheduler.record()?;
    queue.fail_next_submit.store(true, Ordering::SeqCst);
    let err = scheduler.execute().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Submission);

    // no retry: the slot stays unusable
    let err = scheduler.record().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Submission);
    assert!(queue.submissions().is_empty());
    assert!(scheduler.flush().is_ok());
    Ok(())
}

#[test]
fn recorders_are_reset_before_reuse() -> AccelResult<()> {
    init_logging();
    let (queue, mut scheduler) = scheduler(1, LONG_WAIT);

    scheduler.record()?;
    scheduler.recorder_mut()?.push("a".into());
    scheduler.execute()?;
    queue.complete_all();

    scheduler.record()?;
    assert!(scheduler.recorder_mut()?.is_empty());
    scheduler.execute()?;
    queue.complete_all();

    assert_eq!(*queue.resets.lock().unwrap(), vec![0, 0]);
    Ok(())
}

#[test]
fn already_completed_slots_are_still_retired_through_the_queue() -> AccelResult<()> {
    init_logging();
    let slots = 3;
    let (queue, mut scheduler) = scheduler(slots, LONG_WAIT);
    // a device fast enough that every fence is done before its slot comes round
    queue.complete_on_submit.store(true, Ordering::SeqCst);

    for _ in 0..100 {
        scheduler.record()?;
        scheduler.execute()?;
    }
    assert_eq!(scheduler.stats().stalled_records, 0);

    let submitted = queue.submissions().len();
    let retired: HashSet<u64> = queue
        .waits
        .lock()
        .unwrap()
        .iter()
        .copied()
        .filter(|&v| v > 0)
        .collect();
    assert_eq!(submitted, 100);
    assert!(
        submitted - retired.len() <= slots,
        "{} submissions never retired",
        submitted - retired.len()
    );
    Ok(())
}
