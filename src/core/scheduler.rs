//! N-buffered command recording with fence-bounded frames in flight.
//!
//! `TaskScheduler` round-robins a fixed number of command slots. `record`
//! waits for the slot's previous submission before reusing it, `execute`
//! submits and moves on without waiting, and `flush` drains everything.

use crate::core::fence::SyncFence;
use crate::core::queue::{CommandQueue, WgpuQueue};
use crate::error::{AccelError, AccelResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wgpu::CommandEncoder;

/// Statistics for scheduler usage
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Number of successful `execute` calls
    pub frames_submitted: u64,
    /// Number of `record` calls that had to wait on the GPU
    pub stalled_records: u64,
    /// Total time spent blocked in `record`
    pub stall_time: Duration,
    /// Number of slots
    pub slot_count: usize,
    /// Slot that the next `record` will use
    pub current_slot: usize,
}

/// One in-flight frame's recording state
struct CommandSlot<R> {
    recorder: R,
    fence: Arc<SyncFence>,
    /// Fence value this slot last asked the device to signal
    fence_value: u64,
    /// A submission from this slot failed; the slot is unusable
    faulted: bool,
}

pub struct TaskScheduler<Q: CommandQueue> {
    queue: Q,
    slots: Vec<CommandSlot<Q::Recorder>>,
    current: usize,
    last_fence_value: u64,
    recording: bool,
    fence_timeout: Duration,
    stats: SchedulerStats,
}

impl<Q: CommandQueue> TaskScheduler<Q> {
    /// Allocate `slot_count` command slots on `queue`.
    ///
    /// A scheduler that fails here is dropped; nothing partial is kept.
    pub fn initialize(queue: Q, slot_count: usize, fence_timeout: Duration) -> AccelResult<Self> {
        if slot_count == 0 {
            return Err(AccelError::precondition(
                "task scheduler needs at least one slot",
            ));
        }

        let mut slots = Vec::with_capacity(slot_count);
        for i in 0..slot_count {
            let recorder = queue.create_recorder(i)?;
            slots.push(CommandSlot {
                recorder,
                fence: Arc::new(SyncFence::new(format!("task-slot-{}", i))),
                fence_value: 0,
                faulted: false,
            });
        }
        log::debug!("task scheduler initialized with {} slots", slot_count);

        Ok(Self {
            queue,
            slots,
            current: 0,
            last_fence_value: 0,
            recording: false,
            fence_timeout,
            stats: SchedulerStats {
                slot_count,
                ..Default::default()
            },
        })
    }

    /// Begin recording into the current slot.
    ///
    /// Blocks until the slot's last submission has completed, which bounds
    /// the host to `slot_count` frames ahead of the device.
    pub fn record(&mut self) -> AccelResult<()> {
        if self.recording {
            return Err(AccelError::precondition(
                "record called while a slot is already recording",
            ));
        }

        let index = self.current;
        let slot = &mut self.slots[index];
        if slot.faulted {
            return Err(AccelError::submission(format!(
                "slot {} faulted during an earlier submission",
                index
            )));
        }

        // The queue retires the slot's submission even when the fence
        // already completed.
        let stalled = !slot.fence.is_complete(slot.fence_value);
        let started = Instant::now();
        if stalled {
            log::debug!(
                "slot {} waiting for fence value {} (completed {})",
                index,
                slot.fence_value,
                slot.fence.completed_value()
            );
        }
        self.queue
            .wait(&slot.fence, slot.fence_value, self.fence_timeout)?;
        if stalled {
            self.stats.stalled_records += 1;
            self.stats.stall_time += started.elapsed();
        }

        self.queue.reset_recorder(index, &mut slot.recorder)?;
        self.recording = true;
        Ok(())
    }

    /// Close the current slot, submit it, and advance to the next slot.
    ///
    /// Returns as soon as the work is submitted.
    pub fn execute(&mut self) -> AccelResult<()> {
        if !self.recording {
            return Err(AccelError::precondition(
                "execute called without a matching record",
            ));
        }
        self.recording = false;

        let index = self.current;
        let value = self.last_fence_value + 1;
        let slot = &mut self.slots[index];
        if let Err(e) = self
            .queue
            .submit(index, &mut slot.recorder, &slot.fence, value)
        {
            slot.faulted = true;
            log::error!("slot {} submission failed: {}", index, e);
            return Err(e);
        }

        self.last_fence_value = value;
        slot.fence_value = value;
        self.current = (index + 1) % self.slots.len();
        self.stats.frames_submitted += 1;
        self.stats.current_slot = self.current;
        Ok(())
    }

    /// Block until every slot's most recent submission has completed.
    pub fn flush(&mut self) -> AccelResult<()> {
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.faulted {
                log::warn!("flush skipping faulted slot {}", index);
                continue;
            }
            self.queue
                .wait(&slot.fence, slot.fence_value, self.fence_timeout)?;
        }
        Ok(())
    }

    /// Recording target of the current slot, for any stage that appends work.
    pub fn recorder_mut(&mut self) -> AccelResult<&mut Q::Recorder> {
        if !self.recording {
            return Err(AccelError::precondition(
                "no slot is recording; call record first",
            ));
        }
        Ok(&mut self.slots[self.current].recorder)
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot_fence(&self, index: usize) -> Option<Arc<SyncFence>> {
        self.slots.get(index).map(|slot| slot.fence.clone())
    }

    /// Fence value the given slot last requested
    pub fn slot_fence_value(&self, index: usize) -> Option<u64> {
        self.slots.get(index).map(|slot| slot.fence_value)
    }

    pub fn last_fence_value(&self) -> u64 {
        self.last_fence_value
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }
}

impl TaskScheduler<WgpuQueue> {
    /// The current slot's command encoder.
    pub fn encoder(&mut self) -> AccelResult<&mut CommandEncoder> {
        self.recorder_mut()?.encoder_mut()
    }
}

impl<Q: CommandQueue> Drop for TaskScheduler<Q> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("task scheduler teardown: {}", e);
        }
    }
}
