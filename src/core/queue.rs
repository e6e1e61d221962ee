//! Device-side half of the task scheduler.
//!
//! `CommandQueue` is the seam between `TaskScheduler` and whatever executes
//! recorded work. `WgpuQueue` is the production implementation; tests drive
//! the scheduler with a queue whose completions they control.

use crate::core::fence::SyncFence;
use crate::error::{AccelError, AccelResult, ErrorKind};
use crate::gpu::GpuContext;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wgpu::{CommandEncoder, CommandEncoderDescriptor, SubmissionIndex};

/// Allocates recording targets, submits them and waits on their fences.
pub trait CommandQueue: Send + Sync {
    /// Per-slot recording target (allocator plus command list)
    type Recorder: Send;

    fn create_recorder(&self, slot: usize) -> AccelResult<Self::Recorder>;

    /// Make the recorder ready for a new frame. Called only after the slot's
    /// previous submission has completed.
    fn reset_recorder(&self, slot: usize, recorder: &mut Self::Recorder) -> AccelResult<()>;

    /// Close and submit the recorded work; `value` must be requested on
    /// `fence` and signaled once the work completes.
    fn submit(
        &self,
        slot: usize,
        recorder: &mut Self::Recorder,
        fence: &Arc<SyncFence>,
        value: u64,
    ) -> AccelResult<()>;

    /// Block until `fence` reaches `value`.
    fn wait(&self, fence: &SyncFence, value: u64, timeout: Duration) -> AccelResult<()> {
        fence.wait_for(value, timeout)
    }
}

/// Recording target of one wgpu command slot
pub struct WgpuRecorder {
    label: String,
    encoder: Option<CommandEncoder>,
}

impl WgpuRecorder {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_open(&self) -> bool {
        self.encoder.is_some()
    }

    /// The open command encoder; errors outside Record/Execute.
    pub fn encoder_mut(&mut self) -> AccelResult<&mut CommandEncoder> {
        let label = &self.label;
        self.encoder.as_mut().ok_or_else(|| {
            AccelError::precondition(format!("{} is not recording", label))
        })
    }
}

/// `CommandQueue` backed by a wgpu device and queue
pub struct WgpuQueue {
    ctx: GpuContext,
    /// Fence value -> fence and submission that signals it
    submissions: Mutex<HashMap<u64, (Arc<SyncFence>, SubmissionIndex)>>,
}

impl WgpuQueue {
    pub fn new(ctx: GpuContext) -> Self {
        Self {
            ctx,
            submissions: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Submissions not yet retired by a wait or a later submit
    pub fn pending_count(&self) -> usize {
        self.submissions.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl CommandQueue for WgpuQueue {
    type Recorder = WgpuRecorder;

    fn create_recorder(&self, slot: usize) -> AccelResult<WgpuRecorder> {
        Ok(WgpuRecorder {
            label: format!("task-slot-{}", slot),
            encoder: None,
        })
    }

    fn reset_recorder(&self, _slot: usize, recorder: &mut WgpuRecorder) -> AccelResult<()> {
        let label = recorder.label.clone();
        let encoder = self.ctx.guarded("reset command recorder", ErrorKind::Submission, |device| {
            device.create_command_encoder(&CommandEncoderDescriptor {
                label: Some(&label),
            })
        })?;
        recorder.encoder = Some(encoder);
        Ok(())
    }

    fn submit(
        &self,
        _slot: usize,
        recorder: &mut WgpuRecorder,
        fence: &Arc<SyncFence>,
        value: u64,
    ) -> AccelResult<()> {
        let encoder = recorder.encoder.take().ok_or_else(|| {
            AccelError::precondition(format!("{} has nothing recorded", recorder.label))
        })?;

        fence.request(value)?;
        let queue = &self.ctx.queue;
        let index = self.ctx.guarded("submit command recorder", ErrorKind::Submission, |_| {
            queue.submit(Some(encoder.finish()))
        })?;

        let signal_fence = fence.clone();
        queue.on_submitted_work_done(move || {
            if let Err(e) = signal_fence.signal(value) {
                log::error!("completion callback: {}", e);
            }
        });

        if let Ok(mut submissions) = self.submissions.lock() {
            submissions.retain(|&v, (f, _)| !f.is_complete(v));
            submissions.insert(value, (fence.clone(), index));
        }
        Ok(())
    }

    fn wait(&self, fence: &SyncFence, value: u64, timeout: Duration) -> AccelResult<()> {
        if fence.is_complete(value) {
            if let Ok(mut submissions) = self.submissions.lock() {
                submissions.remove(&value);
            }
            return Ok(());
        }

        let index = self
            .submissions
            .lock()
            .ok()
            .and_then(|mut submissions| submissions.remove(&value));
        match index {
            Some((_, index)) => {
                self.ctx
                    .device
                    .poll(wgpu::Maintain::WaitForSubmissionIndex(index));
            }
            None => {
                self.ctx.device.poll(wgpu::Maintain::Wait);
            }
        }
        fence.wait_for(value, timeout)
    }
}
