//! Blocking device-to-host buffer reads through the task scheduler.

use crate::core::queue::WgpuQueue;
use crate::core::resource::GpuBuffer;
use crate::core::scheduler::TaskScheduler;
use crate::error::{AccelError, AccelResult};
use futures_intrusive::channel::shared::oneshot_channel;

/// Copy the first `count` elements of `src` back to the host.
///
/// Records the copy in its own frame, flushes the scheduler and maps a
/// staging buffer. Must be called between frames.
pub fn read_buffer<T: bytemuck::Pod>(
    scheduler: &mut TaskScheduler<WgpuQueue>,
    src: &GpuBuffer,
    count: usize,
) -> AccelResult<Vec<T>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let bytes = (count * std::mem::size_of::<T>()) as u64;
    if bytes > src.size() {
        return Err(AccelError::precondition(format!(
            "readback of {} bytes exceeds '{}' ({} bytes)",
            bytes,
            src.label(),
            src.size()
        )));
    }

    let ctx = scheduler.queue().context().clone();
    let staging = GpuBuffer::readback(&ctx, &format!("{}-readback", src.label()), bytes)?;

    scheduler.record()?;
    scheduler
        .encoder()?
        .copy_buffer_to_buffer(src.raw(), 0, staging.raw(), 0, bytes);
    scheduler.execute()?;
    scheduler.flush()?;

    let slice = staging.raw().slice(..);
    let (sender, receiver) = oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        sender.send(result).ok();
    });
    ctx.device.poll(wgpu::Maintain::Wait);

    pollster::block_on(receiver.receive())
        .ok_or_else(|| AccelError::readback(format!("map of '{}' was dropped", src.label())))?
        .map_err(|e| AccelError::readback(format!("map of '{}' failed: {:?}", src.label(), e)))?;

    let out = {
        let data = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    staging.raw().unmap();
    Ok(out)
}
