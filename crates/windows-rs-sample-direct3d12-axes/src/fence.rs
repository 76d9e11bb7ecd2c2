use tracing::trace;

use crate::gpu::Backend;
use crate::gpu::CommandQueue;
use crate::gpu::Device;
use crate::gpu::Fence;
use crate::gpu::FenceEvent;
use crate::sample_error::MyResult;

/// One global fence: every frame waits for the GPU to drain before the next is recorded.
pub struct FrameFence<B: Backend> {
    fence: B::Fence,
    event: B::Event,
    value: u64,
}

impl<B: Backend> FrameFence<B> {
    pub fn new(device: &B::Device) -> MyResult<Self> {
        let fence = device.create_fence(0)?;
        let event = device.create_event()?;
        Ok(Self {
            fence,
            event,
            value: 1,
        })
    }

    /// Value the next `signal_and_wait` will signal.
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn completed_value(&self) -> u64 {
        self.fence.completed_value()
    }

    /// Signals the current value on `queue` and blocks until the GPU reaches it.
    /// Returns the value that was signalled.
    pub fn signal_and_wait(&mut self, queue: &B::Queue) -> MyResult<u64> {
        let target = self.value;
        queue.signal(&self.fence, target)?;

        if self.fence.completed_value() < target {
            self.fence.set_event_on_completion(target, &self.event)?;
            self.event.wait();
        }
        trace!("fence reached {target}");

        self.value += 1;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessBackend;
    use crate::headless::HeadlessInstance;
    use crate::headless::QueuedWork;

    #[test]
    fn starts_at_one_with_nothing_completed() {
        let instance = HeadlessInstance::default();
        let fence = FrameFence::<HeadlessBackend>::new(&instance.device()).unwrap();
        assert_eq!(fence.value(), 1);
        assert_eq!(fence.completed_value(), 0);
    }

    #[test]
    fn idle_queue_completes_without_waiting() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let queue = device.create_command_queue().unwrap();
        let mut fence = FrameFence::<HeadlessBackend>::new(&device).unwrap();

        assert_eq!(fence.signal_and_wait(&queue).unwrap(), 1);
        assert!(fence.completed_value() >= 1);
        assert_eq!(fence.value(), 2);
        assert_eq!(instance.stats().event_waits, 0);
    }

    #[test]
    fn busy_queue_blocks_on_the_event_until_reached() {
        let instance = HeadlessInstance::default();
        let device = instance.device();
        let queue = device.create_command_queue().unwrap();
        let mut fence = FrameFence::<HeadlessBackend>::new(&device).unwrap();

        for expected in 1..=3 {
            instance.enqueue(QueuedWork::Busy);
            let signalled = fence.signal_and_wait(&queue).unwrap();
            assert_eq!(signalled, expected);
            assert!(fence.completed_value() >= signalled);
        }
        assert_eq!(fence.value(), 4);
        assert_eq!(instance.stats().event_waits, 3);
    }
}
