use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};

use crate::device::DeviceInit;
use crate::native::{CommandStream, NativeDevice, NativeFence, NativeQueue, QueueType};
use crate::state::GlobalResourceState;

use super::CommandList;

/// A submitted list waiting for its fence value.
type InFlight = (u64, CommandList);

struct QueueShared {
    queue_type: QueueType,
    native: Arc<dyn NativeQueue>,
    fence: Arc<dyn NativeFence>,

    /// Last value signaled on `fence`.
    fence_value: Mutex<u64>,

    /// Reset lists ready to be handed out again.
    available: Mutex<Vec<CommandList>>,

    /// Lists submitted but not yet recycled.
    in_flight: Mutex<usize>,
    in_flight_done: Condvar,
}

/// A hardware queue plus the pool of command lists recorded for it.
///
/// Every queue runs a completion thread that waits for submitted lists to
/// finish on the GPU, resets them and puts them back in the pool.
pub struct CommandQueue {
    shared: Arc<QueueShared>,

    device: Arc<dyn NativeDevice>,

    /// Committed resource states, shared with the other queues of the device.
    global: Arc<GlobalResourceState>,

    init: DeviceInit,

    /// Dropped on shutdown to stop the completion thread.
    sender: Option<Sender<InFlight>>,
    thread: Option<JoinHandle<()>>,
}

impl CommandQueue {
    pub fn new(
        device: Arc<dyn NativeDevice>,
        queue_type: QueueType,
        global: Arc<GlobalResourceState>,
        init: DeviceInit,
    ) -> Result<Self> {
        let native = device
            .create_queue(queue_type)
            .inspect_err(|err| log::error!("failed to create {} queue: {err}", queue_type.name()))
            .with_context(|| format!("failed to create {} queue", queue_type.name()))?;

        let shared = Arc::new(QueueShared {
            queue_type,
            fence: native.fence(),
            native,
            fence_value: Mutex::new(0),
            available: Mutex::new(Vec::new()),
            in_flight: Mutex::new(0),
            in_flight_done: Condvar::new(),
        });

        let (sender, receiver) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name(format!("marduk-gpu-{}-completion", queue_type.name()))
            .spawn({
                let shared = shared.clone();
                move || completion_loop(shared, receiver)
            })
            .context("failed to spawn queue completion thread")?;

        log::debug!("{} queue created", queue_type.name());

        Ok(Self {
            shared,
            device,
            global,
            init,
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    #[inline]
    pub fn queue_type(&self) -> QueueType {
        self.shared.queue_type
    }

    /// Returns a recycled list, or a new one if none is available.
    pub fn get_command_list(&self) -> CommandList {
        if let Some(list) = self.shared.available.lock().pop() {
            return list;
        }

        log::debug!("{} queue: new command list", self.queue_type().name());
        CommandList::new(self.device.clone(), self.queue_type(), &self.init)
    }

    /// Submits `list` and returns the fence value that marks its completion.
    pub fn execute(&self, list: CommandList) -> u64 {
        self.execute_command_lists(vec![list])
    }

    /// Submits `lists` in order and signals the fence once.
    ///
    /// Each list is preceded by a companion list holding the barriers that
    /// move its first-use resources out of their committed states. Closing,
    /// submission and commit all happen inside one commit epoch, so commits
    /// from different queues never interleave.
    pub fn execute_command_lists(&self, lists: Vec<CommandList>) -> u64 {
        let mut submitted: Vec<(CommandList, bool)> = Vec::with_capacity(lists.len() * 2);

        let mut epoch = self.global.begin_commit_epoch();

        for mut list in lists {
            debug_assert_eq!(
                list.list_type(),
                self.queue_type(),
                "command list submitted to the wrong queue"
            );

            let mut pending = self.get_command_list();
            let has_pending = list.close(&mut pending, &mut epoch);
            pending.seal();

            submitted.push((pending, has_pending));
            submitted.push((list, true));
        }

        let streams: Vec<&CommandStream> = submitted
            .iter()
            .filter(|(_, submit)| *submit)
            .map(|(list, _)| list.stream())
            .collect();
        let stream_count = streams.len();
        self.shared.native.execute(&streams);

        let fence_value = self.signal();

        // Enqueued before the epoch ends so completions arrive in fence order.
        *self.shared.in_flight.lock() += submitted.len();
        if let Some(sender) = &self.sender {
            for (list, _) in submitted {
                if sender.send((fence_value, list)).is_err() {
                    log::error!("{} queue: completion thread is gone", self.queue_type().name());
                }
            }
        }
        drop(epoch);

        log::trace!(
            "{} queue: executed {stream_count} stream(s) at fence value {fence_value}",
            self.queue_type().name()
        );
        fence_value
    }

    /// Signals the next fence value and returns it.
    pub fn signal(&self) -> u64 {
        let mut value = self.shared.fence_value.lock();
        *value += 1;
        self.shared.native.signal(*value);
        *value
    }

    /// Last signaled fence value.
    pub fn fence_value(&self) -> u64 {
        *self.shared.fence_value.lock()
    }

    pub fn is_fence_complete(&self, fence_value: u64) -> bool {
        self.shared.fence.completed_value() >= fence_value
    }

    /// Blocks until the GPU reached `fence_value`.
    pub fn wait_for_fence_value(&self, fence_value: u64) {
        if !self.is_fence_complete(fence_value) {
            self.shared.fence.wait(fence_value, None);
        }
    }

    /// Blocks until the GPU reached `fence_value` or `timeout` expired.
    ///
    /// Returns whether the value was reached.
    pub fn wait_for_fence_value_timeout(&self, fence_value: u64, timeout: Duration) -> bool {
        if self.is_fence_complete(fence_value) {
            return true;
        }

        let reached = self.shared.fence.wait(fence_value, Some(timeout));
        if !reached {
            log::warn!(
                "{} queue: fence value {fence_value} not reached after {timeout:?}",
                self.queue_type().name()
            );
        }
        reached
    }

    /// Waits for `fence_value` with the device's frame latency timeout.
    pub fn wait_for_frame(&self, fence_value: u64) -> bool {
        self.wait_for_fence_value_timeout(fence_value, self.init.frame_latency_timeout)
    }

    /// Blocks until every submitted list was recycled and the GPU is idle.
    pub fn flush(&self) {
        {
            let mut in_flight = self.shared.in_flight.lock();
            while *in_flight > 0 {
                self.shared.in_flight_done.wait(&mut in_flight);
            }
        }
        self.wait_for_fence_value(self.fence_value());
    }

    /// Makes this queue wait on the GPU for everything signaled on `other`.
    pub fn wait(&self, other: &CommandQueue) {
        self.shared
            .native
            .wait(other.shared.fence.as_ref(), other.fence_value());
    }

    /// Lists submitted and not yet recycled.
    pub fn in_flight_count(&self) -> usize {
        *self.shared.in_flight.lock()
    }

    /// Recycled lists ready for [`get_command_list`](Self::get_command_list).
    pub fn available_count(&self) -> usize {
        self.shared.available.lock().len()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Closing the channel lets the completion thread drain and exit.
        self.sender = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("{} queue: completion thread panicked", self.queue_type().name());
            }
        }
    }
}

fn completion_loop(shared: Arc<QueueShared>, receiver: Receiver<InFlight>) {
    while let Ok((fence_value, mut list)) = receiver.recv() {
        shared.fence.wait(fence_value, None);

        list.reset();
        shared.available.lock().push(list);

        let mut in_flight = shared.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            shared.in_flight_done.notify_all();
        }
    }

    log::debug!("{} queue: completion thread stopped", shared.queue_type.name());
}
