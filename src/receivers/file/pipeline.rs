// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded};
use crate::receivers::file::message::Message;

/// Hands out the channel a new tailer sends its messages to.
pub trait PipelineProvider: Send + Sync {
    fn next_pipeline_chan(&self) -> BoundedSender<Message>;
}

/// Fixed set of bounded pipeline channels handed out round-robin.
pub struct ChannelProvider {
    senders: Vec<BoundedSender<Message>>,
    next: AtomicUsize,
}

impl ChannelProvider {
    /// Create `pipelines` channels of `capacity` messages each, returning the
    /// receiving ends in pipeline order.
    pub fn new(pipelines: usize, capacity: usize) -> (Self, Vec<BoundedReceiver<Message>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..pipelines.max(1)).map(|_| bounded(capacity)).unzip();

        (
            Self {
                senders,
                next: AtomicUsize::new(0),
            },
            receivers,
        )
    }

    pub fn pipelines(&self) -> usize {
        self.senders.len()
    }
}

impl PipelineProvider for ChannelProvider {
    fn next_pipeline_chan(&self) -> BoundedSender<Message> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[idx].clone()
    }
}
