mod buffer;
mod dead_letter;
mod poller;
mod stream;

pub use buffer::{
    MessageId, Queue, QueueStats, ReceiptHandle, ReceivedMessage, RedrivePolicy, ReleaseOutcome,
    DEFAULT_VISIBILITY_TIMEOUT,
};
pub use dead_letter::{DlqMessage, DlqStats};
pub use poller::{PollOutcome, PollerConfig, QueuePoller};
pub use stream::{ChangeStream, StreamConfig, StreamProcessor, StreamRecord, StreamReport};
