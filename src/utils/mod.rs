pub mod clock;
pub mod retry;

#[cfg(test)]
pub use clock::FakeClock;
pub use clock::{Clock, SharedClock, SystemClock};
pub use retry::{retry_on_transient, retry_with_backoff, IsTransient, RetryConfig, RetryResult};
