//! Reconnect policy — backoff schedule applied between connection attempts.
//!
//! ```text
//! disconnect → attempt n → [BackoffPolicy.next_delay(n)] → connect()
//! ```

pub mod backoff;

pub use backoff::{BackoffConfig, BackoffPolicy};
