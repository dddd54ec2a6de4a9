//! Expiry Countdown
//!
//! Daily countdown notifications for household inventories. Every run finds
//! the items that expire in one, two or three calendar days, writes one
//! idempotent notification record per household member and pushes it to the
//! member's devices.
//!
//! ```no_run
//! use chrono::Utc;
//! use expiry_countdown::prelude::*;
//!
//! # async fn run() -> expiry_countdown::error::Result<()> {
//! let backend = Backend::rest(&BackendConfig::from_env()?)?;
//! let runner = DailyRunner::new(&backend, &ServiceConfig::from_env()?);
//! let summary = runner.run_once(Utc::now()).await?;
//! println!("{} notified", summary.notified);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod expiry;
pub mod membership;
pub mod memory;
pub mod notifications;
pub mod runner;
pub mod sample;
pub mod scanner;
pub mod schedule;
pub mod tokens;

pub use expiry_countdown_push as push;
pub use expiry_countdown_store as store;

/// Re-exports of the commonly used types
pub mod prelude {
    pub use crate::backend::Backend;
    pub use crate::config::{BackendConfig, MessageCatalog, PlatformHints, ServiceConfig};
    pub use crate::error::Error;
    pub use crate::memory::MemoryBackend;
    pub use crate::runner::{DailyRunner, RunSummary};
    pub use crate::sample::{SampleError, SampleInvocation, SampleRequest, SampleResponse};
}
