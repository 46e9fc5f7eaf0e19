//! flotilla-scheduler: launch passes and task status ingestion.
//!
//! The scheduler sits between the app registry and the cluster resource
//! manager:
//!
//! ```text
//! Scheduler
//!   ├── AppStore (read apps, swap in updated copies)
//!   ├── Connector (launch / kill calls)
//!   └── TargetChangeEvent sender (to the upstream loader)
//! ```

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{DEFAULT_WEIGHT, Scheduler};
