//! Flotilla proxy plumbing.
//!
//! # Components
//!
//! - **`event`**: target change events emitted as tasks come and go
//! - **`upstream`**: per-app upstream target tables fed by those events
//! - **`dns`**: DNS exchanger abstraction with composable decorators

pub mod dns;
pub mod event;
pub mod upstream;

pub use dns::{
    Decorator, Exchange, ExchangeError, Exchanger, FnExchanger, Query, Record, RecordExchanger,
    decorate, ignore_truncated,
};
pub use event::{Change, TargetChangeEvent};
pub use upstream::{Target, Upstream, UpstreamLoader, normalize_app_id};
