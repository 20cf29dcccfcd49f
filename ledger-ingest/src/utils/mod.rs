//! Database utilities

pub mod db_retry;
pub mod pool_monitor;

pub use db_retry::retry_on_lock;
pub use pool_monitor::{begin_monitored, begin_monitored_on, MonitoredTransaction};
