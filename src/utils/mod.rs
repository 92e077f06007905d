pub mod logging;
pub mod rate_limiter;
pub mod time;

pub use logging::init_tracing;
pub use rate_limiter::RateLimiter;
pub use time::{epoch_to_utc, format_epoch, PartitionTimezone};
