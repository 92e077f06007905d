pub mod audit;
pub mod cursor;
pub mod partition;
pub mod writer;

pub use audit::{audit_instrument, AuditIssue, AuditReport, PartitionSummary};
pub use cursor::{last_recorded_epoch, system_clock, Clock, CursorResolver};
pub use partition::{PartitionLayout, PartitionRow, PARTITION_HEADER};
pub use writer::{PartitionWriter, WriteOutcome};
