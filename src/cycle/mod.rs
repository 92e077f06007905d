pub mod orchestrator;
pub mod report;

pub use orchestrator::FetchCycle;
pub use report::{CyclePhase, CycleReport, InstrumentReport, InstrumentStatus};
