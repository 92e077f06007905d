pub mod types;
pub mod error;
pub mod config;
pub mod api;
pub mod data;
pub mod cycle;
pub mod utils;

pub use types::*;
pub use error::{Result, TickError};
