pub mod loader;

pub use loader::{load_config, load_from_env, parse_config, validate_config};
