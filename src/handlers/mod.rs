pub mod config;
pub mod sessions;

pub use config::{get_config, update_config};
pub use sessions::{get_transcript, retry_evaluation};
