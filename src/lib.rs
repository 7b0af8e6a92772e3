pub mod config;
pub mod delve_config;
pub mod errors;
pub mod evaluation;
pub mod logging;
pub mod orchestrator;
pub mod scripted;
pub mod stream;
