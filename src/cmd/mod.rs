//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `run`     | `Run`            |
//! | `replay`  | `Replay`         |
//! | `config`  | `Config`         |

pub mod config;
pub mod replay;
pub mod run;

pub use config::cmd_config;
pub use replay::cmd_replay;
pub use run::cmd_run;
