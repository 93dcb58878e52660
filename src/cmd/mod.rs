//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled              |
//! |----------|-------------------------------|
//! | `cycle`  | `Run`, `Cycle`, `Simulate`    |
//! | `config` | `Config`                      |

pub mod config;
pub mod cycle;

pub use config::cmd_config;
pub use cycle::{cmd_cycle, cmd_run, cmd_simulate};
