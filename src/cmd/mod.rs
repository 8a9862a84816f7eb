//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled               |
//! |-----------|--------------------------------|
//! | `project` | `Init`                         |
//! | `run`     | `Run`                          |
//! | `phase`   | `Status`, `Report`, `Audit`    |
//! | `config`  | `Config`                       |
//! | `check`   | `CheckName`, `Score`           |

pub mod check;
pub mod config;
pub mod phase;
pub mod project;
pub mod run;

pub use check::{cmd_check_name, cmd_score};
pub use config::cmd_config;
pub use phase::{cmd_audit, cmd_report, cmd_status};
pub use project::cmd_init;
pub use run::{RunArgs, cmd_run};
