//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `project` | `Init`           |
//! | `tasks`   | `List`, `Logs`   |
//! | `run`     | `Run`, `Column`  |

pub mod project;
pub mod run;
pub mod tasks;

pub use project::cmd_init;
pub use run::{RunTarget, cmd_run};
pub use tasks::{cmd_list, cmd_logs};
