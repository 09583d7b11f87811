pub mod config;
pub mod errors;
pub mod init;
pub mod logging;
pub mod profile;
pub mod prompt;
pub mod runlog;
pub mod runner;
pub mod signals;
pub mod skills;
pub mod stream;
pub mod task;
pub mod tracker;
pub mod ui;
