#![warn(missing_docs)]

//! Dropstash daemon: configuration, logging, directory watchers, pid-file
//! lifecycle control and the `dropstash` command line.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod pidfile;

pub use config::StashConfig;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use monitor::{check_location, spawn_monitor, MonitorHandle, MonitorSet};
pub use pidfile::PidFile;
