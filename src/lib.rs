//! Stream channel and self-update pipeline for a desktop AI helper.
//!
//! The GUI host drives everything through [`coordinator::Coordinator`]:
//! streaming tasks hand work to an external worker process and poll a
//! file-pair channel for output, while updates fetch, verify and install a
//! release from the update server.

pub mod commands;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fs;
pub mod guard;
pub mod logging;
pub mod notify;
pub mod process;
pub mod service;
pub mod stream;
pub mod update;

/// Version of the running installation, compared against the update server.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
