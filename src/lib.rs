#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod decode;
pub mod library;
pub mod list;
pub mod logging;
pub mod map;
pub mod present;
pub mod slot;
pub mod source;
pub mod ui;
pub mod worker;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
