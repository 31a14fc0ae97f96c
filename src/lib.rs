#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod dom;
pub mod events;
pub mod identifier;
pub mod inject;
pub mod item;
pub mod logging;
pub mod markup;
pub mod menu;
pub mod registry;
pub mod scenario;
pub mod scheduler;
pub mod scroll;
pub mod selector;
pub mod settings;
pub mod storage;
pub mod thread;
pub mod watermark;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, Command, Runtime};
