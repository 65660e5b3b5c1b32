#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod bridge;
pub mod catalog;
pub mod config;
pub mod cover;
pub mod dispatch;
pub mod finder;
pub mod logging;
pub mod navigation;
pub mod preview;
pub mod session;
pub mod update;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
