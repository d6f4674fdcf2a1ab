#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod data;
pub mod feed;
pub mod normalize;
pub mod pagination;
pub mod preferences;
pub mod reddit;
pub mod storage;
pub mod view;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
