//! 工具模块

pub mod time;

pub use time::{parse_server_timestamp, sort_key};
