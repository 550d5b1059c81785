#![forbid(unsafe_code)]

//! Long-lived bridge between socket clients and a single ACP agent process.

pub mod acp;
pub mod bridge;
pub mod config;
pub mod errors;
pub mod ipc;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
