//! Client-facing socket layer.
//!
//! A Unix domain socket server that speaks newline-delimited JSON with
//! bridge clients (the chat bot, `acp-bridge-ctl`).

pub mod protocol;
pub mod server;
