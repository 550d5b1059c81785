//! Agent Client Protocol (ACP) stream handling.
//!
//! This module owns the subprocess-facing half of the bridge: NDJSON
//! framing, the JSON-RPC vocabulary, and the read/write tasks that move
//! messages between the agent's stdio and in-process channels.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing
//!   shared with the client socket.
//! - `messages`: outbound request builders and inbound classification.
//! - `reader` / `writer`: async tasks bridging stdio and channels.
//! - `link`: request ids and channel ends for one running agent.
//! - `handshake`: the `initialize` exchange.
//! - `spawner`: process spawning and graceful termination.

pub mod codec;
pub mod handshake;
pub mod link;
pub mod messages;
pub mod reader;
pub mod spawner;
pub mod writer;
