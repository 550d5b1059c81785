//! Bridge core: agent supervision, session recovery, streaming and
//! permission handling behind a single-flight dispatcher.

pub mod dispatcher;
pub mod permission;
pub mod relay;
pub mod session;
pub mod supervisor;
