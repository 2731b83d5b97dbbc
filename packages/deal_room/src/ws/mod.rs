//! Realtime transport: wire protocol, frame dispatch, and the reconnecting
//! bridge task that keeps them fed.

pub mod protocol;

pub(crate) mod bridge;
pub(crate) mod dispatch;
