//! WebSocket relay core: connection state, the session registry, frame
//! handling, background side effects, and the per-connection pumps.

pub mod connection;
pub mod dispatch;
pub mod handler;
pub mod pump;
pub mod registry;
