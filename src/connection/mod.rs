//! Per-request connection handling.
//!
//! Each request the session sends is carried by exactly one [`Connection`].
//! The connection drives the exchange through its stages (resolve, connect,
//! handshake, write, read status, read headers, read body) inside a single
//! spawned task, follows redirects, performs the one-shot restart on a
//! stale keep-alive socket, and retains the finished response and the open
//! socket during the dispose window.

mod conn;
mod state;

pub use conn::Connection;
pub use state::ConnState;

pub(crate) use conn::ResponseResult;
