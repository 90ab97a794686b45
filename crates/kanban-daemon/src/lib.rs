//! Daemon side of the kanban synchronizer: durable log adapters, the board
//! projection, fanout to sessions, and the WebSocket transport.

pub mod config;
pub mod daemon;
pub mod hub;
pub mod log;
pub mod monitor;
pub mod projection;
pub mod reader;
pub mod session;
pub mod writer;
pub mod ws_server;
