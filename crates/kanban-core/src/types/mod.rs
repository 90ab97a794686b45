mod board;
mod event;
mod item;
mod message;

pub use board::{Board, Column, DEFAULT_COLUMNS};
pub use event::{BoardEvent, HealthStatus};
pub use item::Item;
pub use message::{RejectReason, ServerMessage, SyncStateRef};
