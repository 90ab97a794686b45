//! Pure board model for the kanban synchronizer: event types, the reducer that
//! folds events into a [`types::Board`], the wire codec, and bootstrap seeding.

pub mod codec;
pub mod reducer;
pub mod seed;
pub mod types;
