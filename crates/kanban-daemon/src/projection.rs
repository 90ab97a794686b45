//! The in-memory board projection shared by the log reader (sole writer) and
//! the session coordinator (snapshot reader).

use std::sync::Arc;

use tokio::sync::RwLock;

use kanban_core::reducer::{self, ApplyOutcome};
use kanban_core::seed::seeded_board;
use kanban_core::types::{Board, BoardEvent};

/// Thread-safe handle to the projection.
pub type SharedProjection = Arc<ProjectionStore>;

/// Board plus bookkeeping, guarded as one unit.
#[derive(Debug)]
struct Projection {
    board: Board,
    applied: u64,
}

/// Authoritative board state.
///
/// `apply` takes the write guard for the whole reducer step; `snapshot` takes
/// the read guard. A reader therefore sees either the state before an event or
/// the state after it, never a card that has left one column and not yet
/// arrived in another.
#[derive(Debug)]
pub struct ProjectionStore {
    inner: RwLock<Projection>,
}

impl ProjectionStore {
    pub fn new(board: Board) -> Self {
        Self {
            inner: RwLock::new(Projection { board, applied: 0 }),
        }
    }

    /// Empty board with `columns`, then `seed` replayed as synthetic events.
    /// Seed events do not count towards [`applied`](Self::applied).
    pub fn seeded<I, S>(columns: I, seed: Option<&Board>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(seeded_board(columns, seed))
    }

    pub async fn apply(&self, event: &BoardEvent) -> ApplyOutcome {
        self.apply_then(event, |_, _| ()).await.0
    }

    /// Apply `event`, then run `then` while still holding the write guard.
    ///
    /// The log reader broadcasts from inside `then`, which makes "apply and
    /// broadcast" a single step from the point of view of a joining session.
    pub async fn apply_then<F, R>(&self, event: &BoardEvent, then: F) -> (ApplyOutcome, R)
    where
        F: FnOnce(&Board, &ApplyOutcome) -> R,
    {
        let mut inner = self.inner.write().await;
        let outcome = reducer::apply(&mut inner.board, event);
        if event.is_mutation() {
            inner.applied += 1;
        }
        let r = then(&inner.board, &outcome);
        (outcome, r)
    }

    /// Deep point-in-time copy of the board.
    pub async fn snapshot(&self) -> Board {
        self.inner.read().await.board.clone()
    }

    /// Run `then` against the board while holding the read guard. No event can
    /// be applied (or broadcast by the reader) until it returns.
    pub async fn snapshot_then<F, R>(&self, then: F) -> R
    where
        F: FnOnce(&Board) -> R,
    {
        let inner = self.inner.read().await;
        then(&inner.board)
    }

    /// Number of mutation events applied since startup (seed excluded).
    pub async fn applied(&self) -> u64 {
        self.inner.read().await.applied
    }
}
