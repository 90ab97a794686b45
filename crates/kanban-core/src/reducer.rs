//! Board reducer: `(Board, BoardEvent) -> Board`.
//!
//! Deterministic and side-effect free. Replaying the same ordered event
//! sequence onto the same starting board always yields the same board.
//!
//! `move_card` locates the card by searching every column in board order and
//! takes the first match; the event's `from_col` is advisory. An unknown
//! `to_col` turns the move into a no-op so the card is never lost.

use crate::types::{Board, BoardEvent, Item};

/// What a single `apply` did to the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// `new_card` landed at the head of `column`.
    Inserted { column: String },
    /// `delete_card` removed `removed` items (0 when absent).
    Deleted { removed: usize },
    /// `move_card` relocated the card.
    Moved {
        from: String,
        to: String,
        index: usize,
        /// `from` differs from the event's `from_col`.
        source_mismatch: bool,
    },
    /// `move_card` for a card that is on no column.
    NotFound,
    /// The event names a column this board does not have.
    UnknownColumn(String),
    /// Non-mutating event (`health`).
    Informational,
}

impl ApplyOutcome {
    pub fn changed_board(&self) -> bool {
        match self {
            Self::Inserted { .. } | Self::Moved { .. } => true,
            Self::Deleted { removed } => *removed > 0,
            Self::NotFound | Self::UnknownColumn(_) | Self::Informational => false,
        }
    }
}

/// Apply one event to `board` in place.
pub fn apply(board: &mut Board, event: &BoardEvent) -> ApplyOutcome {
    match event {
        BoardEvent::NewCard {
            card_id, content, ..
        } => new_card(board, card_id, content),
        BoardEvent::DeleteCard { card_id } => delete_card(board, card_id),
        BoardEvent::MoveCard {
            card_id,
            from_col,
            to_col,
            new_index,
        } => move_card(board, card_id, from_col, to_col, *new_index),
        BoardEvent::Health { .. } => ApplyOutcome::Informational,
    }
}

/// Fold a sequence of events onto `board`.
pub fn replay<'a, I>(board: &mut Board, events: I)
where
    I: IntoIterator<Item = &'a BoardEvent>,
{
    for event in events {
        apply(board, event);
    }
}

fn new_card(board: &mut Board, card_id: &str, content: &str) -> ApplyOutcome {
    let Some(default) = board.default_column().map(str::to_owned) else {
        return ApplyOutcome::UnknownColumn(String::new());
    };
    if let Some(col) = board.column_mut(&default) {
        col.items.insert(0, Item::new(card_id, content));
    }
    ApplyOutcome::Inserted { column: default }
}

fn delete_card(board: &mut Board, card_id: &str) -> ApplyOutcome {
    let mut removed = 0;
    for col in board.columns_mut() {
        let before = col.items.len();
        col.items.retain(|i| i.id != card_id);
        removed += before - col.items.len();
    }
    ApplyOutcome::Deleted { removed }
}

fn move_card(
    board: &mut Board,
    card_id: &str,
    from_col: &str,
    to_col: &str,
    new_index: i64,
) -> ApplyOutcome {
    // Validate the destination before touching the source.
    let Some(dest) = board.columns().iter().position(|c| c.name == to_col) else {
        return ApplyOutcome::UnknownColumn(to_col.to_string());
    };
    let Some((src, pos)) = board.locate(card_id) else {
        return ApplyOutcome::NotFound;
    };

    let columns = board.columns_mut();
    let from = columns[src].name.clone();
    let item = columns[src].items.remove(pos);
    let target = &mut columns[dest].items;
    let index = clamp_index(new_index, target.len());
    target.insert(index, item);

    ApplyOutcome::Moved {
        source_mismatch: from != from_col,
        from,
        to: to_col.to_string(),
        index,
    }
}

fn clamp_index(new_index: i64, len: usize) -> usize {
    if new_index <= 0 {
        return 0;
    }
    usize::try_from(new_index).map_or(len, |i| i.min(len))
}
