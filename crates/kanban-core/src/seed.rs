//! Bootstrap seeding.
//!
//! Seed items are never written into the board directly. They are expressed as
//! synthetic events and applied through the reducer, so a seeded board is still
//! "empty board + replayed events".

use crate::reducer;
use crate::types::{Board, BoardEvent, Item};

/// Cards the stock board starts with when no seed file is given.
pub fn default_seed() -> Board {
    let mut board = Board::default();
    if let Some(col) = board.column_mut("order") {
        col.items = vec![
            Item::new("init-1", "Burger / #ORD-882"),
            Item::new("init-2", "Pizza / #ORD-124"),
        ];
    }
    board
}

/// Events that rebuild `seed` when applied, in order, to an empty board with
/// the same columns.
///
/// Each card is inserted with `new_card` (head of the default column) and then
/// moved to its final column and index. Seed columns the target board does not
/// have produce moves the reducer ignores.
pub fn seed_events(seed: &Board) -> Vec<BoardEvent> {
    let Some(default) = seed.default_column() else {
        return Vec::new();
    };
    let mut events = Vec::with_capacity(seed.item_count() * 2);
    for col in seed.columns() {
        for (index, item) in col.items.iter().enumerate() {
            events.push(BoardEvent::NewCard {
                card_id: item.id.clone(),
                content: item.content.clone(),
                to_col: None,
            });
            events.push(BoardEvent::MoveCard {
                card_id: item.id.clone(),
                from_col: default.to_string(),
                to_col: col.name.clone(),
                new_index: index as i64,
            });
        }
    }
    events
}

/// Empty board with `columns`, then `seed` (if any) replayed onto it.
pub fn seeded_board<I, S>(columns: I, seed: Option<&Board>) -> Board
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut board = Board::new(columns);
    if let Some(seed) = seed {
        reducer::replay(&mut board, &seed_events(seed));
    }
    board
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::replay;

    #[test]
    fn replaying_seed_events_rebuilds_default_seed() {
        let seed = default_seed();
        let mut board = Board::default();
        replay(&mut board, &seed_events(&seed));
        assert_eq!(board, seed);
        assert_eq!(board.items("order")[0].id, "init-1");
        assert_eq!(board.items("order")[1].id, "init-2");
    }

    #[test]
    fn seed_spanning_columns_round_trips() {
        let seed: Board = serde_json::from_str(
            r#"{
                "order": [{"id": "o1", "content": "A"}, {"id": "o2", "content": "B"}],
                "invoice": [{"id": "i1", "content": "C"}],
                "analytics": [{"id": "a1", "content": "D"}, {"id": "a2", "content": "E"}]
            }"#,
        )
        .unwrap();
        let mut board = Board::default();
        replay(&mut board, &seed_events(&seed));
        assert_eq!(board, seed);
    }

    #[test]
    fn seed_items_for_missing_columns_stay_in_default() {
        let seed: Board = serde_json::from_str(
            r#"{"order": [{"id": "o1", "content": "A"}], "archive": [{"id": "x1", "content": "B"}]}"#,
        )
        .unwrap();
        let board = seeded_board(["order", "invoice"], Some(&seed));
        // The move into `archive` is ignored, so x1 stays where new_card put it.
        assert_eq!(board.items("order").len(), 2);
        assert!(board.contains("x1"));
        assert!(board.items("invoice").is_empty());
    }

    #[test]
    fn seeded_board_without_seed_is_empty() {
        let board = seeded_board(["a", "b"], None);
        assert!(board.is_empty());
        assert_eq!(board.column_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn empty_seed_has_no_events() {
        assert!(seed_events(&Board::default()).is_empty());
        assert!(seed_events(&Board::new(Vec::<String>::new())).is_empty());
    }
}
