use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::Item;

/// Column names of the stock board, in display order. The first one is the
/// default column that `new_card` inserts into.
pub const DEFAULT_COLUMNS: [&str; 3] = ["order", "invoice", "analytics"];

/// A named, ordered sequence of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub items: Vec<Item>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn position(&self, card_id: &str) -> Option<usize> {
        self.items.iter().position(|i| i.id == card_id)
    }
}

/// The full kanban state: a fixed set of columns in a fixed order.
///
/// Serialized as a JSON object keyed by column name, keys in column order:
/// `{"order": [...], "invoice": [...], "analytics": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    columns: Vec<Column>,
}

impl Board {
    /// Create an empty board with the given columns. Duplicate names are
    /// collapsed to their first occurrence.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut columns: Vec<Column> = Vec::new();
        for name in names {
            let name = name.into();
            if !columns.iter().any(|c| c.name == name) {
                columns.push(Column::new(name));
            }
        }
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Items of `name`, or an empty slice for an unknown column.
    pub fn items(&self, name: &str) -> &[Item] {
        self.column(name).map_or(&[], |c| c.items.as_slice())
    }

    /// The column `new_card` inserts into.
    pub fn default_column(&self) -> Option<&str> {
        self.columns.first().map(|c| c.name.as_str())
    }

    /// Find the first column (in board order) holding `card_id`.
    /// Returns `(column index, item index)`.
    pub fn locate(&self, card_id: &str) -> Option<(usize, usize)> {
        self.columns
            .iter()
            .enumerate()
            .find_map(|(ci, col)| col.position(card_id).map(|ii| (ci, ii)))
    }

    pub fn contains(&self, card_id: &str) -> bool {
        self.locate(card_id).is_some()
    }

    pub fn item_count(&self) -> usize {
        self.columns.iter().map(|c| c.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(DEFAULT_COLUMNS)
    }
}

impl Serialize for Board {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for col in &self.columns {
            map.serialize_entry(&col.name, &col.items)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Board {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BoardVisitor;

        impl<'de> Visitor<'de> for BoardVisitor {
            type Value = Board;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column name to a list of items")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Board, A::Error> {
                let mut columns: Vec<Column> = Vec::new();
                while let Some((name, items)) = access.next_entry::<String, Vec<Item>>()? {
                    if columns.iter().any(|c| c.name == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate column: {name}"
                        )));
                    }
                    columns.push(Column { name, items });
                }
                Ok(Board { columns })
            }
        }

        deserializer.deserialize_map(BoardVisitor)
    }
}
