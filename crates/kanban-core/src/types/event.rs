use serde::{Deserialize, Serialize};

/// One board mutation, or an informational signal, as it travels through the
/// durable log and out to viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardEvent {
    /// Insert a card at the head of the default column.
    NewCard {
        card_id: String,
        content: String,
        /// Passthrough hint some producers attach. Re-emitted unchanged,
        /// ignored by the reducer.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to_col: Option<String>,
    },
    /// Remove a card from whichever column holds it.
    DeleteCard { card_id: String },
    /// Relocate a card to `to_col` at `new_index`.
    MoveCard {
        card_id: String,
        from_col: String,
        to_col: String,
        /// Clamped on apply: negative is the head, past the end appends.
        new_index: i64,
    },
    /// Log reachability signal. Never applied to the board.
    Health { status: HealthStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unreachable,
}

impl BoardEvent {
    /// Wire discriminant of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewCard { .. } => "new_card",
            Self::DeleteCard { .. } => "delete_card",
            Self::MoveCard { .. } => "move_card",
            Self::Health { .. } => "health",
        }
    }

    /// Whether this event changes the board when applied.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Health { .. })
    }

    pub fn card_id(&self) -> Option<&str> {
        match self {
            Self::NewCard { card_id, .. }
            | Self::DeleteCard { card_id }
            | Self::MoveCard { card_id, .. } => Some(card_id.as_str()),
            Self::Health { .. } => None,
        }
    }

    pub fn health(status: HealthStatus) -> Self {
        Self::Health { status }
    }
}
