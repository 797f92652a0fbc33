//! Translation of user-chosen view criteria plus the caller's identity into
//! a single query plan over the ticket store.
//!
//! The visibility rules derived from [`Actor`] are a security boundary:
//! a [`FilterState`] can only ever narrow the set of visible tickets.

pub mod plan;
pub mod resolve;

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::db::{
    ticket::{Priority, Status},
    user,
};

pub use self::{
    plan::{InvalidFilter, QueryPlan, Visibility},
    resolve::{resolve, Error, ResolvedPage, TicketStore, TicketWithTags},
};

/// The authenticated principal issuing a query.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Actor {
    pub id: user::Id,
    pub role: user::Role,
}

/// Either everything, or a non-empty subset combined with OR semantics.
///
/// An empty `OneOf` set is representable so the wire format can round-trip,
/// but it is rejected as invalid during plan building rather than silently
/// matching everything or nothing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Selection<T: Ord> {
    All,
    OneOf(BTreeSet<T>),
}

impl<T: Ord> Default for Selection<T> {
    fn default() -> Self {
        Self::All
    }
}

impl<T: Serialize + Ord> Serialize for Selection<T> {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => s.serialize_str("all"),
            Self::OneOf(set) => set.serialize(s),
        }
    }
}

impl<'de, T: Deserialize<'de> + Ord> Deserialize<'de> for Selection<T> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "lowercase")]
        enum Sentinel {
            All,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr<T: Ord> {
            Sentinel(Sentinel),
            Set(BTreeSet<T>),
        }

        Ok(match Repr::deserialize(d)? {
            Repr::Sentinel(Sentinel::All) => Self::All,
            Repr::Set(set) => Self::OneOf(set),
        })
    }
}

/// How multiple tag filters combine. Equivalent for zero or one tag.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    And,
    #[default]
    Or,
}

/// User-chosen narrowing criteria for a ticket listing. Transient unless
/// persisted as a [`crate::db::SavedView`]; the wire names follow the
/// original web client's saved-view format.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    #[serde(default)]
    pub status: Selection<Status>,
    #[serde(default)]
    pub priority: Selection<Priority>,
    #[serde(default)]
    pub assigned_to: Option<user::Id>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub search: String,
    #[serde(default, rename = "tagSearchMode")]
    pub tag_mode: TagMode,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    CreatedAt,
    UpdatedAt,
    Title,
    Status,
    Priority,
}

impl Default for SortColumn {
    fn default() -> Self {
        Self::CreatedAt
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl Default for Direction {
    fn default() -> Self {
        Self::Desc
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Sort {
    pub column: SortColumn,
    pub direction: Direction,
}

/// Zero-based page over the sorted result set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Page {
    pub index: usize,
    pub size: usize,
}

impl Page {
    pub fn offset(self) -> usize {
        self.index.saturating_mul(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_deserializes_all_sentinel() {
        let sel: Selection<Status> = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(sel, Selection::All);
    }

    #[test]
    fn selection_deserializes_value_set() {
        let sel: Selection<Status> =
            serde_json::from_str("[\"open\", \"in_progress\"]").unwrap();
        assert_eq!(
            sel,
            Selection::OneOf(
                [Status::Open, Status::InProgress].into_iter().collect()
            ),
        );
    }

    #[test]
    fn selection_keeps_empty_set_distinct_from_all() {
        let sel: Selection<Status> = serde_json::from_str("[]").unwrap();
        assert_eq!(sel, Selection::OneOf(BTreeSet::new()));
        assert_ne!(sel, Selection::All);
    }

    #[test]
    fn selection_serializes_back_to_sentinel() {
        let sel: Selection<Priority> = Selection::All;
        assert_eq!(serde_json::to_string(&sel).unwrap(), "\"all\"");
    }

    #[test]
    fn filter_state_round_trips_saved_view_format() {
        let json = serde_json::json!({
            "status": ["open", "in_progress"],
            "priority": "all",
            "assignedTo": null,
            "tags": ["billing", "urgent"],
            "search": "refund",
            "tagSearchMode": "and",
        });

        let filters: FilterState =
            serde_json::from_value(json.clone()).unwrap();
        assert_eq!(filters.priority, Selection::All);
        assert_eq!(filters.tag_mode, TagMode::And);
        assert_eq!(filters.search, "refund");
        assert_eq!(filters.tags.len(), 2);

        let back = serde_json::to_value(&filters).unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn filter_state_defaults_to_unfiltered() {
        let filters: FilterState = serde_json::from_str("{}").unwrap();
        assert_eq!(filters, FilterState::default());
        assert_eq!(filters.status, Selection::All);
        assert_eq!(filters.tag_mode, TagMode::Or);
    }
}
