use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{db::user, filter::TicketWithTags};

pub use crate::db::ticket::{Id, Priority, Status};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Id,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    pub priority: Priority,
    pub created_by: user::Id,
    pub assigned_to: Option<user::Id>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub tags: Vec<String>,
}

impl From<TicketWithTags> for Ticket {
    fn from(t: TicketWithTags) -> Self {
        Self {
            id: t.ticket.id,
            title: t.ticket.title,
            description: t.ticket.description,
            status: t.ticket.status,
            priority: t.ticket.priority,
            created_by: t.ticket.created_by,
            assigned_to: t.ticket.assigned_to,
            created_at: t.ticket.created_at,
            updated_at: t.ticket.updated_at,
            tags: t.tags.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub tickets: Vec<Ticket>,
    pub total_count: usize,
}
