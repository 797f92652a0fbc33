use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use time::OffsetDateTime;

use gauntlet_crm::{
    db::{
        self,
        ticket::{self, Priority, Status},
        user, Ticket,
    },
    filter::{Actor, Direction, Page, QueryPlan, Sort, SortColumn, TicketStore},
};

/// Ticket store backed by plain collections. Executes a [`QueryPlan`] with
/// the plan's own in-memory predicate, so the resolver's two execution
/// paths stay in lockstep.
#[derive(Default)]
pub struct InMemoryStore {
    tickets: Vec<Ticket>,
    tags: HashMap<ticket::Id, BTreeSet<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ticket: Ticket, tags: &[&str]) {
        self.tags.insert(
            ticket.id,
            tags.iter().map(|tag| tag.to_string()).collect(),
        );
        self.tickets.push(ticket);
    }
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn query_tickets(
        &self,
        plan: &QueryPlan,
        sort: Sort,
        page: Page,
    ) -> Result<(Vec<Ticket>, usize), db::Error> {
        let mut matched = self
            .tickets
            .iter()
            .filter(|ticket| plan.matches(ticket))
            .cloned()
            .collect::<Vec<_>>();

        matched.sort_by(|a, b| {
            let by_column = match sort.column {
                SortColumn::CreatedAt => a.created_at.cmp(&b.created_at),
                SortColumn::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortColumn::Title => a.title.cmp(&b.title),
                SortColumn::Status => a.status.cmp(&b.status),
                SortColumn::Priority => a.priority.cmp(&b.priority),
            };
            let by_column = match sort.direction {
                Direction::Asc => by_column,
                Direction::Desc => by_column.reverse(),
            };
            by_column.then_with(|| a.id.cmp(&b.id))
        });

        let total = matched.len();
        let page_items = matched
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .collect();
        Ok((page_items, total))
    }

    async fn query_tag_membership(
        &self,
        tag: &str,
    ) -> Result<BTreeSet<ticket::Id>, db::Error> {
        Ok(self
            .tags
            .iter()
            .filter(|(_, tags)| tags.contains(tag))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn list_ticket_tags(
        &self,
        ids: &[ticket::Id],
    ) -> Result<HashMap<ticket::Id, BTreeSet<String>>, db::Error> {
        Ok(ids
            .iter()
            .filter_map(|id| self.tags.get(id).map(|tags| (*id, tags.clone())))
            .collect())
    }
}

pub fn actor(id: u128, role: user::Role) -> Actor {
    Actor {
        id: user::Id::from(id),
        role,
    }
}

/// An open, medium-priority, unassigned ticket at a fixed timestamp, so
/// that the default created-at sort falls through to the id tiebreak.
pub fn ticket(id: u128, created_by: u128) -> Ticket {
    let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
    Ticket {
        id: ticket::Id::from(id),
        title: format!("Ticket {id}"),
        description: None,
        status: Status::Open,
        priority: Priority::Medium,
        created_by: user::Id::from(created_by),
        assigned_to: None,
        created_at: at,
        updated_at: at,
    }
}
