use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use derive_more::From;

use crate::db::{self, ticket, Ticket};

use super::{
    plan::{InvalidFilter, QueryPlan},
    Actor, FilterState, Page, Sort, TagMode,
};

/// Read operations the resolver needs from a ticket store.
///
/// Implemented by [`db::Client`] for Postgres and by in-memory stores in
/// tests. One resolution issues its reads sequentially; tag membership
/// lookups are independent reads with no shared snapshot (see DESIGN.md).
#[async_trait]
pub trait TicketStore {
    async fn query_tickets(
        &self,
        plan: &QueryPlan,
        sort: Sort,
        page: Page,
    ) -> Result<(Vec<Ticket>, usize), db::Error>;

    async fn query_tag_membership(
        &self,
        tag: &str,
    ) -> Result<BTreeSet<ticket::Id>, db::Error>;

    async fn list_ticket_tags(
        &self,
        ids: &[ticket::Id],
    ) -> Result<HashMap<ticket::Id, BTreeSet<String>>, db::Error>;
}

#[derive(Clone, Debug)]
pub struct TicketWithTags {
    pub ticket: Ticket,
    pub tags: BTreeSet<String>,
}

/// One page of the sorted result set, plus the total match count before
/// pagination (for page-count computation).
#[derive(Clone, Debug)]
pub struct ResolvedPage {
    pub tickets: Vec<TicketWithTags>,
    pub total_count: usize,
}

impl ResolvedPage {
    fn empty() -> Self {
        Self {
            tickets: Vec::new(),
            total_count: 0,
        }
    }
}

#[derive(Debug, From)]
pub enum Error {
    #[from]
    InvalidFilter(InvalidFilter),
    /// Store read failed. Propagated as-is, never retried here, and never
    /// downgraded to a partially filtered list.
    #[from]
    StoreUnavailable(db::Error),
    /// No actor. Fails closed: no results instead of admin visibility.
    Unauthorized,
}

/// Resolves one listing request: visibility, filters, tag narrowing, sort
/// and pagination. Pure query translation; nothing is mutated.
pub async fn resolve<S>(
    store: &S,
    actor: Option<&Actor>,
    filter: &FilterState,
    sort: Sort,
    page: Page,
) -> Result<ResolvedPage, Error>
where
    S: TicketStore + Sync + ?Sized,
{
    let actor = actor.ok_or(Error::Unauthorized)?;
    let mut plan = QueryPlan::build(actor, filter)?;

    if !filter.tags.is_empty() {
        let candidates = match filter.tag_mode {
            TagMode::Or => {
                let mut ids = BTreeSet::new();
                for tag in &filter.tags {
                    ids.extend(store.query_tag_membership(tag).await?);
                }
                ids
            }
            TagMode::And => {
                let mut candidates: Option<BTreeSet<ticket::Id>> = None;
                for tag in &filter.tags {
                    let members = store.query_tag_membership(tag).await?;
                    let narrowed = match candidates.take() {
                        None => members,
                        Some(ids) => {
                            ids.intersection(&members).copied().collect()
                        }
                    };
                    // An empty intersection input guarantees an empty final
                    // set, so the remaining lookups are skipped.
                    let exhausted = narrowed.is_empty();
                    candidates = Some(narrowed);
                    if exhausted {
                        break;
                    }
                }
                candidates.unwrap_or_default()
            }
        };

        if candidates.is_empty() {
            return Ok(ResolvedPage::empty());
        }
        plan.constrain_ids(candidates);
    }

    let (tickets, total_count) =
        store.query_tickets(&plan, sort, page).await?;

    let ids = tickets.iter().map(|ticket| ticket.id).collect::<Vec<_>>();
    let mut tags = store.list_ticket_tags(&ids).await?;

    let tickets = tickets
        .into_iter()
        .map(|ticket| TicketWithTags {
            tags: tags.remove(&ticket.id).unwrap_or_default(),
            ticket,
        })
        .collect();

    Ok(ResolvedPage {
        tickets,
        total_count,
    })
}
