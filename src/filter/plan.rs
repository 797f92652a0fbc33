use std::collections::BTreeSet;

use crate::db::{
    ticket::{self, Priority, Status},
    user::{self, Role},
    Ticket,
};

use super::{Actor, FilterState, Selection};

/// The role-derived constraint limiting which tickets an actor may ever
/// see. Derived solely from the [`Actor`], never from filter input.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Visibility {
    CreatedBy(user::Id),
    CreatedByOrAssignedTo(user::Id),
    Unrestricted,
}

impl Visibility {
    pub fn of(actor: &Actor) -> Self {
        match actor.role {
            Role::Customer => Self::CreatedBy(actor.id),
            Role::Agent => Self::CreatedByOrAssignedTo(actor.id),
            Role::Admin => Self::Unrestricted,
        }
    }

    pub fn allows(&self, ticket: &Ticket) -> bool {
        match *self {
            Self::CreatedBy(id) => ticket.created_by == id,
            Self::CreatedByOrAssignedTo(id) => {
                ticket.created_by == id || ticket.assigned_to == Some(id)
            }
            Self::Unrestricted => true,
        }
    }
}

/// Malformed [`FilterState`]: an empty value set is not the same thing as
/// the "all" sentinel and is never conflated with it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvalidFilter {
    EmptyStatusSet,
    EmptyPrioritySet,
}

/// The conjunction of all active clauses, in a form that both the SQL
/// translation and [`QueryPlan::matches`] evaluate identically.
///
/// Tag filtering is not a clause of its own here: the resolver folds tag
/// membership lookups into the `id_in` candidate set before the plan is
/// executed.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    visibility: Visibility,
    status: Option<BTreeSet<Status>>,
    priority: Option<BTreeSet<Priority>>,
    assigned_to: Option<user::Id>,
    id_in: Option<BTreeSet<ticket::Id>>,
    search_terms: Vec<String>,
}

impl QueryPlan {
    pub fn build(
        actor: &Actor,
        filter: &FilterState,
    ) -> Result<Self, InvalidFilter> {
        let status = match &filter.status {
            Selection::All => None,
            Selection::OneOf(set) if set.is_empty() => {
                return Err(InvalidFilter::EmptyStatusSet)
            }
            Selection::OneOf(set) => Some(set.clone()),
        };
        let priority = match &filter.priority {
            Selection::All => None,
            Selection::OneOf(set) if set.is_empty() => {
                return Err(InvalidFilter::EmptyPrioritySet)
            }
            Selection::OneOf(set) => Some(set.clone()),
        };

        Ok(Self {
            visibility: Visibility::of(actor),
            status,
            priority,
            assigned_to: filter.assigned_to,
            id_in: None,
            search_terms: filter
                .search
                .split_whitespace()
                .map(str::to_lowercase)
                .collect(),
        })
    }

    /// Narrows the plan to the given candidate ids (tag clause outcome).
    pub fn constrain_ids(&mut self, ids: BTreeSet<ticket::Id>) {
        self.id_in = Some(ids);
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn status(&self) -> Option<&BTreeSet<Status>> {
        self.status.as_ref()
    }

    pub fn priority(&self) -> Option<&BTreeSet<Priority>> {
        self.priority.as_ref()
    }

    pub fn assigned_to(&self) -> Option<&user::Id> {
        self.assigned_to.as_ref()
    }

    pub fn id_in(&self) -> Option<&BTreeSet<ticket::Id>> {
        self.id_in.as_ref()
    }

    /// Lowercased whitespace-split search terms. Every term must appear in
    /// the title or the description.
    pub fn search_terms(&self) -> &[String] {
        &self.search_terms
    }

    /// In-memory form of the same predicate the SQL translation runs.
    pub fn matches(&self, ticket: &Ticket) -> bool {
        if !self.visibility.allows(ticket) {
            return false;
        }
        if let Some(statuses) = &self.status {
            if !statuses.contains(&ticket.status) {
                return false;
            }
        }
        if let Some(priorities) = &self.priority {
            if !priorities.contains(&ticket.priority) {
                return false;
            }
        }
        if let Some(assigned_to) = self.assigned_to {
            if ticket.assigned_to != Some(assigned_to) {
                return false;
            }
        }
        if let Some(ids) = &self.id_in {
            if !ids.contains(&ticket.id) {
                return false;
            }
        }
        if !self.search_terms.is_empty() {
            let title = ticket.title.to_lowercase();
            let description = ticket
                .description
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();
            if !self
                .search_terms
                .iter()
                .all(|term| title.contains(term) || description.contains(term))
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;

    fn actor(id: u128, role: Role) -> Actor {
        Actor {
            id: user::Id::from(id),
            role,
        }
    }

    fn ticket(id: u128, created_by: u128) -> Ticket {
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

    #[test]
    fn customer_visibility_is_creator_only() {
        let plan =
            QueryPlan::build(&actor(1, Role::Customer), &FilterState::default())
                .unwrap();

        assert!(plan.matches(&ticket(10, 1)));
        assert!(!plan.matches(&ticket(11, 2)));

        let mut assigned = ticket(12, 2);
        assigned.assigned_to = Some(user::Id::from(1));
        assert!(!plan.matches(&assigned));
    }

    #[test]
    fn agent_visibility_includes_assigned() {
        let plan =
            QueryPlan::build(&actor(1, Role::Agent), &FilterState::default())
                .unwrap();

        assert!(plan.matches(&ticket(10, 1)));
        assert!(!plan.matches(&ticket(11, 2)));

        let mut assigned = ticket(12, 2);
        assigned.assigned_to = Some(user::Id::from(1));
        assert!(plan.matches(&assigned));
    }

    #[test]
    fn admin_visibility_is_unrestricted() {
        let plan =
            QueryPlan::build(&actor(1, Role::Admin), &FilterState::default())
                .unwrap();

        assert!(plan.matches(&ticket(10, 2)));
        assert!(plan.matches(&ticket(11, 3)));
    }

    #[test]
    fn empty_status_set_is_rejected() {
        let filter = FilterState {
            status: Selection::OneOf(BTreeSet::new()),
            ..FilterState::default()
        };
        assert_eq!(
            QueryPlan::build(&actor(1, Role::Admin), &filter),
            Err(InvalidFilter::EmptyStatusSet),
        );
    }

    #[test]
    fn empty_priority_set_is_rejected() {
        let filter = FilterState {
            priority: Selection::OneOf(BTreeSet::new()),
            ..FilterState::default()
        };
        assert_eq!(
            QueryPlan::build(&actor(1, Role::Admin), &filter),
            Err(InvalidFilter::EmptyPrioritySet),
        );
    }

    #[test]
    fn status_clause_narrows() {
        let filter = FilterState {
            status: Selection::OneOf(
                [Status::Resolved, Status::Closed].into_iter().collect(),
            ),
            ..FilterState::default()
        };
        let plan = QueryPlan::build(&actor(1, Role::Admin), &filter).unwrap();

        let mut resolved = ticket(10, 2);
        resolved.status = Status::Resolved;
        assert!(plan.matches(&resolved));
        assert!(!plan.matches(&ticket(11, 2)));
    }

    #[test]
    fn assignee_clause_requires_exact_match() {
        let filter = FilterState {
            assigned_to: Some(user::Id::from(7)),
            ..FilterState::default()
        };
        let plan = QueryPlan::build(&actor(1, Role::Admin), &filter).unwrap();

        let mut assigned = ticket(10, 2);
        assigned.assigned_to = Some(user::Id::from(7));
        assert!(plan.matches(&assigned));
        assert!(!plan.matches(&ticket(11, 2)));
    }

    #[test]
    fn search_requires_every_term() {
        let filter = FilterState {
            search: "login issue".into(),
            ..FilterState::default()
        };
        let plan = QueryPlan::build(&actor(1, Role::Admin), &filter).unwrap();

        let mut report = ticket(10, 2);
        report.title = "Login Issue Report".into();
        assert!(plan.matches(&report));

        let mut problem = ticket(11, 2);
        problem.title = "Login problem".into();
        assert!(!plan.matches(&problem));
    }

    #[test]
    fn search_terms_may_split_across_title_and_description() {
        let filter = FilterState {
            search: "login billing".into(),
            ..FilterState::default()
        };
        let plan = QueryPlan::build(&actor(1, Role::Admin), &filter).unwrap();

        let mut split = ticket(10, 2);
        split.title = "Login fails".into();
        split.description = Some("Affects the BILLING page".into());
        assert!(plan.matches(&split));

        let mut title_only = ticket(11, 2);
        title_only.title = "Login fails".into();
        assert!(!plan.matches(&title_only));
    }

    #[test]
    fn id_constraint_narrows() {
        let mut plan =
            QueryPlan::build(&actor(1, Role::Admin), &FilterState::default())
                .unwrap();
        plan.constrain_ids([ticket::Id::from(10)].into_iter().collect());

        assert!(plan.matches(&ticket(10, 2)));
        assert!(!plan.matches(&ticket(11, 2)));
    }
}
