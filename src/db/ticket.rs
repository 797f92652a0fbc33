use std::{
    collections::{BTreeSet, HashMap},
    error::Error as StdError,
    str,
};

use async_trait::async_trait;
use derive_more::Display;
use enum_utils::TryFromRepr;
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, ToSql,
        Type,
    },
    Error, Row,
};
use uuid::Uuid;

use crate::filter::{
    Direction, Page, QueryPlan, Sort, SortColumn, TicketStore, Visibility,
};

use super::{user, Client};

#[derive(Clone, Debug)]
pub struct Ticket {
    pub id: Id,
    pub title: String,
    pub description: Option<String>,
    pub status: Status,
    pub priority: Priority,
    pub created_by: user::Id,
    pub assigned_to: Option<user::Id>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Id(Uuid::new_v4())
    }
}

impl From<u128> for Id {
    fn from(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl FromSql<'_> for Id {
    accepts!(UUID);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Uuid::from_sql(ty, raw).map(Self)
    }
}

impl ToSql for Id {
    accepts!(UUID);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        self.0.to_sql(ty, out)
    }
}

/// Statuses are freely assignable by agents and admins; there are no
/// transition rules. The INT2 repr doubles as the sort order.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    TryFromRepr,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Status {
    Open = 1,
    InProgress = 2,
    Resolved = 3,
    Closed = 4,
}

impl FromSql<'_> for Status {
    accepts!(INT2);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from_sql(ty, raw)?;
        let repr = u8::try_from(repr)?;
        let status = Self::try_from(repr).map_err(|_| "invalid status")?;
        Ok(status)
    }
}

impl ToSql for Status {
    accepts!(INT2);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from((*self) as u8);
        repr.to_sql(ty, out)
    }
}

impl str::FromStr for Status {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            _ => Err(ParseError),
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    TryFromRepr,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
    Urgent = 4,
}

impl FromSql<'_> for Priority {
    accepts!(INT2);

    fn from_sql(
        ty: &Type,
        raw: &[u8],
    ) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from_sql(ty, raw)?;
        let repr = u8::try_from(repr)?;
        let priority = Self::try_from(repr).map_err(|_| "invalid priority")?;
        Ok(priority)
    }
}

impl ToSql for Priority {
    accepts!(INT2);

    to_sql_checked!();

    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        let repr = i16::from((*self) as u8);
        repr.to_sql(ty, out)
    }
}

impl str::FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(ParseError),
        }
    }
}

/// Unknown status/priority value in a query parameter.
#[derive(Clone, Copy, Debug)]
pub struct ParseError;

const TICKET_COLUMNS: &str = "id, title, description, status, priority, \
                              created_by, assigned_to, \
                              created_at, updated_at";

fn ticket_from_row(row: &Row) -> Ticket {
    Ticket {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        priority: row.get("priority"),
        created_by: row.get("created_by"),
        assigned_to: row.get("assigned_to"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Client {
    pub async fn get_ticket_by_id(
        &self,
        id: Id,
    ) -> Result<Option<Ticket>, Error> {
        const SQL: &str = "\
            SELECT id, title, description, status, priority, \
                   created_by, assigned_to, \
                   created_at, updated_at \
            FROM tickets \
            WHERE id = $1";
        Ok(self
            .0
            .query_opt(SQL, &[&id])
            .await?
            .map(|row| ticket_from_row(&row)))
    }

    pub async fn write_ticket(&self, ticket: &Ticket) -> Result<(), Error> {
        const SQL: &str = "\
            INSERT INTO tickets (id, title, description, status, priority, \
                                 created_by, assigned_to, \
                                 created_at, updated_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
            ON CONFLICT (id) DO UPDATE \
            SET title = EXCLUDED.title, \
                description = EXCLUDED.description, \
                status = EXCLUDED.status, \
                priority = EXCLUDED.priority, \
                created_by = EXCLUDED.created_by, \
                assigned_to = EXCLUDED.assigned_to, \
                created_at = EXCLUDED.created_at, \
                updated_at = EXCLUDED.updated_at";

        self.0
            .execute(
                SQL,
                &[
                    &ticket.id,
                    &ticket.title,
                    &ticket.description,
                    &ticket.status,
                    &ticket.priority,
                    &ticket.created_by,
                    &ticket.assigned_to,
                    &ticket.created_at,
                    &ticket.updated_at,
                ],
            )
            .await
            .map(drop)
    }

    pub async fn add_ticket_tag(
        &self,
        id: Id,
        tag: &str,
    ) -> Result<(), Error> {
        const SQL: &str = "\
            INSERT INTO ticket_tags (ticket_id, tag) \
            VALUES ($1, $2) \
            ON CONFLICT (ticket_id, tag) DO NOTHING";
        self.0.execute(SQL, &[&id, &tag]).await.map(drop)
    }

    pub async fn remove_ticket_tag(
        &self,
        id: Id,
        tag: &str,
    ) -> Result<(), Error> {
        const SQL: &str =
            "DELETE FROM ticket_tags WHERE ticket_id = $1 AND tag = $2";
        self.0.execute(SQL, &[&id, &tag]).await.map(drop)
    }
}

fn order_by(sort: Sort) -> String {
    let column = match sort.column {
        SortColumn::CreatedAt => "created_at",
        SortColumn::UpdatedAt => "updated_at",
        SortColumn::Title => "title",
        SortColumn::Status => "status",
        SortColumn::Priority => "priority",
    };
    let direction = match sort.direction {
        Direction::Asc => "ASC",
        Direction::Desc => "DESC",
    };
    // Ties always break by id ascending, so repeated queries page stably.
    format!("ORDER BY {column} {direction}, id ASC")
}

#[async_trait]
impl TicketStore for Client {
    async fn query_tickets(
        &self,
        plan: &QueryPlan,
        sort: Sort,
        page: Page,
    ) -> Result<(Vec<Ticket>, usize), Error> {
        let statuses = plan
            .status()
            .map(|set| set.iter().copied().collect::<Vec<_>>());
        let priorities = plan
            .priority()
            .map(|set| set.iter().copied().collect::<Vec<_>>());
        let ids = plan
            .id_in()
            .map(|set| set.iter().copied().collect::<Vec<_>>());

        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        match plan.visibility() {
            Visibility::Unrestricted => {}
            Visibility::CreatedBy(id) => {
                params.push(id);
                clauses.push(format!("created_by = ${}", params.len()));
            }
            Visibility::CreatedByOrAssignedTo(id) => {
                params.push(id);
                let n = params.len();
                clauses.push(format!(
                    "(created_by = ${n} OR assigned_to = ${n})"
                ));
            }
        }
        if let Some(statuses) = &statuses {
            params.push(statuses);
            clauses.push(format!("status = ANY(${}::INT2[])", params.len()));
        }
        if let Some(priorities) = &priorities {
            params.push(priorities);
            clauses
                .push(format!("priority = ANY(${}::INT2[])", params.len()));
        }
        if let Some(id) = plan.assigned_to() {
            params.push(id);
            clauses.push(format!("assigned_to = ${}", params.len()));
        }
        if let Some(ids) = &ids {
            params.push(ids);
            clauses.push(format!("id = ANY(${}::UUID[])", params.len()));
        }
        for term in plan.search_terms() {
            params.push(term);
            let n = params.len();
            clauses.push(format!(
                "(strpos(lower(title), ${n}) > 0 \
                 OR strpos(lower(coalesce(description, '')), ${n}) > 0)"
            ));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.iter().join(" AND "))
        };

        let page_sql = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets{where_sql} {} \
             OFFSET ${} LIMIT ${}",
            order_by(sort),
            params.len() + 1,
            params.len() + 2,
        );
        let count_sql = format!("SELECT COUNT(*) FROM tickets{where_sql}");

        let offset = i64::try_from(page.offset()).unwrap();
        let limit = i64::try_from(page.size).unwrap();
        let mut page_params = params.clone();
        page_params.push(&offset);
        page_params.push(&limit);

        let rows_fut = self.0.query(&page_sql, &page_params);
        let count_fut = self.0.query_one(&count_sql, &params);
        let (rows, count_row) = tokio::try_join!(rows_fut, count_fut)?;

        let tickets =
            rows.iter().map(ticket_from_row).collect::<Vec<_>>();
        let total_count =
            count_row.get::<_, i64>(0).try_into().unwrap();

        Ok((tickets, total_count))
    }

    async fn query_tag_membership(
        &self,
        tag: &str,
    ) -> Result<BTreeSet<Id>, Error> {
        const SQL: &str = "SELECT ticket_id FROM ticket_tags WHERE tag = $1";
        Ok(self
            .0
            .query(SQL, &[&tag])
            .await?
            .into_iter()
            .map(|row| row.get("ticket_id"))
            .collect())
    }

    async fn list_ticket_tags(
        &self,
        ids: &[Id],
    ) -> Result<HashMap<Id, BTreeSet<String>>, Error> {
        const SQL: &str = "\
            SELECT ticket_id, tag \
            FROM ticket_tags \
            WHERE ticket_id IN (SELECT unnest($1::UUID[]))";

        let mut tags: HashMap<Id, BTreeSet<String>> = HashMap::new();
        for row in self.0.query(SQL, &[&ids]).await? {
            tags.entry(row.get("ticket_id"))
                .or_default()
                .insert(row.get("tag"));
        }
        Ok(tags)
    }
}
