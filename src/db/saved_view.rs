use std::error::Error as StdError;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio_postgres::{
    types::{
        accepts, private::BytesMut, to_sql_checked, FromSql, IsNull, Json,
        ToSql, Type,
    },
    Error,
};
use uuid::Uuid;

use crate::filter::FilterState;

use super::{user, Client};

/// A named snapshot of a [`FilterState`]. No merge or versioning semantics:
/// saving under an existing id overwrites the whole record.
#[derive(Clone, Debug)]
pub struct SavedView {
    pub id: Id,
    pub name: String,
    pub filters: FilterState,
    pub is_shared: bool,
    pub owner: user::Id,
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
    PartialEq,
    Serialize,
)]
pub struct Id(Uuid);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
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

impl Client {
    /// Views visible to `actor`: their own plus shared ones.
    pub async fn get_views_for(
        &self,
        actor: user::Id,
    ) -> Result<Vec<SavedView>, Error> {
        const SQL: &str = "\
            SELECT id, name, filters, is_shared, owner_id \
            FROM saved_views \
            WHERE owner_id = $1 OR is_shared \
            ORDER BY name, id";
        Ok(self
            .0
            .query(SQL, &[&actor])
            .await?
            .into_iter()
            .map(|row| SavedView {
                id: row.get("id"),
                name: row.get("name"),
                filters: row.get::<_, Json<FilterState>>("filters").0,
                is_shared: row.get("is_shared"),
                owner: row.get("owner_id"),
            })
            .collect())
    }

    pub async fn get_view_by_id(
        &self,
        id: Id,
    ) -> Result<Option<SavedView>, Error> {
        const SQL: &str = "\
            SELECT id, name, filters, is_shared, owner_id \
            FROM saved_views \
            WHERE id = $1";
        Ok(self.0.query_opt(SQL, &[&id]).await?.map(|row| SavedView {
            id: row.get("id"),
            name: row.get("name"),
            filters: row.get::<_, Json<FilterState>>("filters").0,
            is_shared: row.get("is_shared"),
            owner: row.get("owner_id"),
        }))
    }

    pub async fn write_view(&self, view: &SavedView) -> Result<(), Error> {
        const SQL: &str = "\
            INSERT INTO saved_views (id, name, filters, is_shared, owner_id) \
            VALUES ($1, $2, $3, $4, $5) \
            ON CONFLICT (id) DO UPDATE \
            SET name = EXCLUDED.name, \
                filters = EXCLUDED.filters, \
                is_shared = EXCLUDED.is_shared, \
                owner_id = EXCLUDED.owner_id";
        self.0
            .execute(
                SQL,
                &[
                    &view.id,
                    &view.name,
                    &Json(&view.filters),
                    &view.is_shared,
                    &view.owner,
                ],
            )
            .await
            .map(drop)
    }

    pub async fn delete_view(&self, id: Id) -> Result<(), Error> {
        const SQL: &str = "DELETE FROM saved_views WHERE id = $1";
        self.0.execute(SQL, &[&id]).await.map(drop)
    }
}
