use serde::{Deserialize, Serialize};

use crate::{db, db::user, filter::FilterState};

pub use crate::db::saved_view::Id;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedView {
    pub id: Id,
    pub name: String,
    pub filters: FilterState,
    pub is_shared: bool,
    pub owner: user::Id,
}

impl From<db::SavedView> for SavedView {
    fn from(view: db::SavedView) -> Self {
        Self {
            id: view.id,
            name: view.name,
            filters: view.filters,
            is_shared: view.is_shared,
            owner: view.owner,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub views: Vec<SavedView>,
}
