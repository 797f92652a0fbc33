use std::{collections::BTreeSet, error::Error, str::FromStr, sync::Arc};

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        request, HeaderValue, Method, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, RequestPartsExt as _, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use derive_more::From;
use itertools::Itertools as _;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::{fs, net, task};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

use gauntlet_crm::{
    api,
    db::{
        self,
        ticket::{ParseError, Priority, Status},
        user,
    },
    filter::{
        self, Selection, TicketStore as _, TicketWithTags, Visibility,
    },
    Config,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = fs::read_to_string("config.toml").await?;
    let config = toml::from_str::<Config>(&config)?;

    let (db_client, db_connection) = db::connect(config.db).await?;

    task::spawn(async move {
        if let Err(e) = db_connection.await {
            panic!("database connection failed: {e}");
        }
    });

    let mut cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);
    for origin in &config.http.cors.allowed_origins {
        cors = cors.allow_origin(origin.parse::<HeaderValue>()?);
    }

    let app = Router::new()
        .route("/ticket", get(list_tickets).post(add_ticket))
        .route("/ticket/:id", get(get_ticket).patch(edit_ticket))
        .route("/view", get(list_views).post(add_view))
        .route("/view/:id", delete(delete_view))
        .layer(cors)
        .with_state(Arc::new(AppState {
            db_client,
            jwt_decoding_key: DecodingKey::from_secret(
                config.jwt.secret.as_bytes(),
            ),
        }));

    tracing::info!("listening on {}", config.http.server.addr);
    let listener = net::TcpListener::bind(config.http.server.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct ListTicketsInput {
    status: Option<String>,
    priority: Option<String>,
    assigned_to: Option<user::Id>,
    tags: Option<String>,
    tag_mode: Option<filter::TagMode>,
    search: Option<String>,
    sort: Option<filter::SortColumn>,
    dir: Option<filter::Direction>,
    #[serde(default)]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page_size() -> usize {
    10
}

/// `status`/`priority` query parameters: absent or `all` means everything,
/// otherwise a comma-separated value list.
fn parse_selection<T>(raw: Option<&str>) -> Result<Selection<T>, ParseError>
where
    T: FromStr<Err = ParseError> + Ord,
{
    match raw {
        None | Some("all") => Ok(Selection::All),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .map(T::from_str)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Selection::OneOf),
    }
}

async fn list_tickets(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Query(input): Query<ListTicketsInput>,
) -> Result<Json<api::ticket::List>, ListTicketsError> {
    let actor = auth_claims.actor();
    let filter = filter::FilterState {
        status: parse_selection(input.status.as_deref())?,
        priority: parse_selection(input.priority.as_deref())?,
        assigned_to: input.assigned_to,
        tags: input
            .tags
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_owned)
            .collect(),
        search: input.search.unwrap_or_default(),
        tag_mode: input.tag_mode.unwrap_or_default(),
    };
    let sort = filter::Sort {
        column: input.sort.unwrap_or_default(),
        direction: input.dir.unwrap_or_default(),
    };
    let page = filter::Page {
        index: input.page,
        size: input.page_size,
    };

    let resolved = filter::resolve(
        &state.db_client,
        Some(&actor),
        &filter,
        sort,
        page,
    )
    .await?;

    Ok(Json(api::ticket::List {
        tickets: resolved.tickets.into_iter().map(api::Ticket::from).collect(),
        total_count: resolved.total_count,
    }))
}

#[derive(Debug, From)]
pub enum ListTicketsError {
    #[from]
    InvalidQuery(ParseError),
    #[from]
    Resolve(filter::Error),
}

impl IntoResponse for ListTicketsError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::Resolve(e) => match e {
                filter::Error::InvalidFilter(_) => StatusCode::BAD_REQUEST,
                filter::Error::Unauthorized => StatusCode::FORBIDDEN,
                filter::Error::StoreUnavailable(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
        .into_response()
    }
}

async fn get_ticket(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::ticket::Id>,
) -> Result<Json<api::Ticket>, GetTicketError> {
    use GetTicketError as E;

    let actor = auth_claims.actor();

    let ticket = state
        .db_client
        .get_ticket_by_id(id)
        .await?
        // Not-found and not-visible answer identically, so ticket
        // existence never leaks across the visibility boundary.
        .filter(|ticket| Visibility::of(&actor).allows(ticket))
        .ok_or(E::TicketNotFound)?;

    let mut tags = state.db_client.list_ticket_tags(&[ticket.id]).await?;
    let tags = tags.remove(&ticket.id).unwrap_or_default();

    Ok(Json(TicketWithTags { ticket, tags }.into()))
}

#[derive(Debug, From)]
pub enum GetTicketError {
    #[from]
    DbError(db::Error),
    TicketNotFound,
}

impl IntoResponse for GetTicketError {
    fn into_response(self) -> Response {
        match self {
            Self::TicketNotFound => StatusCode::NOT_FOUND,
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddTicketInput {
    title: String,
    description: Option<String>,
    priority: Option<Priority>,
    #[serde(default)]
    tags: Vec<String>,
}

async fn add_ticket(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Json(input): Json<AddTicketInput>,
) -> Result<Json<api::Ticket>, AddTicketError> {
    let now = OffsetDateTime::now_utc();
    let ticket = db::Ticket {
        id: api::ticket::Id::new(),
        title: input.title,
        description: input.description,
        status: Status::Open,
        priority: input.priority.unwrap_or(Priority::Medium),
        created_by: auth_claims.user_id,
        assigned_to: None,
        created_at: now,
        updated_at: now,
    };

    state.db_client.write_ticket(&ticket).await?;

    let mut tags = BTreeSet::new();
    let unique_tags = input
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .unique()
        .collect::<Vec<_>>();
    for tag in unique_tags {
        state.db_client.add_ticket_tag(ticket.id, tag).await?;
        tags.insert(tag.to_owned());
    }

    Ok(Json(TicketWithTags { ticket, tags }.into()))
}

#[derive(Debug, From)]
pub enum AddTicketError {
    #[from]
    DbError(db::Error),
}

impl IntoResponse for AddTicketError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

#[derive(Deserialize)]
#[serde(content = "data", rename_all = "camelCase", tag = "op")]
enum EditTicketInput {
    EditTitle { title: String },
    EditDescription { description: Option<String> },
    SetStatus { status: Status },
    SetPriority { priority: Priority },
    #[serde(rename_all = "camelCase")]
    Assign { assigned_to: Option<user::Id> },
    AddTag { tag: String },
    RemoveTag { tag: String },
}

async fn edit_ticket(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::ticket::Id>,
    Json(op): Json<EditTicketInput>,
) -> Result<Json<api::Ticket>, EditTicketError> {
    use EditTicketInput as Op;
    use EditTicketError as E;

    let actor = auth_claims.actor();
    let is_staff =
        matches!(actor.role, user::Role::Agent | user::Role::Admin);

    let mut ticket = state
        .db_client
        .get_ticket_by_id(id)
        .await?
        .filter(|ticket| Visibility::of(&actor).allows(ticket))
        .ok_or(E::TicketNotFound)?;

    match op {
        // Anyone who can see a ticket may amend its text: customers edit
        // their own tickets, agents the ones they file or work on.
        Op::EditTitle { title } => {
            ticket.title = title;
        }
        Op::EditDescription { description } => {
            ticket.description = description;
        }
        Op::SetStatus { status } => {
            if !is_staff {
                return Err(E::TicketCannotBeModified);
            }
            ticket.status = status;
        }
        Op::SetPriority { priority } => {
            if !is_staff {
                return Err(E::TicketCannotBeModified);
            }
            ticket.priority = priority;
        }
        Op::Assign { assigned_to } => {
            if !is_staff {
                return Err(E::TicketCannotBeModified);
            }
            ticket.assigned_to = assigned_to;
        }
        Op::AddTag { tag } => {
            if !is_staff {
                return Err(E::TicketCannotBeModified);
            }
            state.db_client.add_ticket_tag(ticket.id, &tag).await?;
        }
        Op::RemoveTag { tag } => {
            if !is_staff {
                return Err(E::TicketCannotBeModified);
            }
            state.db_client.remove_ticket_tag(ticket.id, &tag).await?;
        }
    }

    ticket.updated_at = OffsetDateTime::now_utc();
    state.db_client.write_ticket(&ticket).await?;

    let mut tags = state.db_client.list_ticket_tags(&[ticket.id]).await?;
    let tags = tags.remove(&ticket.id).unwrap_or_default();

    Ok(Json(TicketWithTags { ticket, tags }.into()))
}

#[derive(Debug, From)]
pub enum EditTicketError {
    #[from]
    DbError(db::Error),
    TicketCannotBeModified,
    TicketNotFound,
}

impl IntoResponse for EditTicketError {
    fn into_response(self) -> Response {
        match self {
            Self::TicketCannotBeModified => StatusCode::FORBIDDEN,
            Self::TicketNotFound => StatusCode::NOT_FOUND,
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

async fn list_views(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
) -> Result<Json<api::view::List>, ListViewsError> {
    let views = state
        .db_client
        .get_views_for(auth_claims.user_id)
        .await?
        .into_iter()
        .map(api::SavedView::from)
        .collect();

    Ok(Json(api::view::List { views }))
}

#[derive(Debug, From)]
pub enum ListViewsError {
    #[from]
    DbError(db::Error),
}

impl IntoResponse for ListViewsError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddViewInput {
    name: String,
    filters: filter::FilterState,
    #[serde(default)]
    is_shared: bool,
}

async fn add_view(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Json(input): Json<AddViewInput>,
) -> Result<Json<api::SavedView>, AddViewError> {
    let view = db::SavedView {
        id: api::view::Id::new(),
        name: input.name,
        filters: input.filters,
        is_shared: input.is_shared,
        owner: auth_claims.user_id,
    };

    state.db_client.write_view(&view).await?;

    Ok(Json(view.into()))
}

#[derive(Debug, From)]
pub enum AddViewError {
    #[from]
    DbError(db::Error),
}

impl IntoResponse for AddViewError {
    fn into_response(self) -> Response {
        match self {
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

async fn delete_view(
    State(state): State<SharedAppState>,
    auth_claims: AuthClaims,
    Path(id): Path<api::view::Id>,
) -> Result<StatusCode, DeleteViewError> {
    use DeleteViewError as E;

    let view = state
        .db_client
        .get_view_by_id(id)
        .await?
        .ok_or(E::ViewNotFound)?;
    let is_admin = matches!(auth_claims.role, user::Role::Admin);
    if view.owner != auth_claims.user_id && !is_admin {
        return Err(E::ViewCannotBeDeleted);
    }

    state.db_client.delete_view(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, From)]
pub enum DeleteViewError {
    #[from]
    DbError(db::Error),
    ViewCannotBeDeleted,
    ViewNotFound,
}

impl IntoResponse for DeleteViewError {
    fn into_response(self) -> Response {
        match self {
            Self::ViewCannotBeDeleted => StatusCode::FORBIDDEN,
            Self::ViewNotFound => StatusCode::NOT_FOUND,
            Self::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into_response()
    }
}

type SharedAppState = Arc<AppState>;

struct AppState {
    db_client: db::Client,

    jwt_decoding_key: DecodingKey,
}

/// Claims issued by the external auth platform. This service only verifies;
/// a token with a malformed role or missing identity is rejected outright.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct AuthClaims {
    user_id: user::Id,
    role: user::Role,
    #[allow(dead_code)]
    exp: i64,
}

impl AuthClaims {
    fn actor(&self) -> filter::Actor {
        filter::Actor {
            id: self.user_id,
            role: self.role,
        }
    }
}

#[derive(Debug)]
pub enum AuthError {
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match self {
            Self::InvalidToken => StatusCode::UNAUTHORIZED,
        }
        .into_response()
    }
}

#[async_trait]
impl FromRequestParts<SharedAppState> for AuthClaims {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut request::Parts,
        state: &SharedAppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::InvalidToken)?;
        let token_data = decode::<Self>(
            bearer.token(),
            &state.jwt_decoding_key,
            &Validation::default(),
        )
        .map_err(|_| AuthError::InvalidToken)?;

        Ok(token_data.claims)
    }
}
