//! Documents Lambda - Document CRUD, listing and search.
//!
//! Endpoints:
//! - POST /api/documents - Create a document
//! - GET /api/documents - List own documents (?page, limit, search, tag)
//! - GET /api/documents/public - List public documents
//! - GET /api/documents/search?q= - Search public and own documents
//! - GET /api/documents/user/{userId} - List a user's documents (self or admin)
//! - GET /api/documents/{id} - Get a document
//! - PUT /api/documents/{id} - Update a document (owner)
//! - DELETE /api/documents/{id} - Delete a document (owner)

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shared::auth::{authenticate, optional_user, TokenService};
use shared::documents::{self, authorize, Access, DocumentFilter, Scope};
use shared::http::{no_content, parse_uuid, query_param, segments, success, RequestLog};
use shared::models::{CreateDocumentRequest, DocumentResponse, UpdateDocumentRequest};
use shared::{parse_body, AppContext, AuthenticatedUser, Pagination};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Create,
    ListOwn,
    ListPublic,
    Search,
    ListByUser(String),
    Get(String),
    Update(String),
    Delete(String),
}

impl Route {
    fn parse(method: &str, path: &str) -> Option<Self> {
        match (method, segments(path).as_slice()) {
            ("POST", ["api", "documents"]) => Some(Self::Create),
            ("GET", ["api", "documents"]) => Some(Self::ListOwn),
            ("GET", ["api", "documents", "public"]) => Some(Self::ListPublic),
            ("GET", ["api", "documents", "search"]) => Some(Self::Search),
            ("GET", ["api", "documents", "user", user_id]) => {
                Some(Self::ListByUser(user_id.to_string()))
            }
            ("GET", ["api", "documents", id]) => Some(Self::Get(id.to_string())),
            ("PUT", ["api", "documents", id]) => Some(Self::Update(id.to_string())),
            ("DELETE", ["api", "documents", id]) => Some(Self::Delete(id.to_string())),
            _ => None,
        }
    }
}

/// Self or admin may list a user's documents.
fn can_list_user(caller: &AuthenticatedUser, owner: uuid::Uuid) -> shared::Result<()> {
    if caller.user_id == owner || caller.is_admin() {
        Ok(())
    } else {
        Err(shared::Error::Forbidden("Access denied".to_string()))
    }
}

/// Application state
struct AppState {
    db_pool: sqlx::PgPool,
    tokens: TokenService,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let ctx = AppContext::load().await?;
        let tokens = ctx.token_service().await?;

        Ok(Self {
            db_pool: ctx.pool,
            tokens,
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let request = RequestLog::start(&event);

    info!("Documents request: {} {}", request.method, request.path);

    request.finish(dispatch(&state, &event, &request.method, &request.path).await)
}

async fn dispatch(
    state: &AppState,
    event: &Request,
    method: &str,
    path: &str,
) -> shared::Result<Response<Body>> {
    let route = Route::parse(method, path)
        .ok_or_else(|| shared::Error::NotFound("Not found".to_string()))?;
    let pool = &state.db_pool;

    match route {
        Route::Create => {
            let caller = authenticate(event, &state.tokens)?;
            let request = parse_body!(event.body(), CreateDocumentRequest, normalized);

            let document = documents::create(pool, caller.user_id, &request).await?;
            info!(document_id = %document.id, user_id = %caller.user_id, "Document created");

            success(201, DocumentResponse::from(document))
        }

        Route::ListOwn => {
            let caller = authenticate(event, &state.tokens)?;
            let filter = DocumentFilter::new(Scope::Owner(caller.user_id))
                .search(query_param(event, "search"))
                .tag(query_param(event, "tag"));

            success(200, documents::list(pool, &filter, Pagination::from_request(event)).await?)
        }

        Route::ListPublic => {
            let filter = DocumentFilter::new(Scope::Public)
                .search(query_param(event, "search"))
                .tag(query_param(event, "tag"));

            success(200, documents::list(pool, &filter, Pagination::from_request(event)).await?)
        }

        Route::Search => {
            let viewer = optional_user(event, &state.tokens)?;
            let query = query_param(event, "q").ok_or_else(|| {
                shared::Error::Validation("Search query is required".to_string())
            })?;
            let filter = DocumentFilter::new(Scope::VisibleTo(viewer.map(|v| v.user_id)))
                .search(Some(query))
                .tag(query_param(event, "tag"));

            success(200, documents::list(pool, &filter, Pagination::from_request(event)).await?)
        }

        Route::ListByUser(raw_id) => {
            let caller = authenticate(event, &state.tokens)?;
            let owner = parse_uuid(&raw_id, "user id")?;
            can_list_user(&caller, owner)?;

            let filter = DocumentFilter::new(Scope::Owner(owner))
                .search(query_param(event, "search"))
                .tag(query_param(event, "tag"));

            success(200, documents::list(pool, &filter, Pagination::from_request(event)).await?)
        }

        Route::Get(raw_id) => {
            let viewer = optional_user(event, &state.tokens)?;
            let id = parse_uuid(&raw_id, "document id")?;

            let document = documents::get(pool, id).await?;
            authorize(&document, viewer.as_ref(), Access::Read)?;

            success(200, DocumentResponse::from(document))
        }

        Route::Update(raw_id) => {
            let caller = authenticate(event, &state.tokens)?;
            let id = parse_uuid(&raw_id, "document id")?;
            let request = parse_body!(event.body(), UpdateDocumentRequest, normalized);
            if request.is_empty() {
                return Err(shared::Error::Validation("No changes provided".to_string()));
            }

            let document = documents::get(pool, id).await?;
            authorize(&document, Some(&caller), Access::Write)?;

            let updated = documents::update(pool, id, caller.user_id, &request).await?;
            info!(document_id = %id, "Document updated");

            success(200, DocumentResponse::from(updated))
        }

        Route::Delete(raw_id) => {
            let caller = authenticate(event, &state.tokens)?;
            let id = parse_uuid(&raw_id, "document id")?;

            let document = documents::get(pool, id).await?;
            authorize(&document, Some(&caller), Access::Write)?;

            documents::delete(pool, id, caller.user_id).await?;
            info!(document_id = %id, "Document deleted");

            no_content()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);
    let state_clone = state.clone();

    run(service_fn(move |event| {
        let state = state_clone.clone();
        async move { handler(state, event).await }
    }))
    .await
}
