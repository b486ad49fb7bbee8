//! Request handlers
//!
//! Every handler runs authenticate, authorize, execute, then maps the
//! outcome to a response. Errors become `{"kind", "message"}` bodies.
//!
//! Store operations take the store lock and may write to disk, so they run
//! on the blocking pool rather than on the async workers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;
use tracing::{debug, error};

use super::AppState;
use crate::auth::{Action, Credentials, Identity};
use crate::document::{self, Document};
use crate::error::DirError;
use crate::protocol::{parse_page, ErrorBody, HEADER_CLIENT_IDENTITY};

impl IntoResponse for DirError {
    fn into_response(self) -> Response {
        let body = ErrorBody::from(&self);
        let status = StatusCode::from_u16(body.kind.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", body.message);
        } else {
            debug!("Request rejected ({}): {}", body.kind, body.message);
        }
        (status, Json(body)).into_response()
    }
}

/// Resolve the caller from the request headers
///
/// The client identity header is ignored unless the server sits behind a
/// TLS terminator configured to set it.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, DirError> {
    let client_identity = if state.trust_identity_header {
        header_str(headers, HEADER_CLIENT_IDENTITY)?
    } else {
        if headers.contains_key(HEADER_CLIENT_IDENTITY) {
            debug!("Ignoring untrusted {} header", HEADER_CLIENT_IDENTITY);
        }
        None
    };
    let credentials = Credentials::from_headers(
        header_str(headers, header::AUTHORIZATION.as_str())?,
        client_identity,
    )?;
    state.authenticator.authenticate(&credentials)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, DirError> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| DirError::Unauthorized(format!("invalid {} header", name)))
        })
        .transpose()
}

/// Fail with `Unauthorized` unless the caller may perform `action` on `id`
fn require(state: &AppState, identity: &Identity, action: Action, id: &str) -> Result<(), DirError> {
    if state.authorizer.authorize(identity, action, id) {
        Ok(())
    } else {
        Err(DirError::Unauthorized(format!(
            "'{}' is not allowed to {} '{}'",
            identity, action, id
        )))
    }
}

/// Run a store operation on the blocking pool
async fn blocking<T, F>(op: F) -> Result<T, DirError>
where
    F: FnOnce() -> Result<T, DirError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| DirError::Internal(format!("store task failed: {}", e)))?
}

/// `GET /things`: a page of documents, or of query matches when
/// `queryparams` is given
///
/// Documents the caller may not read are left out without shortening the page.
pub async fn list_things(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Value>>, DirError> {
    let identity = authenticate(&state, &headers)?;
    let page = parse_page(&params)?;
    let store = Arc::clone(&state.store);
    let authorizer = Arc::clone(&state.authorizer);

    let items = blocking(move || {
        let admit = |id: &str| authorizer.authorize(&identity, Action::Read, id);
        match &page.query {
            Some(expr) => store.query_where(expr, page.offset, page.limit, admit),
            None => Ok(store
                .list_where(page.offset, page.limit, admit)?
                .into_iter()
                .map(Value::Object)
                .collect()),
        }
    })
    .await?;
    Ok(Json(items))
}

/// `GET /things/{id}`
///
/// A document the caller may not read is reported as missing.
pub async fn get_thing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Document>, DirError> {
    let identity = authenticate(&state, &headers)?;
    if !state.authorizer.authorize(&identity, Action::Read, &id) {
        return Err(DirError::NotFound(id));
    }
    let store = Arc::clone(&state.store);
    Ok(Json(blocking(move || store.read(&id)).await?))
}

/// `POST /things/{id}`: strict create
pub async fn create_thing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, DirError> {
    let identity = authenticate(&state, &headers)?;
    require(&state, &identity, Action::Write, &id)?;
    let doc = document::from_slice(&body)?;
    let store = Arc::clone(&state.store);
    blocking(move || store.create(&id, doc)).await?;
    Ok(StatusCode::CREATED)
}

/// `PUT /things/{id}`: create or replace
pub async fn replace_thing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, DirError> {
    let identity = authenticate(&state, &headers)?;
    require(&state, &identity, Action::Write, &id)?;
    let doc = document::from_slice(&body)?;
    let store = Arc::clone(&state.store);
    blocking(move || store.replace(&id, doc)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /things/{id}`: merge fields into an existing document
pub async fn patch_thing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, DirError> {
    let identity = authenticate(&state, &headers)?;
    require(&state, &identity, Action::Write, &id)?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(DirError::BadRequest("patch payload is required".into()));
    }
    let partial = document::from_slice(&body)?;
    let store = Arc::clone(&state.store);
    blocking(move || store.patch(&id, &partial)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /things/{id}`: succeeds whether or not the document exists
pub async fn delete_thing(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, DirError> {
    let identity = authenticate(&state, &headers)?;
    require(&state, &identity, Action::Delete, &id)?;
    let store = Arc::clone(&state.store);
    blocking(move || store.delete(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}
