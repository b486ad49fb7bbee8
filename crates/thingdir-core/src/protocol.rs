//! Wire contract shared by the server and the client
//!
//! Routes, query parameter names, paging policy and the error body format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::DirError;

/// Collection endpoint: list and query
pub const ROUTE_THINGS: &str = "/things";

/// Item endpoint: read, create, replace, patch, delete
pub const ROUTE_THING_ID: &str = "/things/:id";

/// Filter expression parameter on the collection endpoint
pub const PARAM_QUERY: &str = "queryparams";
pub const PARAM_OFFSET: &str = "offset";
pub const PARAM_LIMIT: &str = "limit";

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 1000;

pub const DEFAULT_PORT: u16 = 8886;

/// Header carrying the verified client certificate subject, set by the
/// TLS terminator in front of the server
pub const HEADER_CLIENT_IDENTITY: &str = "x-client-identity";

pub const DEFAULT_SERVICE_TYPE: &str = "_thingdir._tcp";

/// Error classification carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    BadRequest,
    Unauthorized,
    InternalError,
}

impl ErrorKind {
    /// HTTP status code for this kind
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::BadRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::InternalError => 500,
        }
    }

    /// Classify a status code when the response body carries no kind
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => ErrorKind::NotFound,
            409 => ErrorKind::AlreadyExists,
            400 | 422 => ErrorKind::BadRequest,
            401 | 403 => ErrorKind::Unauthorized,
            _ => ErrorKind::InternalError,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InternalError => "internal_error",
        };
        f.write_str(name)
    }
}

/// JSON body of an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&DirError> for ErrorBody {
    fn from(err: &DirError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Page size policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLimits {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "max_limit")]
    pub max_limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn max_limit() -> usize {
    MAX_LIMIT
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

impl PageLimits {
    /// Effective page size: 0 means the default, anything above the
    /// maximum is cut down to it
    pub fn clamp(&self, limit: usize) -> usize {
        let limit = if limit == 0 { self.default_limit } else { limit };
        limit.min(self.max_limit)
    }
}

/// Paging and filter parameters of a collection request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub query: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

/// Extract paging parameters from a query string map
///
/// Missing values default to offset 0 and limit 0 (the default page size).
/// Negative or unparsable numbers are a `BadRequest`. A blank filter
/// expression means a plain listing.
pub fn parse_page(params: &HashMap<String, String>) -> Result<PageRequest, DirError> {
    Ok(PageRequest {
        query: params
            .get(PARAM_QUERY)
            .filter(|expr| !expr.trim().is_empty())
            .cloned(),
        offset: parse_count(params, PARAM_OFFSET)?,
        limit: parse_count(params, PARAM_LIMIT)?,
    })
}

fn parse_count(params: &HashMap<String, String>, name: &str) -> Result<usize, DirError> {
    let Some(raw) = params.get(name) else {
        return Ok(0);
    };
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| DirError::BadRequest(format!("{} must be an integer, got '{}'", name, raw)))?;
    usize::try_from(value)
        .map_err(|_| DirError::BadRequest(format!("{} must not be negative, got {}", name, value)))
}
