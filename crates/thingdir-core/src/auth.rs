//! Authentication and authorization hooks
//!
//! The server resolves each request's [`Credentials`] into an [`Identity`]
//! with an [`Authenticator`], then asks an [`Authorizer`] whether that
//! identity may perform an [`Action`] on a document. Both are traits so
//! deployments can plug in their own providers.

use std::collections::HashMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::DirError;

/// Name given to unauthenticated callers
pub const ANONYMOUS: &str = "anonymous";

/// What a caller presented
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    /// Subject of a client certificate verified by the TLS terminator
    Certificate { subject: String },
    Password { username: String, password: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Certificate { subject } => f
                .debug_struct("Certificate")
                .field("subject", subject)
                .finish(),
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

impl Credentials {
    /// Build credentials from request header values
    ///
    /// A Basic `Authorization` header wins over a client identity header.
    /// A malformed `Authorization` header is rejected rather than treated
    /// as anonymous.
    pub fn from_headers(
        authorization: Option<&str>,
        client_identity: Option<&str>,
    ) -> Result<Self, DirError> {
        if let Some(header) = authorization {
            return parse_basic(header);
        }
        match client_identity.map(str::trim) {
            Some(subject) if !subject.is_empty() => Ok(Credentials::Certificate {
                subject: subject.to_string(),
            }),
            _ => Ok(Credentials::Anonymous),
        }
    }
}

fn parse_basic(header: &str) -> Result<Credentials, DirError> {
    let invalid = || DirError::Unauthorized("malformed Authorization header".into());

    let (scheme, encoded) = header.trim().split_once(' ').ok_or_else(invalid)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(DirError::Unauthorized(format!(
            "unsupported authorization scheme '{}'",
            scheme
        )));
    }
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| invalid())?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
    let (username, password) = decoded.split_once(':').ok_or_else(invalid)?;

    Ok(Credentials::Password {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Encode a Basic `Authorization` header value
pub fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

/// How a caller was authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Anonymous,
    Certificate,
    User,
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub kind: IdentityKind,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            name: ANONYMOUS.to_string(),
            kind: IdentityKind::Anonymous,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Operation class checked by the authorizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::Delete => "delete",
        })
    }
}

/// Resolves credentials into an identity
pub trait Authenticator: Send + Sync {
    /// Fails with `DirError::Unauthorized` when the credentials are not accepted
    fn authenticate(&self, credentials: &Credentials) -> Result<Identity, DirError>;
}

/// Decides whether an identity may act on a document
pub trait Authorizer: Send + Sync {
    fn authorize(&self, identity: &Identity, action: Action, id: &str) -> bool;
}

/// Accepts every caller and permits every action
///
/// Passwords are not checked. Only suitable for tests and closed networks.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    fn authenticate(&self, credentials: &Credentials) -> Result<Identity, DirError> {
        Ok(match credentials {
            Credentials::Anonymous => Identity::anonymous(),
            Credentials::Certificate { subject } => Identity {
                name: subject.clone(),
                kind: IdentityKind::Certificate,
            },
            Credentials::Password { username, .. } => Identity {
                name: username.clone(),
                kind: IdentityKind::User,
            },
        })
    }
}

impl Authorizer for AllowAll {
    fn authorize(&self, _identity: &Identity, _action: Action, _id: &str) -> bool {
        true
    }
}

/// Refuses every action
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl Authorizer for DenyAll {
    fn authorize(&self, _identity: &Identity, _action: Action, _id: &str) -> bool {
        false
    }
}

/// Access level of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read only
    Viewer,
    /// Read, write and delete
    Editor,
}

impl Role {
    pub fn permits(self, action: Action) -> bool {
        match self {
            Role::Viewer => action == Action::Read,
            Role::Editor => true,
        }
    }
}

/// Checks usernames and passwords against a fixed table
///
/// Certificate subjects are accepted as-is, since the certificate was
/// already verified in front of the server.
#[derive(Clone, Default)]
pub struct PasswordAuthenticator {
    passwords: HashMap<String, String>,
    allow_anonymous: bool,
}

impl PasswordAuthenticator {
    pub fn new(allow_anonymous: bool) -> Self {
        Self {
            passwords: HashMap::new(),
            allow_anonymous,
        }
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.passwords.insert(username.into(), password.into());
        self
    }

    pub fn from_config(config: &Config) -> Self {
        config
            .users
            .iter()
            .fold(Self::new(config.allow_anonymous), |auth, (name, user)| {
                auth.with_user(name.clone(), user.password.clone())
            })
    }
}

impl Authenticator for PasswordAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Result<Identity, DirError> {
        match credentials {
            Credentials::Anonymous if self.allow_anonymous => Ok(Identity::anonymous()),
            Credentials::Anonymous => {
                Err(DirError::Unauthorized("authentication required".into()))
            }
            Credentials::Certificate { subject } => Ok(Identity {
                name: subject.clone(),
                kind: IdentityKind::Certificate,
            }),
            Credentials::Password { username, password } => {
                match self.passwords.get(username) {
                    Some(expected) if expected == password => Ok(Identity {
                        name: username.clone(),
                        kind: IdentityKind::User,
                    }),
                    _ => Err(DirError::Unauthorized(
                        "invalid username or password".into(),
                    )),
                }
            }
        }
    }
}

/// Grants actions by role
///
/// Users get the role configured for them. Certificate holders get
/// `certificate_role` and anonymous callers get `anonymous_role`. Callers
/// without a role are refused everything.
#[derive(Debug, Clone, Default)]
pub struct RoleAuthorizer {
    roles: HashMap<String, Role>,
    certificate_role: Option<Role>,
    anonymous_role: Option<Role>,
}

impl RoleAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_role(mut self, username: impl Into<String>, role: Role) -> Self {
        self.roles.insert(username.into(), role);
        self
    }

    pub fn with_certificate_role(mut self, role: Role) -> Self {
        self.certificate_role = Some(role);
        self
    }

    pub fn with_anonymous_role(mut self, role: Role) -> Self {
        self.anonymous_role = Some(role);
        self
    }

    /// Anonymous callers, when allowed at all, are viewers
    pub fn from_config(config: &Config) -> Self {
        let mut authorizer = config
            .users
            .iter()
            .fold(Self::new(), |authz, (name, user)| {
                authz.with_role(name.clone(), user.role)
            });
        authorizer.certificate_role = config.certificate_role;
        if config.allow_anonymous {
            authorizer.anonymous_role = Some(Role::Viewer);
        }
        authorizer
    }

    fn role_of(&self, identity: &Identity) -> Option<Role> {
        match identity.kind {
            IdentityKind::Anonymous => self.anonymous_role,
            IdentityKind::Certificate => self.certificate_role,
            IdentityKind::User => self.roles.get(&identity.name).copied(),
        }
    }
}

impl Authorizer for RoleAuthorizer {
    fn authorize(&self, identity: &Identity, action: Action, _id: &str) -> bool {
        self.role_of(identity)
            .map(|role| role.permits(action))
            .unwrap_or(false)
    }
}
