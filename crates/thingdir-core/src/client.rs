//! Directory client
//!
//! Typed async access to a directory server over HTTP(S). Server errors are
//! decoded from the `{"kind", "message"}` body and returned as
//! [`ClientError::Server`]. Requests are never retried.

use std::path::{Path, PathBuf};

use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::basic_header;
use crate::document::Document;
use crate::protocol::{ErrorBody, ErrorKind, PARAM_LIMIT, PARAM_OFFSET, PARAM_QUERY};

/// Errors returned by the directory client
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with an error
    #[error("{kind}: {message}")]
    Server { kind: ErrorKind, message: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Client is not connected")]
    NotConnected,

    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to load certificate {path:?}: {reason}")]
    Certificate { path: PathBuf, reason: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Error kind reported by the server, if this is a server error
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Server { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Client for a directory server
#[derive(Debug)]
pub struct DirClient {
    base_url: Url,
    ca_cert: Option<PathBuf>,
    http: Option<reqwest::Client>,
    auth_header: Option<String>,
}

impl DirClient {
    /// Create a disconnected client for the server at `base_url`
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("expected an http or https URL".to_string()));
        }

        Ok(Self {
            base_url: url,
            ca_cert: None,
            http: None,
            auth_header: None,
        })
    }

    /// Trust the CA in this PEM file when verifying the server
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn is_connected(&self) -> bool {
        self.http.is_some()
    }

    // ==================== Connection ====================

    /// Connect without credentials
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let builder = self.client_builder()?;
        self.establish(builder, None).await
    }

    /// Connect using HTTP Basic authentication
    pub async fn connect_with_password(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let builder = self.client_builder()?;
        self.establish(builder, Some(basic_header(username, password)))
            .await
    }

    /// Connect presenting a client certificate
    ///
    /// `cert_path` and `key_path` are PEM files.
    pub async fn connect_with_client_cert(
        &mut self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), ClientError> {
        let mut pem = read_pem(cert_path.as_ref())?;
        pem.push(b'\n');
        pem.extend(read_pem(key_path.as_ref())?);
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| ClientError::Certificate {
            path: cert_path.as_ref().to_path_buf(),
            reason: e.to_string(),
        })?;

        let builder = self.client_builder()?.identity(identity);
        self.establish(builder, None).await
    }

    /// Drop the connection and credentials
    pub fn close(&mut self) {
        if self.http.take().is_some() {
            debug!("Disconnected from {}", self.base_url);
        }
        self.auth_header = None;
    }

    fn client_builder(&self) -> Result<reqwest::ClientBuilder, ClientError> {
        // Client identities are loaded as rustls identities
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ));
        if let Some(path) = &self.ca_cert {
            let pem = read_pem(path)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                ClientError::Certificate {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            })?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(builder)
    }

    /// Build the HTTP client and check the server accepts us
    async fn establish(
        &mut self,
        builder: reqwest::ClientBuilder,
        auth_header: Option<String>,
    ) -> Result<(), ClientError> {
        self.http = Some(builder.build()?);
        self.auth_header = auth_header;

        let mut url = self.collection_url()?;
        url.query_pairs_mut().append_pair(PARAM_LIMIT, "1");
        let check = self.send(|http| http.get(url)).await;
        if let Err(e) = check {
            self.close();
            return Err(e);
        }

        info!("Connected to directory at {}", self.base_url);
        Ok(())
    }

    // ==================== Document Operations ====================

    /// Add a new document; fails with `AlreadyExists` if the ID is taken
    pub async fn create(&self, id: &str, doc: &Document) -> Result<(), ClientError> {
        let url = self.thing_url(id)?;
        self.send(|http| http.post(url).json(doc)).await?;
        Ok(())
    }

    /// Create or replace a document
    pub async fn update(&self, id: &str, doc: &Document) -> Result<(), ClientError> {
        let url = self.thing_url(id)?;
        self.send(|http| http.put(url).json(doc)).await?;
        Ok(())
    }

    pub async fn read(&self, id: &str) -> Result<Document, ClientError> {
        let url = self.thing_url(id)?;
        let response = self.send(|http| http.get(url)).await?;
        decode(response).await
    }

    /// Merge fields into an existing document
    pub async fn patch(&self, id: &str, partial: &Document) -> Result<(), ClientError> {
        let url = self.thing_url(id)?;
        self.send(|http| http.patch(url).json(partial)).await?;
        Ok(())
    }

    /// Remove a document; succeeds if it doesn't exist
    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let url = self.thing_url(id)?;
        self.send(|http| http.delete(url)).await?;
        Ok(())
    }

    /// A page of documents in ID order
    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Document>, ClientError> {
        let url = self.page_url(None, offset, limit)?;
        let response = self.send(|http| http.get(url)).await?;
        decode(response).await
    }

    /// A page of the values matching a filter expression
    pub async fn query(
        &self,
        expr: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Value>, ClientError> {
        let url = self.page_url(Some(expr), offset, limit)?;
        let response = self.send(|http| http.get(url)).await?;
        decode(response).await
    }

    // ==================== Requests ====================

    async fn send<F>(&self, build: F) -> Result<Response, ClientError>
    where
        F: FnOnce(&reqwest::Client) -> RequestBuilder,
    {
        let http = self.http.as_ref().ok_or(ClientError::NotConnected)?;
        let mut request = build(http);
        if let Some(header) = &self.auth_header {
            request = request.header(AUTHORIZATION, header);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(server_error(response).await)
    }

    fn collection_url(&self) -> Result<Url, ClientError> {
        self.url_with_segments(&["things"])
    }

    fn thing_url(&self, id: &str) -> Result<Url, ClientError> {
        self.url_with_segments(&["things", id])
    }

    fn page_url(&self, expr: Option<&str>, offset: usize, limit: usize) -> Result<Url, ClientError> {
        let mut url = self.collection_url()?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(expr) = expr {
                pairs.append_pair(PARAM_QUERY, expr);
            }
            pairs.append_pair(PARAM_OFFSET, &offset.to_string());
            pairs.append_pair(PARAM_LIMIT, &limit.to_string());
        }
        Ok(url)
    }

    /// Base URL with path segments appended, each percent-encoded
    fn url_with_segments(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "cannot append path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ClientError> {
    std::fs::read(path).map_err(|e| ClientError::Certificate {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Turn an error response into `ClientError::Server`
///
/// Falls back to classifying by status when the body isn't an error body.
async fn server_error(response: Response) -> ClientError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ClientError::Server {
            kind: body.kind,
            message: body.message,
        },
        Err(_) => ClientError::Server {
            kind: ErrorKind::from_status(status.as_u16()),
            message: if text.is_empty() {
                status.to_string()
            } else {
                text
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, Authenticator, Authorizer, DenyAll, PasswordAuthenticator, Role, RoleAuthorizer};
    use crate::config::Config;
    use crate::server::DirServer;
    use crate::store::DirStore;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct TestServer {
        _temp_dir: TempDir,
        server: DirServer,
        url: String,
    }

    impl TestServer {
        async fn start(
            authenticator: Arc<dyn Authenticator>,
            authorizer: Arc<dyn Authorizer>,
        ) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let config = Config {
                store_path: temp_dir.path().join("store").join("directory.json"),
                address: "127.0.0.1".to_string(),
                port: 0,
                ..Config::default()
            };
            let store = Arc::new(DirStore::new(&config.store_path));
            let mut server = DirServer::new(config, store, authenticator, authorizer);
            let addr = server.start().await.unwrap();
            Self {
                _temp_dir: temp_dir,
                server,
                url: format!("http://{}", addr),
            }
        }

        async fn open() -> Self {
            Self::start(Arc::new(AllowAll), Arc::new(AllowAll)).await
        }

        async fn client(&self) -> DirClient {
            let mut client = DirClient::new(&self.url).unwrap();
            client.connect().await.unwrap();
            client
        }
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    fn thing(id: &str, kind: &str) -> Document {
        doc(json!({"id": id, "type": kind}))
    }

    #[test]
    fn test_new_rejects_bad_urls() {
        assert!(matches!(
            DirClient::new("not a url"),
            Err(ClientError::InvalidUrl { .. })
        ));
        assert!(matches!(
            DirClient::new("mailto:admin@example.com"),
            Err(ClientError::InvalidUrl { .. })
        ));
        assert!(DirClient::new("https://dir.example.com:8886").is_ok());
    }

    #[test]
    fn test_urls_encode_ids() {
        let client = DirClient::new("http://localhost:8886/api/").unwrap();
        assert_eq!(
            client.thing_url("urn:thing/1 a").unwrap().as_str(),
            "http://localhost:8886/api/things/urn:thing%2F1%20a"
        );

        let page = client.page_url(Some("$.*"), 5, 10).unwrap();
        assert_eq!(page.path(), "/api/things");
        let pairs: Vec<(String, String)> = page.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("queryparams".to_string(), "$.*".to_string()),
                ("offset".to_string(), "5".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_not_connected() {
        let client = DirClient::new("http://127.0.0.1:1").unwrap();
        assert!(matches!(
            client.read("thing1").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = DirClient::new(&format!("http://{}", addr)).unwrap();
        assert!(matches!(
            client.connect().await,
            Err(ClientError::Transport(_))
        ));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let mut t = TestServer::open().await;
        let mut client = t.client().await;

        client.create("thing1", &thing("thing1", "sensor")).await.unwrap();
        assert_eq!(client.read("thing1").await.unwrap(), thing("thing1", "sensor"));

        client.update("thing1", &thing("thing1", "actuator")).await.unwrap();
        client
            .patch("thing1", &doc(json!({"title": "Lamp"})))
            .await
            .unwrap();
        assert_eq!(
            Value::Object(client.read("thing1").await.unwrap()),
            json!({"id": "thing1", "type": "actuator", "title": "Lamp"})
        );

        client.delete("thing1").await.unwrap();
        client.delete("thing1").await.unwrap();
        let err = client.read("thing1").await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));

        client.close();
        assert!(!client.is_connected());
        t.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_kinds_are_surfaced() {
        let mut t = TestServer::open().await;
        let client = t.client().await;
        client.create("thing1", &thing("thing1", "sensor")).await.unwrap();

        let err = client
            .create("thing1", &thing("thing1", "sensor"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::AlreadyExists));

        let err = client
            .patch("ghost", &doc(json!({"title": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));

        let err = client.patch("thing1", &Document::new()).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BadRequest));

        let err = client.query("$[?(@.type==", 0, 0).await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::BadRequest));
        assert!(err.to_string().starts_with("bad_request"));

        t.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_list_and_query() {
        let mut t = TestServer::open().await;
        let client = t.client().await;
        for (id, kind) in [
            ("thing1", "sensor"),
            ("thing2", "sensor"),
            ("thing3", "actuator"),
            ("thing4", "gateway"),
        ] {
            client.update(id, &thing(id, kind)).await.unwrap();
        }

        assert_eq!(client.list(0, 0).await.unwrap().len(), 4);
        let page = client.list(1, 2).await.unwrap();
        assert_eq!(page, vec![thing("thing2", "sensor"), thing("thing3", "actuator")]);
        assert!(client.list(4, 10).await.unwrap().is_empty());

        let sensors = client
            .query(r#"$[?(@.type=="sensor")]"#, 0, 0)
            .await
            .unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0]["id"], "thing1");

        let types = client.query("$..type", 2, 0).await.unwrap();
        assert_eq!(types, vec![json!("actuator"), json!("gateway")]);

        t.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_with_reserved_characters() {
        let mut t = TestServer::open().await;
        let client = t.client().await;
        let id = "urn:dev/sensor 1?x#y";

        client.update(id, &thing(id, "sensor")).await.unwrap();
        assert_eq!(client.read(id).await.unwrap()["id"], id);
        assert_eq!(t.server.store().read(id).unwrap()["id"], id);

        t.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_deny_all_authorizer() {
        let mut t = TestServer::start(Arc::new(AllowAll), Arc::new(DenyAll)).await;
        t.server
            .store()
            .replace("thing1", thing("thing1", "sensor"))
            .unwrap();
        let client = t.client().await;

        assert!(client.list(0, 0).await.unwrap().is_empty());
        assert!(client.query("$", 0, 0).await.unwrap().is_empty());
        assert_eq!(
            client.read("thing1").await.unwrap_err().kind(),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(
            client
                .update("thing1", &thing("thing1", "x"))
                .await
                .unwrap_err()
                .kind(),
            Some(ErrorKind::Unauthorized)
        );
        assert_eq!(
            client.delete("thing1").await.unwrap_err().kind(),
            Some(ErrorKind::Unauthorized)
        );

        t.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_password_connect() {
        let mut t = TestServer::start(
            Arc::new(PasswordAuthenticator::new(false).with_user("alice", "secret")),
            Arc::new(RoleAuthorizer::new().with_role("alice", Role::Editor)),
        )
        .await;

        let mut anonymous = DirClient::new(&t.url).unwrap();
        let err = anonymous.connect().await.unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Unauthorized));
        assert!(!anonymous.is_connected());

        let mut wrong = DirClient::new(&t.url).unwrap();
        assert_eq!(
            wrong
                .connect_with_password("alice", "nope")
                .await
                .unwrap_err()
                .kind(),
            Some(ErrorKind::Unauthorized)
        );

        let mut alice = DirClient::new(&t.url).unwrap();
        alice.connect_with_password("alice", "secret").await.unwrap();
        alice.create("thing1", &thing("thing1", "sensor")).await.unwrap();
        assert_eq!(alice.list(0, 0).await.unwrap().len(), 1);

        t.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_cert_files_must_exist() {
        let temp_dir = TempDir::new().unwrap();
        let mut client = DirClient::new("https://127.0.0.1:8886").unwrap();
        let err = client
            .connect_with_client_cert(
                temp_dir.path().join("client.pem"),
                temp_dir.path().join("client.key"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Certificate { .. }));

        let mut with_ca = DirClient::new("https://127.0.0.1:8886")
            .unwrap()
            .with_ca_cert(temp_dir.path().join("ca.pem"));
        assert!(matches!(
            with_ca.connect().await,
            Err(ClientError::Certificate { .. })
        ));
    }

    /// Write a self-signed certificate and its private key as PEM files
    fn write_cert_pair(dir: &Path) -> (PathBuf, PathBuf) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.join("client.pem");
        let key_path = dir.join("client.key");
        std::fs::write(&cert_path, certified.cert.pem()).unwrap();
        std::fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    #[tokio::test]
    async fn test_client_cert_connect() {
        let mut t = TestServer::open().await;
        let temp_dir = TempDir::new().unwrap();
        let (cert_path, key_path) = write_cert_pair(temp_dir.path());

        let mut client = DirClient::new(&t.url).unwrap();
        client
            .connect_with_client_cert(&cert_path, &key_path)
            .await
            .unwrap();
        assert!(client.is_connected());

        client.update("thing1", &thing("thing1", "sensor")).await.unwrap();
        assert_eq!(client.read("thing1").await.unwrap()["type"], "sensor");

        t.server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_cert_rejects_garbage_pem() {
        let temp_dir = TempDir::new().unwrap();
        let cert_path = temp_dir.path().join("client.pem");
        let key_path = temp_dir.path().join("client.key");
        std::fs::write(&cert_path, "not a certificate").unwrap();
        std::fs::write(&key_path, "not a key").unwrap();

        let mut client = DirClient::new("https://127.0.0.1:8886").unwrap();
        let err = client
            .connect_with_client_cert(&cert_path, &key_path)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Certificate { .. }));
        assert!(!client.is_connected());
    }
}
