//! Document command handlers
//!
//! Each command opens its own client connection to a running server.

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};

use thingdir_core::document::{self, Document};
use thingdir_core::{Config, DirClient};

use crate::output::Output;
use crate::{ConnectArgs, PageArgs};

/// Read a document
pub async fn get(config: &Config, conn: &ConnectArgs, id: &str, output: &Output) -> Result<()> {
    let client = connect(config, conn).await?;
    let doc = client
        .read(id)
        .await
        .with_context(|| format!("Failed to read {}", id))?;
    output.print_document(id, &doc);
    Ok(())
}

/// Add a new document
pub async fn create(
    config: &Config,
    conn: &ConnectArgs,
    id: Option<String>,
    input: &str,
    output: &Output,
) -> Result<()> {
    let doc = parse_document(input)?;
    let id = resolve_id(id, &doc);

    let client = connect(config, conn).await?;
    client
        .create(&id, &doc)
        .await
        .with_context(|| format!("Failed to create {}", id))?;

    if output.is_quiet() {
        println!("{}", id);
    }
    output.success(&format!("Created {}", id));
    Ok(())
}

/// Create or replace a document
pub async fn put(
    config: &Config,
    conn: &ConnectArgs,
    id: &str,
    input: &str,
    output: &Output,
) -> Result<()> {
    let doc = parse_document(input)?;
    let client = connect(config, conn).await?;
    client
        .update(id, &doc)
        .await
        .with_context(|| format!("Failed to store {}", id))?;
    output.success(&format!("Stored {}", id));
    Ok(())
}

/// Merge fields into an existing document
pub async fn patch(
    config: &Config,
    conn: &ConnectArgs,
    id: &str,
    input: &str,
    output: &Output,
) -> Result<()> {
    let partial = parse_document(input)?;
    if partial.is_empty() {
        bail!("Patch must contain at least one field");
    }

    let client = connect(config, conn).await?;
    client
        .patch(id, &partial)
        .await
        .with_context(|| format!("Failed to patch {}", id))?;
    output.success(&format!("Patched {}", id));
    Ok(())
}

/// Delete a document
pub async fn delete(config: &Config, conn: &ConnectArgs, id: &str, output: &Output) -> Result<()> {
    let client = connect(config, conn).await?;
    client
        .delete(id)
        .await
        .with_context(|| format!("Failed to delete {}", id))?;
    output.success(&format!("Deleted {}", id));
    Ok(())
}

/// List a page of documents
pub async fn list(
    config: &Config,
    conn: &ConnectArgs,
    page: PageArgs,
    output: &Output,
) -> Result<()> {
    let client = connect(config, conn).await?;
    let docs = client
        .list(page.offset, page.limit)
        .await
        .context("Failed to list documents")?;
    output.print_documents(&docs);
    Ok(())
}

/// Run a filter query
pub async fn query(
    config: &Config,
    conn: &ConnectArgs,
    expr: &str,
    page: PageArgs,
    output: &Output,
) -> Result<()> {
    let client = connect(config, conn).await?;
    let values = client
        .query(expr, page.offset, page.limit)
        .await
        .with_context(|| format!("Query failed: {}", expr))?;
    output.print_values(&values);
    Ok(())
}

// ==================== Helpers ====================

/// Connect with whichever credentials the flags provide
async fn connect(config: &Config, conn: &ConnectArgs) -> Result<DirClient> {
    let url = conn.url.clone().unwrap_or_else(|| config.server_url());
    let mut client = DirClient::new(&url)?;
    if let Some(ca) = &conn.ca {
        client = client.with_ca_cert(ca);
    }

    match (&conn.cert, &conn.key, &conn.user) {
        (Some(cert), Some(key), _) => client.connect_with_client_cert(cert, key).await,
        (_, _, Some(user)) => {
            let Some(password) = &conn.password else {
                bail!("--user requires --password or THINGDIR_PASSWORD");
            };
            client.connect_with_password(user, password).await
        }
        _ => client.connect().await,
    }
    .with_context(|| format!("Failed to connect to {}", url))?;

    Ok(client)
}

/// Parse a document argument: inline JSON, `@path` or `-` for stdin
fn parse_document(input: &str) -> Result<Document> {
    let bytes = if input == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read document from stdin")?;
        buf
    } else if let Some(path) = input.strip_prefix('@') {
        read_file(Path::new(path))?
    } else {
        input.as_bytes().to_vec()
    };

    Ok(document::from_slice(&bytes)?)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read document file: {:?}", path))
}

/// Explicit ID, else the document's own `id`, else a fresh one
fn resolve_id(explicit: Option<String>, doc: &Document) -> String {
    explicit
        .or_else(|| document::id_of(doc).map(str::to_string))
        .unwrap_or_else(document::new_id)
}
