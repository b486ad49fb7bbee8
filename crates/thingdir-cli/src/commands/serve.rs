//! Serve command handler

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use thingdir_core::{
    Config, DirError, DirServer, DirStore, LogPublisher, PasswordAuthenticator, RoleAuthorizer,
    ServerError,
};

use crate::output::Output;

/// Run the directory server until Ctrl-C
pub async fn run(config: Config, output: &Output) -> Result<()> {
    let certificates = config.certificate_role.is_some() && config.trust_client_identity_header;
    if config.users.is_empty() && !config.allow_anonymous && !certificates {
        warn!(
            "No users, anonymous access or certificate role configured; \
             every request will be refused"
        );
    }
    if config.certificate_role.is_some() && !config.trust_client_identity_header {
        warn!(
            "certificate_role is set but trust_client_identity_header is off; \
             client identity headers will be ignored"
        );
    }

    let server = build_server(config);
    serve_until(server, output, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

fn build_server(config: Config) -> DirServer {
    let store = Arc::new(DirStore::new(&config.store_path).with_limits(config.paging));
    let authenticator = Arc::new(PasswordAuthenticator::from_config(&config));
    let authorizer = Arc::new(RoleAuthorizer::from_config(&config));
    let discovery = config.discovery.enabled;

    let server = DirServer::new(config, store, authenticator, authorizer);
    if discovery {
        server.with_discovery(Arc::new(LogPublisher))
    } else {
        server
    }
}

async fn serve_until<F>(mut server: DirServer, output: &Output, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    let addr = server
        .start()
        .await
        .inspect_err(log_recovery_hint)
        .context("Failed to start server")?;
    let path = server.store().path().display().to_string();
    output.message(&format!("Serving {} on http://{}", path, addr));
    output.message("Press Ctrl-C to stop");

    shutdown.await;

    server.stop().await.context("Failed to stop server")?;
    output.success("Server stopped, store saved");
    Ok(())
}

fn log_recovery_hint(err: &ServerError) {
    if let ServerError::Store(DirError::Storage(storage)) = err {
        if let Some(hint) = storage.recovery_suggestion() {
            warn!("{}", hint);
        }
    }
}
