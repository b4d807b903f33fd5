use crate::auth::{
    AuthProvider, KeyringAuthProvider, KeyringStore, MemoryStore, TokenRequester, TokenStore,
};
use crate::cli::{AuthCommand, Cli, Command, JobArgs};
use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::error::CliError;
use crate::session::{BrowserViewerFactory, JobKind, JobSession, SessionContext, ViewerSlot};
use crate::telemetry::logging;
use crate::terminal::console::{ConsoleBridge, ConsolePrompt};
use crate::terminal::{SurfaceRegistry, TerminalSink};
use remote_proto::JobPayload;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run(cli: Cli) -> Result<(), CliError> {
    logging::init(&cli.logging.to_config())?;
    let config = cli.remote.apply(Config::from_env());
    debug!(target: "fitkit::cli", server = %config.server_address, "configuration loaded");

    match cli.command {
        Command::Build(args) => run_job(JobKind::Build, args, config).await,
        Command::Simulate(args) => run_job(JobKind::Simulate, args, config).await,
        Command::Auth { action } => run_auth(action, &config).await,
    }
}

async fn run_job(kind: JobKind, args: JobArgs, config: Config) -> Result<(), CliError> {
    let payload = read_payload(&args.payload).await?;
    let auth = auth_provider(&config);

    // prompt for a token while the terminal is still in cooked mode
    if !config.server_address.trim().is_empty() {
        auth.get_token(false).await?;
    }

    let connections = Arc::new(ConnectionRegistry::new(
        auth.clone(),
        config.server_address.clone(),
    ));
    let context = SessionContext {
        connections: connections.clone(),
        viewers: Arc::new(ViewerSlot::new(Arc::new(BrowserViewerFactory))),
        log_debug_info: config.log_debug_info,
    };
    let sink = TerminalSink::new(kind.terminal_title(), SurfaceRegistry::new());
    let session = JobSession::new(kind, payload, args.project.clone(), sink.clone(), context);

    let console = ConsoleBridge::attach(sink);
    let job = tokio::spawn(session.clone().start());
    console.run().await?;

    if tokio::time::timeout(SHUTDOWN_GRACE, session.closed()).await.is_err() {
        warn!(target: "fitkit::cli", "session did not finish tearing down");
    }
    job.abort();

    if let Some(client) = connections.current().await {
        connections.disconnect().await;
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, client.wait_closed()).await;
    }
    info!(target: "fitkit::cli", kind = ?kind, "job finished");
    Ok(())
}

async fn run_auth(action: AuthCommand, config: &Config) -> Result<(), CliError> {
    let auth = auth_provider(config);
    match action {
        AuthCommand::Login => {
            auth.get_token(true).await?;
            println!("You were successfully authenticated");
        }
        AuthCommand::Logout => {
            auth.invalidate();
            println!("Local auth token removed");
        }
        AuthCommand::Status => match auth.current() {
            Some(_) => println!("An auth token is stored"),
            None => println!("No auth token stored; you will be asked to authorize on next connection"),
        },
    }
    Ok(())
}

fn auth_provider(config: &Config) -> Arc<KeyringAuthProvider> {
    let requester = match TokenRequester::new(&config.auth_request_url, &config.auth_generate_url)
    {
        Ok(requester) => Some(requester),
        Err(err) => {
            debug!(target: "fitkit::auth", error = %err, "token requests unavailable");
            None
        }
    };
    Arc::new(KeyringAuthProvider::new(
        token_store(),
        requester,
        Arc::new(ConsolePrompt),
    ))
}

fn token_store() -> Arc<dyn TokenStore> {
    let store = KeyringStore::default();
    match store.load() {
        Ok(_) => Arc::new(store),
        Err(err) => {
            warn!(
                target: "fitkit::auth",
                error = %err,
                "keyring unavailable; keeping the auth token in memory only"
            );
            Arc::new(MemoryStore::default())
        }
    }
}

async fn read_payload(path: &Path) -> Result<JobPayload, CliError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CliError::PayloadRead {
            path: path.to_path_buf(),
            source,
        })?;
    let value = serde_json::from_str(&text).map_err(|source| CliError::PayloadParse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(JobPayload::new(value))
}
