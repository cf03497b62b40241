use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use worldhost::api::{create_router, HostState};
use worldhost::auth::TokenAuthenticator;
use worldhost::config::{load_from_env, DeploymentMode, HostConfig};
use worldhost::lifecycle::{restart_process, HttpSidecarClient, LifecycleController};
use worldhost::session::{RelayTransport, SessionManager};
use worldhost::world::WorldRegistry;

/// Exit status used when session bookkeeping is found corrupted
const EXIT_FATAL: i32 = 70;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worldhost=info".into()),
        )
        .init();

    info!("World host starting...");

    let config = load_from_env().context("Failed to load configuration")?;
    let mode = config.lifecycle.mode;
    info!(
        mode = ?mode,
        bind_address = %config.server.bind_address,
        port = config.server.port,
        auth_enabled = config.auth.enabled,
        "Configuration loaded"
    );

    // Managed hosts only accept binds once allocated
    let registry = Arc::new(WorldRegistry::new(
        config.world.clone(),
        mode == DeploymentMode::Standalone,
    ));
    registry.preload();

    let authenticator = Arc::new(TokenAuthenticator::new(&config.auth));
    let sessions = SessionManager::new(
        Arc::clone(&registry),
        authenticator,
        Arc::new(RelayTransport),
        config.session.clone(),
        config.auth.default_world.clone(),
    );

    let lifecycle = match mode {
        DeploymentMode::Managed => {
            Some(start_lifecycle(&config, Arc::clone(&registry), Arc::clone(&sessions)).await)
        }
        DeploymentMode::Standalone => None,
    };

    // Start HTTP server
    let state = Arc::new(HostState {
        sessions: Arc::clone(&sessions),
        registry: Arc::clone(&registry),
        lifecycle: lifecycle.clone(),
        mode,
    });
    let router = create_router(state);
    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, "World host listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!(error = %e, "HTTP server error");
        }
    });

    let mut fatal = sessions.subscribe_fatal();
    let restart = match lifecycle {
        Some(controller) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for ctrl_c signal")?;
                    info!("Shutdown signal received");
                    if let Err(e) = controller.drain().await {
                        warn!(error = %e, "Drain skipped");
                    }
                }
                _ = controller.wait_for_shutdown() => {
                    info!("Orchestrator deallocated host");
                }
                Ok(e) = fatal.recv() => {
                    error!(error = %e, "Fatal session error");
                    std::process::exit(EXIT_FATAL);
                }
            }
            false
        }
        None => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for ctrl_c signal")?;
                    info!("Shutdown signal received");
                    false
                }
                _ = hangup() => {
                    info!("Restart signal received");
                    true
                }
                Ok(e) = fatal.recv() => {
                    error!(error = %e, "Fatal session error");
                    std::process::exit(EXIT_FATAL);
                }
            }
        }
    };

    if mode == DeploymentMode::Standalone {
        drain_standalone(&registry, &sessions, config.lifecycle.drain_grace()).await;
    }

    server_handle.abort();

    if restart {
        restart_process(config.lifecycle.restart_delay()).await?;
    }

    info!("World host stopped");
    Ok(())
}

/// Register with the orchestrator and spawn the health and signal loops.
/// A failed startup handshake exits the process.
async fn start_lifecycle(
    config: &HostConfig,
    registry: Arc<WorldRegistry>,
    sessions: Arc<SessionManager>,
) -> Arc<LifecycleController> {
    let client = match HttpSidecarClient::new(&config.orchestrator, config.lifecycle.rpc_timeout())
    {
        Ok(client) => client,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to create orchestrator client");
            std::process::exit(1);
        }
    };

    let controller = Arc::new(LifecycleController::new(
        Arc::new(client),
        registry,
        sessions,
        config.lifecycle.clone(),
    ));

    if let Err(e) = controller.start().await {
        error!(error = %e, "Orchestrator startup failed");
        std::process::exit(1);
    }

    tokio::spawn(Arc::clone(&controller).run_health_loop());
    tokio::spawn(Arc::clone(&controller).run_signal_loop());
    controller
}

/// Standalone shutdown: stop admitting, let sessions finish, tear down worlds
async fn drain_standalone(registry: &WorldRegistry, sessions: &SessionManager, grace: Duration) {
    registry.begin_drain();
    let forced = sessions.drain(grace).await;
    let remaining = registry.teardown_all();
    info!(forced, remaining = remaining.len(), "Standalone drain complete");
}

#[cfg(unix)]
async fn hangup() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::hangup()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "SIGHUP handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn hangup() {
    std::future::pending::<()>().await;
}
