use std::sync::Arc;

use crm_gateway_mcp::{
    build_app,
    config::Config,
    dispatch::ToolDispatcher,
    domain::registry::ToolRegistry,
    logging,
    session::SessionManager,
    upstream::{CrmClient, HttpCrmClient},
    AppState,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let mut config = Config::from_env()?;
    config.apply_port_override(std::env::args().skip(1))?;

    let client: Option<Arc<dyn CrmClient>> = match config.crm_api_key.as_deref() {
        Some(api_key) => Some(Arc::new(HttpCrmClient::new(&config.crm_base_url, api_key)?)),
        None => {
            warn!("CRM_API_KEY is not set, serving sample data and refusing writes");
            None
        }
    };

    let dispatcher = Arc::new(ToolDispatcher::new(
        ToolRegistry::standard(client),
        config.rate_limit,
    ));
    let sessions = Arc::new(SessionManager::new(config.session_settings()));
    let reaper = sessions.spawn_idle_reaper();

    let bind_socket = config.bind_socket()?;
    let state = AppState::new(config.api_token.clone(), Arc::clone(&sessions), dispatcher);
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        mock_mode = config.mock_mode(),
        max_calls = config.rate_limit.max_calls,
        window_secs = config.rate_limit.window.as_secs(),
        "server starting"
    );

    let shutdown = sessions.shutdown_token();
    tokio::spawn({
        let sessions = Arc::clone(&sessions);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
            sessions.close();
        }
    });

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    sessions.close();
    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    info!("server stopped");
    Ok(())
}
