mod config;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use lingo_api::reaper;
use lingo_api::state::{AppState, AppStateInner};
use lingo_api::translation::TranslationService;
use lingo_db::Database;
use lingo_gateway::dispatcher::Dispatcher;
use lingo_translate::{DisabledTranslator, OpenAiTranslator, Translator};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lingo=debug,lingo_api=debug,lingo_gateway=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    let translator: Arc<dyn Translator> = match &config.translate_api_key {
        Some(key) => Arc::new(OpenAiTranslator::new(
            config.translate_api_url.clone(),
            key.clone(),
            config.translate_model.clone(),
        )),
        None => {
            warn!("Running without a translation provider");
            Arc::new(DisabledTranslator)
        }
    };
    info!(
        "Translation provider: {} (timeout {:?})",
        translator.name(),
        config.translate_timeout
    );

    let state: AppState = Arc::new(AppStateInner {
        translations: TranslationService::new(translator, db.clone(), config.translate_timeout),
        db,
        dispatcher: Dispatcher::new(),
        jwt_secret: config.jwt_secret,
        guest_secret: config.guest_jwt_secret,
        policy: config.policy,
        sweep_token: config.sweep_token,
    });

    tokio::spawn(reaper::run_reaper_loop(state.clone(), config.reaper_interval));

    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Lingo server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
