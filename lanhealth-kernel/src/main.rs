/**
 * LANHEALTH KERNEL - Point d'entrée du serveur
 *
 * RÔLE : Charge la config, construit le store et le routeur, puis sert l'API
 * jusqu'à Ctrl-C / SIGTERM. Rien à vider à l'arrêt (store mémoire uniquement).
 */

use lanhealth_kernel::config::load_config;
use lanhealth_kernel::http::{build_router, AppState};
use lanhealth_kernel::state::ReportStore;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lanhealth_kernel=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = load_config().await.context("[kernel] configuration invalide")?;
    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        api_key_header = cfg.api_key_header.as_str(),
        stale_seconds = cfg.stale_seconds,
        "[kernel] configuration loaded"
    );

    let addr = cfg.bind_addr();
    let app = build_router(AppState::new(ReportStore::new(), cfg));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("[kernel] cannot bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "[kernel] listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("[kernel] shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "[kernel] failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "[kernel] failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("[kernel] shutdown signal received");
}
