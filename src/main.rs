use std::sync::Arc;

use asset_indexer::api::{self, AppState};
use asset_indexer::chain::ChainClient;
use asset_indexer::config;
use asset_indexer::db::Store;
use asset_indexer::rpc::RpcClient;
use asset_indexer::subscriber::Bootstrap;
use eyre::WrapErr;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Asset Indexer starting...");

    let cfg = config::load()?;

    // No store, no service.
    let store = Store::open(&cfg.db_path).wrap_err_with(|| format!("opening database {}", cfg.db_path))?;
    info!("Database ready at {}", cfg.db_path);

    let chain: Arc<dyn ChainClient> = Arc::new(RpcClient::new(cfg.rpc_url.clone(), cfg.rpc_timeout)?);
    let bootstrap = Arc::new(Bootstrap::new(chain, store.clone(), cfg.subscriber_settings()));

    if let Some(contracts) = cfg.contracts {
        info!("Contracts configured, bootstrapping subscriber");
        bootstrap.start(contracts);
    } else {
        info!("Waiting for POST /init-contracts");
    }

    let api_handle = tokio::spawn({
        let cfg = cfg.clone();
        let state = AppState { store, bootstrap };
        async move { api::serve(cfg, state).await }
    });

    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    info!("Asset Indexer stopped.");
    Ok(())
}
