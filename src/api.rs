use std::sync::Arc;

use alloy::primitives::{Address, U256};
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::contracts::ContractSet;
use crate::db::{self, address_key, Store};
use crate::error::StoreError;
use crate::subscriber::{Bootstrap, BootstrapOutcome};

/// Trades returned by `/stats`.
pub const STATS_TRADES: u32 = 10;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bootstrap: Arc<Bootstrap>,
}

/// Store failure surfaced as a 500.
struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Store read failed: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal error" })),
        )
            .into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Skipping invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    cors.allow_origin(AllowOrigin::list(allowed))
}

pub fn build_app(state: AppState, origins: &[String]) -> Router {
    Router::new()
        .route("/", get(|| async { "Asset Indexer API running" }))
        .route("/health", get(health))
        .route("/init-contracts", post(init_contracts))
        .route("/users/:address", get(get_user))
        .route("/balances/:address", get(get_balances))
        .route("/stats", get(get_stats))
        .route("/prices", get(get_prices))
        .route("/nfts", get(get_nfts))
        .route("/nfts/:token_id", get(get_nft))
        .layer(cors_layer(origins))
        .with_state(state)
}

pub async fn serve(cfg: Config, state: AppState) -> eyre::Result<()> {
    let app = build_app(state, &cfg.allowed_origins);

    let addr = cfg.bind_addr();
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

// ---------- handlers ----------

async fn init_contracts(State(state): State<AppState>, Json(contracts): Json<ContractSet>) -> Json<serde_json::Value> {
    if state.bootstrap.start(contracts) == BootstrapOutcome::AlreadyRunning {
        info!("init-contracts called again; subscriber already running");
    }
    Json(json!({ "status": "ok" }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "subscriber": state.bootstrap.state(),
        "contracts": state.bootstrap.contracts(),
    }))
}

async fn get_user(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult {
    let Ok(address) = address.parse::<Address>() else {
        return Ok(Json(json!({})).into_response());
    };
    let key = address_key(address);
    let user = state.store.run(move |c| db::get_user(c, &key)).await?;
    Ok(match user {
        Some(user) => Json(user).into_response(),
        None => Json(json!({})).into_response(),
    })
}

async fn get_balances(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult {
    let Ok(address) = address.parse::<Address>() else {
        return Ok(Json(json!([])).into_response());
    };
    let key = address_key(address);
    let balances = state.store.run(move |c| db::get_balances(c, &key)).await?;
    Ok(Json(balances).into_response())
}

async fn get_stats(State(state): State<AppState>) -> ApiResult {
    let trades = state
        .store
        .run(|c| db::recent_trades(c, STATS_TRADES))
        .await?;
    Ok(Json(json!({ "trades": trades })).into_response())
}

async fn get_prices(State(state): State<AppState>) -> ApiResult {
    let prices = state.store.run(db::get_prices).await?;
    Ok(Json(prices).into_response())
}

async fn get_nfts(State(state): State<AppState>) -> ApiResult {
    let nfts = state.store.run(db::get_nfts).await?;
    Ok(Json(nfts).into_response())
}

async fn get_nft(State(state): State<AppState>, Path(token_id): Path<String>) -> ApiResult {
    let Ok(token_id) = U256::from_str_radix(&token_id, 10) else {
        return Ok(Json(json!({})).into_response());
    };
    let key = token_id.to_string();
    let nft = state.store.run(move |c| db::get_nft(c, &key)).await?;
    Ok(match nft {
        Some(nft) => Json(nft).into_response(),
        None => Json(json!({})).into_response(),
    })
}
