/// REST API routes for coop-ledger.
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::anchor::AnchoredTransaction;
use crate::chain::status::{AnchorCoverage, LedgerInfo};
use crate::chain::verifier::ChainReport;
use crate::error::LedgerError;
use crate::state::models::Block;

/// Error body returned by every route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Block a verification failure refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn status_for(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Conflict(_) => StatusCode::CONFLICT,
        LedgerError::AnchorUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_verification_failure() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(e: LedgerError) -> ApiError {
    let status = status_for(&e);
    if status.is_server_error() {
        tracing::error!(error = %e, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            block: e.failed_block(),
        }),
    )
}

// ─── Health ──────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// External network, when anchoring is enabled.
    anchor: Option<String>,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        anchor: state
            .ledger
            .anchor()
            .shared()
            .map(|l| l.network().to_string()),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Ledger ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AppendRequest {
    transaction_id: String,
}

#[derive(Debug, Serialize)]
struct ChainVerifyResponse {
    valid: bool,
    #[serde(flatten)]
    report: ChainReport,
}

#[derive(Debug, Serialize)]
struct BlockVerifyResponse {
    block_number: u64,
    valid: bool,
}

/// GET /api/v1/ledger/info
async fn ledger_info(State(state): State<Arc<AppState>>) -> Result<Json<LedgerInfo>, ApiError> {
    state.ledger.info().await.map(Json).map_err(api_error)
}

/// GET /api/v1/ledger/status: anchor coverage and chain health.
async fn ledger_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AnchorCoverage>, ApiError> {
    state.ledger.anchor_coverage().await.map(Json).map_err(api_error)
}

/// GET /api/v1/ledger/verify
async fn verify_chain(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ChainVerifyResponse>, ApiError> {
    let report = state
        .ledger
        .verifier()
        .verify_chain()
        .await
        .map_err(api_error)?;
    Ok(Json(ChainVerifyResponse {
        valid: true,
        report,
    }))
}

/// GET /api/v1/ledger/blocks/{number}/verify
async fn verify_block(
    State(state): State<Arc<AppState>>,
    Path(number): Path<u64>,
) -> Result<Json<BlockVerifyResponse>, ApiError> {
    state
        .ledger
        .verifier()
        .verify_block(number)
        .await
        .map_err(api_error)?;
    Ok(Json(BlockVerifyResponse {
        block_number: number,
        valid: true,
    }))
}

/// POST /api/v1/ledger/blocks: append a block for a committed transaction.
async fn create_block(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppendRequest>,
) -> Result<(StatusCode, Json<Block>), ApiError> {
    let block = state
        .ledger
        .builder()
        .create_block_for_transaction(&req.transaction_id)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(block)))
}

/// GET /api/v1/ledger/transactions/{id}/block
async fn block_for_transaction(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<Block>, ApiError> {
    state
        .ledger
        .store()
        .block_by_transaction(&transaction_id)
        .await
        .map_err(api_error)?
        .map(Json)
        .ok_or_else(|| {
            api_error(LedgerError::NotFound(format!(
                "block for transaction {transaction_id}"
            )))
        })
}

/// GET /api/v1/ledger/transactions/{id}/anchor: the external record.
async fn external_record(
    State(state): State<Arc<AppState>>,
    Path(transaction_id): Path<String>,
) -> Result<Json<AnchoredTransaction>, ApiError> {
    state
        .ledger
        .external_record(&transaction_id)
        .await
        .map(Json)
        .map_err(api_error)
}

pub fn ledger_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/ledger/info", get(ledger_info))
        .route("/api/v1/ledger/status", get(ledger_status))
        .route("/api/v1/ledger/verify", get(verify_chain))
        .route("/api/v1/ledger/blocks", post(create_block))
        .route("/api/v1/ledger/blocks/{number}/verify", get(verify_block))
        .route(
            "/api/v1/ledger/transactions/{id}/block",
            get(block_for_transaction),
        )
        .route(
            "/api/v1/ledger/transactions/{id}/anchor",
            get(external_record),
        )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::anchor::testing::{StubLedger, VerifyMode};
    use crate::anchor::AnchorClient;
    use crate::chain::fixtures::{append_deposits, deposit, ledger};
    use crate::server::build_app;
    use crate::state::memory::MemoryStore;
    use crate::state::LedgerStore;

    async fn app(anchor: AnchorClient) -> (Arc<MemoryStore>, Arc<crate::chain::Ledger>, Router) {
        let (store, ledger) = ledger(anchor).await;
        let ledger = Arc::new(ledger);
        let app = build_app(AppState {
            ledger: Arc::clone(&ledger),
        });
        (store, ledger, app)
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn append(transaction_id: &str) -> Request<Body> {
        Request::post("/api/v1/ledger/blocks")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "transaction_id": transaction_id }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_store, _ledger, app) = app(AnchorClient::disabled()).await;
        let (status, body) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["anchor"].is_null());
    }

    #[tokio::test]
    async fn test_append_then_duplicate() {
        let (store, _ledger, app) = app(AnchorClient::disabled()).await;
        store
            .insert_transaction(&deposit("TXN-1", "USER-1", 10_000))
            .await
            .unwrap();

        let (status, body) = call(&app, append("TXN-1")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["number"], 1);
        assert_eq!(body["transaction_id"], "TXN-1");

        let (status, body) = call(&app, append("TXN-1")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("TXN-1"));
    }

    #[tokio::test]
    async fn test_append_unknown_transaction() {
        let (_store, _ledger, app) = app(AnchorClient::disabled()).await;
        let (status, _) = call(&app, append("NOPE")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_verify_reports_failed_block() {
        let (store, ledger, app) = app(AnchorClient::disabled()).await;
        append_deposits(&store, &ledger, 3).await;

        let (status, body) = call(&app, get("/api/v1/ledger/verify")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["blocks_checked"], 4);

        store.tamper_transaction("TXN-2", |t| t.amount = 1).await;

        let (status, body) = call(&app, get("/api/v1/ledger/verify")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["block"], 2);

        let (status, body) = call(&app, get("/api/v1/ledger/blocks/1/verify")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);

        let (status, _) = call(&app, get("/api/v1/ledger/blocks/2/verify")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = call(&app, get("/api/v1/ledger/blocks/9/verify")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_block_lookup_by_transaction() {
        let (store, ledger, app) = app(AnchorClient::disabled()).await;
        append_deposits(&store, &ledger, 2).await;

        let (status, body) = call(&app, get("/api/v1/ledger/transactions/TXN-2/block")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["number"], 2);

        let (status, _) = call(&app, get("/api/v1/ledger/transactions/TXN-7/block")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_external_record_unavailable_without_anchor() {
        let (_store, _ledger, app) = app(AnchorClient::disabled()).await;
        let (status, _) = call(&app, get("/api/v1/ledger/transactions/TXN-1/anchor")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_info_and_status_with_anchor() {
        let stub = Arc::new(StubLedger::new(true, VerifyMode::Honest));
        let (store, ledger, app) = app(AnchorClient::enabled(stub)).await;
        append_deposits(&store, &ledger, 2).await;

        let (status, body) = call(&app, get("/api/v1/ledger/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_blocks"], 3);
        assert_eq!(body["chain_valid"], true);
        assert_eq!(body["anchor_network"], "stub");

        let (status, body) = call(&app, get("/api/v1/ledger/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["anchored_blocks"], 2);
        assert_eq!(body["health"], "healthy");

        let (status, body) = call(&app, get("/api/v1/ledger/transactions/TXN-1/anchor")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["amount"], "1000");
        ledger.shutdown().await;
    }
}
