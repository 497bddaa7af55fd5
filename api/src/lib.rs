//! The HTTP/JSON gateway: a thin `axum` router over the external surface
//! contracts in [`methods`], generalizing the teacher's JSON-RPC `rpc`
//! crate into plain REST endpoints, plus one JSON-RPC-compatible endpoint
//! retained for continuity with the teacher's method names.
//!
//! Every handler here is glue: decode the request, call a `methods`
//! function, encode the response. No core logic lives in this crate.

pub mod methods;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use sole_chain::Chain;
use sole_mempool::Mempool;
use sole_network::Host;

pub use methods::ApiError;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(&self, ApiError::Chain(c) if c.is_fatal()) {
            log::error!("chain store corruption detected, aborting: {self}");
            std::process::abort();
        }
        let status = match &self {
            ApiError::InvalidAddress | ApiError::InvalidHash | ApiError::InvalidTransaction => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Chain(_) | ApiError::Mempool(_) | ApiError::Crypto(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": {
                "kind": error_kind(&self),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

fn error_kind(err: &ApiError) -> &'static str {
    match err {
        ApiError::InvalidAddress => "InvalidAddress",
        ApiError::InvalidHash => "InvalidHash",
        ApiError::InvalidTransaction => "InvalidTransaction",
        ApiError::NotFound(_) => "NotFound",
        ApiError::Chain(_) => "ChainError",
        ApiError::Mempool(_) => "MempoolError",
        ApiError::Crypto(_) => "CryptoError",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            listen_addr: "127.0.0.1:8545".parse().unwrap(),
        }
    }
}

#[derive(Clone)]
struct AppState {
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    host: Arc<Host>,
}

/// Binds and serves the gateway until the process is asked to shut down
/// (the caller races this future against a signal, exactly as with
/// [`sole_network::Host::serve`]).
pub async fn serve(config: ApiConfig, chain: Arc<Chain>, mempool: Arc<Mempool>, host: Arc<Host>) -> std::io::Result<()> {
    let state = AppState { chain, mempool, host };
    let router = build_router(state);
    log::info!("HTTP gateway listening on {}", config.listen_addr);
    axum::Server::bind(&config.listen_addr)
        .serve(router.into_make_service())
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/balance/:address", get(get_balance))
        .route("/utxos/:address", get(get_utxos))
        .route("/tip", get(get_tip))
        .route("/block/:hash", get(get_block))
        .route("/tx/:address", get(get_transactions_for_address))
        .route("/tx/id/:txid", get(get_transaction_by_id))
        .route("/peers", get(get_peers))
        .route("/validators", get(get_validators))
        .route("/tx", post(post_transaction))
        .route("/rpc", post(post_rpc))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_balance(State(state): State<AppState>, Path(address): Path<String>) -> Result<Json<Value>, ApiError> {
    let balance = methods::get_balance(&state.chain, &address)?;
    Ok(Json(json!({ "balance": balance })))
}

async fn get_utxos(State(state): State<AppState>, Path(address): Path<String>) -> Result<Json<Vec<methods::UtxoView>>, ApiError> {
    Ok(Json(methods::list_utxos(&state.chain, &address)?))
}

async fn get_tip(State(state): State<AppState>) -> Result<Json<methods::TipSnapshot>, ApiError> {
    Ok(Json(methods::get_tip(&state.chain)?))
}

async fn get_block(State(state): State<AppState>, Path(hash): Path<String>) -> Result<Json<sole_core::Block>, ApiError> {
    Ok(Json(methods::get_block(&state.chain, &hash)?))
}

async fn get_transactions_for_address(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<Vec<sole_core::Transaction>>, ApiError> {
    Ok(Json(methods::find_transactions(&state.chain, &address)?))
}

async fn get_transaction_by_id(
    State(state): State<AppState>,
    Path(txid): Path<String>,
) -> Result<Json<sole_core::Transaction>, ApiError> {
    Ok(Json(methods::find_transaction(&state.chain, &txid)?))
}

async fn get_peers(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(methods::list_peers(&state.host).await)
}

async fn get_validators(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(methods::list_validators(&state.chain))
}

#[derive(Debug, Deserialize)]
struct SubmitTxRequest {
    /// Hex-encoded, `Transaction::serialize`-compatible bytes.
    raw_tx: String,
}

async fn post_transaction(
    State(state): State<AppState>,
    Json(request): Json<SubmitTxRequest>,
) -> Result<Json<methods::SubmitOutcome>, ApiError> {
    let bytes = hex::decode(&request.raw_tx).map_err(|_| ApiError::InvalidTransaction)?;
    let outcome = methods::submit_transaction(&state.chain, &state.mempool, &state.host, &bytes).await?;
    Ok(Json(outcome))
}

// --- JSON-RPC compatibility endpoint -------------------------------------
//
// Retains the teacher's method names for callers that have not migrated
// to the REST surface above. Every arm below is itself a thin call into
// `methods`.

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

fn param_str(params: &Value, index: usize) -> Option<&str> {
    params.get(index).and_then(Value::as_str)
}

async fn post_rpc(State(state): State<AppState>, Json(request): Json<JsonRpcRequest>) -> Json<JsonRpcResponse> {
    let id = request.id.clone();
    let outcome = dispatch_rpc(&state, &request).await;
    let response = match outcome {
        Ok(result) => JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        },
        Err(err) => JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(json!({ "kind": error_kind(&err), "message": err.to_string() })),
        },
    };
    Json(response)
}

async fn dispatch_rpc(state: &AppState, request: &JsonRpcRequest) -> Result<Value, ApiError> {
    match request.method.as_str() {
        "getbestblockhash" => {
            let tip = methods::get_tip(&state.chain)?;
            Ok(json!(tip.tip_hash))
        }
        "getblockcount" => {
            let tip = methods::get_tip(&state.chain)?;
            Ok(json!(tip.height))
        }
        "sendrawtransaction" => {
            let raw = param_str(&request.params, 0).ok_or(ApiError::InvalidTransaction)?;
            let bytes = hex::decode(raw).map_err(|_| ApiError::InvalidTransaction)?;
            let outcome = methods::submit_transaction(&state.chain, &state.mempool, &state.host, &bytes).await?;
            Ok(json!(outcome))
        }
        "getrawtransaction" => {
            let txid = param_str(&request.params, 0).ok_or(ApiError::InvalidHash)?;
            let tx = methods::find_transaction(&state.chain, txid)?;
            Ok(json!(hex::encode(tx.serialize().map_err(|_| ApiError::InvalidTransaction)?)))
        }
        "validateaddress" => {
            let address = param_str(&request.params, 0).unwrap_or_default();
            Ok(json!({ "isvalid": sole_crypto::validate_address(address) }))
        }
        "getpeerinfo" => {
            let peers = methods::list_peers(&state.host).await;
            Ok(json!(peers))
        }
        other => Err(ApiError::NotFound(format!("rpc method {other}"))),
    }
}
