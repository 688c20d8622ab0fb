//! API Server Module
//!
//! This module implements the JSON-RPC server in front of the batch engine.
//! Every call gets exactly one response: a result on success, or an error
//! object whose message is the human-readable form of the engine error.
//!
//! # Methods
//! - `openDatabaseConnection` `{path, flags, key}` → handle
//! - `executeBatch` `{handle, operations: [{sql, params}]}` → result list
//! - `closeDatabaseConnection` `{handle}` → null
//!
//! Params may also be given positionally (`[path, flags, key]`,
//! `[handle, operations]`) or wrapped in a one-element array.

use crate::{
    BatchOperation, EngineError, Handle, OpenFlags,
    batch::{BatchDispatcher, BatchExecutor},
    config::{ApiConfig, Config},
    encoding,
    registry::ConnectionRegistry,
};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    routing::post,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// JSON-RPC error codes used at the boundary
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const OPEN_ERROR: i32 = -32000;
    pub const UNKNOWN_HANDLE: i32 = -32001;
    pub const FATAL_ERROR: i32 = -32002;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Shared application state that is accessible across all request handlers
///
/// - `registry`: Handle table for open connections
/// - `dispatcher`: Worker pool that runs batches
#[derive(Clone)]
pub struct AppState {
    registry: Arc<ConnectionRegistry>,
    dispatcher: BatchDispatcher,
}

impl AppState {
    pub fn new(registry: Arc<ConnectionRegistry>, max_concurrent_batches: usize) -> Self {
        let executor = Arc::new(BatchExecutor::new(registry.clone()));
        Self {
            registry,
            dispatcher: BatchDispatcher::new(executor, max_concurrent_batches),
        }
    }
}

/// The main API server struct
pub struct Server {
    config: ApiConfig,
    state: AppState,
}

impl Server {
    /// Creates a new API server with its registry and worker pool
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            &config.database,
            config.engine.key_provider,
        ));
        let state = AppState::new(registry, config.engine.max_concurrent_batches);
        Self {
            config: config.api,
            state,
        }
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.state.registry.clone()
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Starts the API server and serves until ctrl-c
    ///
    /// On shutdown every open connection is closed before returning.
    pub async fn start(self) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.state.registry.close_all().await;
        info!("API server stopped");
        Ok(())
    }
}

/// Router with the single JSON-RPC endpoint at "/"
pub fn router(state: AppState) -> Router {
    Router::new().route("/", post(handle_rpc)).with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

/// JSON-RPC 2.0 request structure
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

/// JSON-RPC 2.0 response structure
///
/// Either `result` or `error` will be populated, but not both.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// JSON-RPC error object
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Json<Self> {
        Json(Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        })
    }

    fn failure(id: Value, code: i32, message: String) -> Json<Self> {
        Json(Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        })
    }

    fn from_engine_error(id: Value, err: &EngineError) -> Json<Self> {
        let code = match err {
            EngineError::Open(_) => codes::OPEN_ERROR,
            EngineError::UnknownHandle(_) => codes::UNKNOWN_HANDLE,
            EngineError::Fatal(_) => codes::FATAL_ERROR,
            EngineError::Statement { .. } | EngineError::Internal(_) => codes::INTERNAL_ERROR,
        };
        Self::failure(id, code, err.to_string())
    }
}

/// Params for `openDatabaseConnection`
#[derive(Debug, Deserialize)]
struct OpenParams {
    #[serde(alias = "fullName")]
    path: String,
    #[serde(default)]
    flags: OpenFlags,
    /// Password key; empty when absent
    #[serde(default)]
    key: Option<String>,
}

/// Params for `executeBatch`
#[derive(Debug, Deserialize)]
struct ExecuteParams {
    handle: Handle,
    operations: Vec<BatchOperation>,
}

/// Params for `closeDatabaseConnection`
#[derive(Debug, Deserialize)]
struct CloseParams {
    handle: Handle,
}

/// Decode method params, unwrapping a single-object array
fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    let params = match params {
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => items.remove(0),
        other => other,
    };
    serde_json::from_value(params).map_err(|e| format!("Invalid params: {}", e))
}

/// Main RPC request handler
///
/// Routes the request to the appropriate handler based on the method name.
/// A body that is not a JSON-RPC request still gets a JSON-RPC error.
async fn handle_rpc(
    State(state): State<AppState>,
    body: Result<Json<JsonRpcRequest>, JsonRejection>,
) -> Json<JsonRpcResponse> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected RPC body: {}", rejection.body_text());
            let code = match &rejection {
                JsonRejection::JsonSyntaxError(_) => codes::PARSE_ERROR,
                _ => codes::INTERNAL_ERROR,
            };
            return JsonRpcResponse::failure(Value::Null, code, rejection.body_text());
        }
    };
    debug!("Received RPC request: {}", request.method);

    match request.method.as_str() {
        "openDatabaseConnection" => handle_open(state, request).await,
        "executeBatch" => handle_execute_batch(state, request).await,
        "closeDatabaseConnection" => handle_close(state, request).await,
        _ => JsonRpcResponse::failure(
            request.id,
            codes::METHOD_NOT_FOUND,
            "Method not found".to_string(),
        ),
    }
}

async fn handle_open(state: AppState, request: JsonRpcRequest) -> Json<JsonRpcResponse> {
    let params: OpenParams = match parse_params(request.params) {
        Ok(params) => params,
        Err(message) => {
            warn!("openDatabaseConnection: {}", message);
            return JsonRpcResponse::failure(request.id, codes::INVALID_PARAMS, message);
        }
    };

    let key = params.key.unwrap_or_default();
    match state.registry.open(&params.path, params.flags, &key).await {
        Ok(handle) => JsonRpcResponse::success(request.id, Value::from(handle)),
        Err(e) => {
            warn!("Failed to open {}: {}", params.path, e);
            JsonRpcResponse::from_engine_error(request.id, &e)
        }
    }
}

async fn handle_execute_batch(state: AppState, request: JsonRpcRequest) -> Json<JsonRpcResponse> {
    let params: ExecuteParams = match parse_params(request.params) {
        Ok(params) => params,
        Err(message) => {
            warn!("executeBatch: {}", message);
            return JsonRpcResponse::failure(request.id, codes::INVALID_PARAMS, message);
        }
    };

    match state.dispatcher.submit(params.handle, params.operations).await {
        Ok(results) => JsonRpcResponse::success(request.id, encoding::encode(&results)),
        Err(e) => {
            warn!("Batch on connection {} failed: {}", params.handle, e);
            JsonRpcResponse::from_engine_error(request.id, &e)
        }
    }
}

async fn handle_close(state: AppState, request: JsonRpcRequest) -> Json<JsonRpcResponse> {
    let params: CloseParams = match parse_params(request.params) {
        Ok(params) => params,
        Err(message) => {
            return JsonRpcResponse::failure(request.id, codes::INVALID_PARAMS, message);
        }
    };

    match state.registry.close(params.handle).await {
        Ok(()) => JsonRpcResponse::success(request.id, Value::Null),
        Err(e) => JsonRpcResponse::from_engine_error(request.id, &e),
    }
}
