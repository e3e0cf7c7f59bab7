use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use provider_sync::{ProviderClient, SyncContext};

/// Deadline on every outbound provider call made on behalf of an
/// administrator.
const ADMIN_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

#[derive(Debug, serde::Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Value,
}

#[derive(Debug, serde::Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddProviderParams {
    identity_provider_url: String,
    email_or_phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmProviderParams {
    identity_provider_url: String,
    identity_provider_id: String,
    confirmation_code: String,
    proxy_name: String,
}

/// The administrative control plane: a JSON-RPC 2.0 listener exposing
/// enrollment and inspection operations.
///
/// Errors from provider traffic or storage are reported textually in the
/// JSON-RPC error member; trust state is never partially mutated.
pub struct AdminServer {
    ctx: SyncContext,
    client: Arc<ProviderClient>,
}

impl AdminServer {
    pub fn new(ctx: SyncContext) -> anyhow::Result<Self> {
        let client = ProviderClient::new(Some(ADMIN_CALL_TIMEOUT))
            .context("failed to build admin provider client")?;
        Ok(Self {
            ctx,
            client: Arc::new(client),
        })
    }

    /// Bind and serve forever.
    pub async fn run(self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind admin listener on {addr}"))?;
        info!(addr, "admin rpc listening");

        let ctx = Arc::new(self.ctx);
        let client = self.client;

        loop {
            let (stream, peer) = listener.accept().await?;
            let ctx = Arc::clone(&ctx);
            let client = Arc::clone(&client);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    handle(req, Arc::clone(&ctx), Arc::clone(&client))
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(%peer, %err, "admin connection ended with error");
                }
            });
        }
    }
}

async fn handle(
    req: Request<Incoming>,
    ctx: Arc<SyncContext>,
    client: Arc<ProviderClient>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Full::new(Bytes::from_static(b"POST only")));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return Ok(json_response(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                format!("failed to read request body: {err}"),
            )));
        }
    };

    let rpc: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(rpc) => rpc,
        Err(err) => {
            return Ok(json_response(JsonRpcResponse::error(
                Value::Null,
                INVALID_REQUEST,
                format!("invalid json-rpc request: {err}"),
            )));
        }
    };

    Ok(json_response(dispatch(rpc, &ctx, &client).await))
}

async fn dispatch(
    rpc: JsonRpcRequest,
    ctx: &SyncContext,
    client: &ProviderClient,
) -> JsonRpcResponse {
    let id = rpc.id.clone();

    match rpc.method.as_str() {
        "addIdentityProvider" => {
            let params: AddProviderParams = match serde_json::from_value(rpc.params) {
                Ok(params) => params,
                Err(err) => return JsonRpcResponse::error(id, INVALID_PARAMS, err.to_string()),
            };
            match provider_sync::add_identity_provider(
                ctx,
                client,
                &params.identity_provider_url,
                &params.email_or_phone,
            )
            .await
            {
                Ok((response, provider_id)) => JsonRpcResponse::success(
                    id,
                    json!({ "response": response, "identityProviderId": provider_id }),
                ),
                Err(err) => JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string()),
            }
        }

        "confirmIdentityProvider" => {
            let params: ConfirmProviderParams = match serde_json::from_value(rpc.params) {
                Ok(params) => params,
                Err(err) => return JsonRpcResponse::error(id, INVALID_PARAMS, err.to_string()),
            };
            match provider_sync::confirm_identity_provider(
                ctx,
                client,
                &params.identity_provider_url,
                &params.identity_provider_id,
                &params.confirmation_code,
                &params.proxy_name,
            )
            .await
            {
                Ok(response) => JsonRpcResponse::success(id, json!({ "response": response })),
                Err(err) => JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string()),
            }
        }

        "listIdentityProviders" => match provider_sync::list_identity_providers(ctx).await {
            Ok(providers) => {
                let listed: Vec<Value> = providers
                    .iter()
                    .map(|p| json!({ "id": p.id, "url": p.url }))
                    .collect();
                JsonRpcResponse::success(id, json!({ "identityProviders": listed }))
            }
            Err(err) => JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string()),
        },

        "getWalletsAndServices" => {
            match provider_sync::fetch_wallets_and_services(ctx, client).await {
                Ok(snapshot) => JsonRpcResponse::success(
                    id,
                    json!({ "dataForWallet": provider_sync::flatten_wallets(&snapshot) }),
                ),
                Err(err) => JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string()),
            }
        }

        "getActiveTokens" => match provider_sync::fetch_active_tokens(ctx, client).await {
            Ok(tokens) => JsonRpcResponse::success(
                id,
                json!({ "dataForWallet": provider_sync::flatten_tokens(&tokens) }),
            ),
            Err(err) => JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string()),
        },

        other => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("unknown method '{other}'"),
        ),
    }
}

fn json_response(response: JsonRpcResponse) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&response).unwrap_or_else(|_| {
        br#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"encoding failed"},"id":null}"#
            .to_vec()
    });

    let mut http_response = Response::new(Full::new(Bytes::from(body)));
    http_response
        .headers_mut()
        .insert("content-type", hyper::header::HeaderValue::from_static("application/json"));
    http_response
}
