use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use http::header::{HOST, UPGRADE};
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_rustls::TlsConnector;
use tracing::{error, info, warn};

use rule_engine::RuleSet;
use trust_store::{BanStore, KvStore, TrustStore};

use crate::admission::{self, Denial};
use crate::forward::{self, Forwarder, ProxyBody};
use crate::remote::remote_address;

/// Everything a request handler needs, shared across connections.
pub struct GateState {
    pub rules: RuleSet,
    pub trust: TrustStore,
    pub data: Arc<dyn KvStore>,
    pub bans: BanStore,
    forwarder: Forwarder,
    tls: TlsConnector,
}

/// The proxy listener.
///
/// Accepts connections, serves each on its own task with upgrade support,
/// and pushes every request through rule resolution, admission, and
/// forwarding.
pub struct Gate {
    state: Arc<GateState>,
}

impl Gate {
    pub fn new(
        rules: RuleSet,
        trust: TrustStore,
        data: Arc<dyn KvStore>,
        bans: BanStore,
        tls_skip_verify: bool,
    ) -> anyhow::Result<Self> {
        let forwarder = Forwarder::new().context("failed to build upstream http clients")?;
        let state = GateState {
            rules,
            trust,
            data,
            bans,
            forwarder,
            tls: forward::tls_connector(tls_skip_verify),
        };
        Ok(Self {
            state: Arc::new(state),
        })
    }

    /// Bind and serve forever. `addr` may name a host (`localhost:9998`)
    /// or leave it empty for all interfaces.
    pub async fn run(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind proxy listener on {addr}"))?;
        info!(addr, "proxy listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| handle(req, Arc::clone(&state), peer));

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .with_upgrades()
                    .await
                {
                    warn!(%peer, %err, "connection ended with error");
                }
            });
        }
    }
}

/// The per-request pipeline: rule match, admission, forward.
async fn handle(
    req: Request<Incoming>,
    state: Arc<GateState>,
    peer: SocketAddr,
) -> Result<Response<ProxyBody>, Infallible> {
    let remote_ip = remote_address(req.headers(), peer);
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let path = req.uri().path().to_string();

    info!(%host, %path, %remote_ip, "inbound request");

    let upstream = match state.rules.resolve(&host, &path) {
        Some(upstream) => upstream.to_string(),
        None => return Ok(deny(&state, &remote_ip, Denial::NoRule).await),
    };

    if let Err(denial) = admission::authorize(&state.trust, state.data.as_ref(), &host, req.headers()).await
    {
        return Ok(deny(&state, &remote_ip, denial).await);
    }

    let result = if is_websocket_upgrade(&req) {
        forward::splice(req, &upstream, &state.tls).await
    } else {
        state.forwarder.forward(req, &upstream, &host).await
    };

    match result {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(%err, upstream, "forwarding failed");
            Ok(deny(&state, &remote_ip, Denial::Upstream(err.to_string())).await)
        }
    }
}

fn is_websocket_upgrade(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(UPGRADE)
        .is_some_and(|value| value.as_bytes() == b"websocket")
}

/// Record the ban (when the denial calls for one) and produce the `500`.
/// If the ban store itself fails, its error becomes the response body.
async fn deny(state: &GateState, remote_ip: &str, denial: Denial) -> Response<ProxyBody> {
    if denial.should_ban() {
        if let Err(err) = state.bans.record(remote_ip).await {
            error!(%remote_ip, %err, "failed to record ban");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    }

    warn!(%remote_ip, %denial, "request denied");
    text_response(StatusCode::INTERNAL_SERVER_ERROR, denial.to_string())
}

fn text_response(status: StatusCode, message: String) -> Response<ProxyBody> {
    let mut response = Response::new(forward::text_body(message));
    *response.status_mut() = status;
    response
}
