use std::sync::Arc;
use std::time::Duration;

use http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, error};

/// Body type produced by the gate: either a streamed upstream body or a
/// short literal message.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Dial timeout for the WebSocket upstream connection.
const DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on the upstream response head during the WebSocket handshake.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Headers that only belong on this hop and must not reach the upstream.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Errors on the forwarding path. Each one results in a ban plus a `500`
/// for the request that triggered it.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream url '{0}' has no authority")]
    BadUpstream(String),

    #[error("invalid upstream uri: {0}")]
    Uri(#[from] http::uri::InvalidUri),

    #[error("invalid header value: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),

    #[error("response build failed: {0}")]
    Http(#[from] http::Error),

    #[error("upstream request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("upstream i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out dialing upstream '{0}'")]
    DialTimeout(String),

    #[error("upstream closed the connection during the handshake")]
    UpstreamClosed,

    #[error("malformed upstream response head")]
    MalformedHead,

    #[error("upstream response head exceeds {MAX_HEAD_BYTES} bytes")]
    OversizedHead,
}

/// Wrap a literal message as a [`ProxyBody`].
pub fn text_body(text: impl Into<Bytes>) -> ProxyBody {
    Full::new(text.into())
        .map_err(|never| match never {})
        .boxed()
}

fn empty_body() -> ProxyBody {
    text_body(Bytes::new())
}

// ---------------------------------------------------------------------------
// HTTP mode
// ---------------------------------------------------------------------------

/// Single-host HTTP forwarder.
///
/// Holds one pooled client per upstream scheme; request and response bodies
/// stream straight through without buffering or rewriting.
pub struct Forwarder {
    http: Client<HttpConnector, Incoming>,
    https: Client<hyper_rustls::HttpsConnector<HttpConnector>, Incoming>,
}

impl Forwarder {
    pub fn new() -> Result<Self, ForwardError> {
        let http = Client::builder(TokioExecutor::new()).build_http();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .build();
        let https = Client::builder(TokioExecutor::new()).build(https_connector);

        Ok(Self { http, https })
    }

    /// Forward an admitted request to `upstream`.
    ///
    /// The request URI is rewritten to the upstream's scheme and authority
    /// (keeping the original path and query), hop-by-hop headers are
    /// stripped, `Host` is pointed at the upstream, and `X-Forwarded-Host`
    /// records the host the client asked for. The upstream response streams
    /// back untouched.
    pub async fn forward(
        &self,
        mut req: Request<Incoming>,
        upstream: &str,
        original_host: &str,
    ) -> Result<Response<ProxyBody>, ForwardError> {
        let upstream_uri: Uri = upstream.parse()?;
        let scheme = upstream_uri.scheme_str().unwrap_or("http");
        let authority = upstream_uri
            .authority()
            .ok_or_else(|| ForwardError::BadUpstream(upstream.to_string()))?
            .to_string();
        let base_path = upstream_uri.path().trim_end_matches('/');

        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let target: Uri = format!("{scheme}://{authority}{base_path}{path_and_query}").parse()?;

        *req.uri_mut() = target;

        let headers = req.headers_mut();
        strip_hop_by_hop(headers);
        headers.insert("x-forwarded-host", HeaderValue::from_str(original_host)?);
        headers.insert(header::HOST, HeaderValue::from_str(&authority)?);

        debug!(upstream, "forwarding request");

        let response = if scheme == "https" {
            self.https.request(req).await?
        } else {
            self.http.request(req).await?
        };

        Ok(response.map(|body| body.boxed()))
    }
}

/// Drop hop-by-hop headers before a request goes out on a new connection.
///
/// HTTP mode only; the WebSocket path replays the request verbatim because
/// the upstream needs `Connection`/`Upgrade` to answer the handshake.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

// ---------------------------------------------------------------------------
// WebSocket mode
// ---------------------------------------------------------------------------

trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Take over an `Upgrade: websocket` request and splice it to the upstream.
///
/// The upstream is dialed directly (TLS when the upstream URL says
/// `https`), the original request head is written verbatim, and the
/// upstream's own response head is mirrored back to the client. On a `101`
/// the client connection is claimed after the response goes out and raw
/// bytes are copied in both directions until either side closes.
pub async fn splice(
    req: Request<Incoming>,
    upstream: &str,
    tls: &TlsConnector,
) -> Result<Response<ProxyBody>, ForwardError> {
    let target = strip_scheme(upstream);
    let use_tls = upstream.contains("https");

    let tcp = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&target))
        .await
        .map_err(|_| ForwardError::DialTimeout(target.clone()))??;

    let mut upstream_io: Box<dyn Io> = if use_tls {
        let server_name = ServerName::try_from(host_only(&target).to_string())
            .map_err(|_| ForwardError::BadUpstream(upstream.to_string()))?;
        Box::new(tls.connect(server_name, tcp).await?)
    } else {
        Box::new(tcp)
    };

    // Replay the client's request verbatim and let the upstream answer the
    // upgrade itself.
    upstream_io.write_all(&request_head_bytes(&req)).await?;
    upstream_io.flush().await?;

    let (head, leftover) = read_response_head(&mut *upstream_io).await?;
    let (status, headers) = parse_response_head(&head)?;

    let mut builder = Response::builder().status(status);
    for (name, value) in &headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    if status != StatusCode::SWITCHING_PROTOCOLS {
        debug!(%status, upstream, "upstream refused the websocket upgrade");
        return Ok(builder.body(empty_body())?);
    }

    let on_upgrade = hyper::upgrade::on(req);
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(err) => {
                error!(%err, "client connection hijack failed");
                return;
            }
        };
        let mut client = TokioIo::new(upgraded);

        // Bytes the upstream sent on the heels of its 101.
        if !leftover.is_empty() && client.write_all(&leftover).await.is_err() {
            return;
        }

        match tokio::io::copy_bidirectional(&mut client, &mut *upstream_io).await {
            Ok((to_upstream, to_client)) => {
                debug!(to_upstream, to_client, "websocket splice finished");
            }
            Err(err) => {
                debug!(%err, "websocket splice ended with error");
            }
        }
    });

    Ok(builder.body(empty_body())?)
}

/// Build the permissive-or-verifying TLS connector for upstream dials.
pub fn tls_connector(skip_verify: bool) -> TlsConnector {
    let config = if skip_verify {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier::new()))
            .with_no_client_auth()
    } else {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

/// Accepts any certificate. Upstreams are commonly internal services with
/// self-signed certificates; the `tlsskipverify` config toggle controls
/// whether this verifier is installed.
#[derive(Debug)]
struct InsecureVerifier(rustls::crypto::CryptoProvider);

impl InsecureVerifier {
    fn new() -> Self {
        Self(rustls::crypto::aws_lc_rs::default_provider())
    }
}

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// `http://host:port` / `https://host:port` -> `host:port`.
fn strip_scheme(url: &str) -> String {
    url.replace("http://", "").replace("https://", "")
}

fn host_only(target: &str) -> &str {
    target.split(':').next().unwrap_or(target)
}

/// Serialize the request line and headers exactly as the client sent them.
fn request_head_bytes<B>(req: &Request<B>) -> Vec<u8> {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut head = format!("{} {} HTTP/1.1\r\n", req.method(), path).into_bytes();
    for (name, value) in req.headers() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Read up to and including the blank line ending the upstream's response
/// head. Returns `(head bytes, any bytes read past the head)`.
async fn read_response_head(
    io: &mut (dyn Io + '_),
) -> Result<(Vec<u8>, Vec<u8>), ForwardError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = io.read(&mut chunk).await?;
        if n == 0 {
            return Err(ForwardError::UpstreamClosed);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_head_end(&buf) {
            let leftover = buf.split_off(end);
            return Ok((buf, leftover));
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ForwardError::OversizedHead);
        }
    }
}

/// Offset of the first byte after the `\r\n\r\n` terminator, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Parse `HTTP/1.1 <code> <reason>` plus header lines.
fn parse_response_head(
    head: &[u8],
) -> Result<(StatusCode, Vec<(String, String)>), ForwardError> {
    let text = std::str::from_utf8(head).map_err(|_| ForwardError::MalformedHead)?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().ok_or(ForwardError::MalformedHead)?;
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next().ok_or(ForwardError::MalformedHead)?;
    let code: u16 = parts
        .next()
        .ok_or(ForwardError::MalformedHead)?
        .parse()
        .map_err(|_| ForwardError::MalformedHead)?;
    let status = StatusCode::from_u16(code).map_err(|_| ForwardError::MalformedHead)?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or(ForwardError::MalformedHead)?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok((status, headers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[test]
    fn strips_either_scheme() {
        assert_eq!(strip_scheme("http://backend:8080"), "backend:8080");
        assert_eq!(strip_scheme("https://backend:8443"), "backend:8443");
        assert_eq!(strip_scheme("backend:9000"), "backend:9000");
    }

    #[test]
    fn host_only_drops_port() {
        assert_eq!(host_only("backend:8443"), "backend");
        assert_eq!(host_only("backend"), "backend");
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("upgrade", HeaderValue::from_static("h2c"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("trailer", HeaderValue::from_static("Expires"));
        headers.insert("proxy-authenticate", HeaderValue::from_static("Basic"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic Zm9v"));
        headers.insert("accept", HeaderValue::from_static("*/*"));
        headers.insert(
            "cookie",
            HeaderValue::from_static("netclave-token-P=W,t,s"),
        );

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert!(headers.contains_key("accept"));
        assert!(headers.contains_key("cookie"));
    }

    #[test]
    fn request_head_replays_method_path_and_headers() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/chat?room=1")
            .header("host", "api.example")
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(())
            .unwrap();

        let head = String::from_utf8(request_head_bytes(&req)).unwrap();
        assert!(head.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(head.contains("host: api.example\r\n"));
        assert!(head.contains("upgrade: websocket\r\n"));
        assert!(head.ends_with("\r\n\r\n"));
    }

    #[test]
    fn parses_switching_protocols_head() {
        let head = b"HTTP/1.1 101 Switching Protocols\r\n\
                     Upgrade: websocket\r\n\
                     Connection: Upgrade\r\n\
                     Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";

        let (status, headers) = parse_response_head(head).unwrap();
        assert_eq!(status, StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].0, "Upgrade");
        assert_eq!(headers[0].1, "websocket");
    }

    #[test]
    fn rejects_garbage_head() {
        assert!(matches!(
            parse_response_head(b"not-http\r\n\r\n"),
            Err(ForwardError::MalformedHead)
        ));
    }

    #[test]
    fn head_end_offset_points_past_terminator() {
        let buf = b"HTTP/1.1 101 X\r\n\r\nEXTRA";
        let end = find_head_end(buf).unwrap();
        assert_eq!(&buf[end..], b"EXTRA");
    }

    #[tokio::test]
    async fn read_head_splits_leftover() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            server
                .write_all(b"HTTP/1.1 101 Switching Protocols\r\n\r\n\x81\x05hello")
                .await
                .unwrap();
        });

        let (head, leftover) = read_response_head(&mut client).await.unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));
        assert_eq!(leftover, b"\x81\x05hello");
    }

    #[tokio::test]
    async fn closed_upstream_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);

        assert!(matches!(
            read_response_head(&mut client).await,
            Err(ForwardError::UpstreamClosed)
        ));
    }
}
