//! Delivery of single metrics to the server.
//!
//! Two wire formats: JSON over HTTP (`POST /update`, gzip-compressed,
//! optionally signed) and the `UpdateMetrics` gRPC call. Both return the
//! value the server stored.

use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, HOST};
use http::{Method, Request};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use pulse_api::{SIGNATURE_METADATA, signed_bytes};
use pulse_api::middleware::REAL_IP_HEADER;
use pulse_api::proto;
use pulse_api::proto::metrics_client::MetricsClient;
use pulse_core::codec::{self, GZIP};
use pulse_core::{HASH_HEADER, Metric, Signer};
use thiserror::Error;
use tokio::net::TcpStream;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// Default upper bound on each phase of a delivery attempt.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest response body the agent will read.
const MAX_RESPONSE_BYTES: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum SendError {
    /// The request never reached the server; worth retrying.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request went out but no answer came back. The server may have
    /// applied it, so resending could count a counter delta twice.
    #[error("delivery unconfirmed: {0}")]
    Unconfirmed(String),

    /// The server answered and refused the metric.
    #[error("rejected by server ({status}): {message}")]
    Rejected { status: String, message: String },

    /// The server answered, but the reply failed signature checks.
    #[error("unverified reply: {0}")]
    Unverified(String),

    #[error("failed to encode metric: {0}")]
    Encode(String),
}

impl SendError {
    /// Only failures that happened before the request left are retryable.
    pub fn is_transport(&self) -> bool {
        matches!(self, SendError::Transport(_))
    }

    fn rejected(status: impl ToString, message: impl Into<String>) -> Self {
        SendError::Rejected {
            status: status.to_string(),
            message: message.into(),
        }
    }
}

/// Delivers one metric and returns the server's stored value.
pub trait MetricSender: Send + Sync + 'static {
    fn send(&self, metric: &Metric) -> impl Future<Output = Result<Metric, SendError>> + Send;
}

/// Accepts `host:port` or an `http://` URL.
fn authority(address: &str) -> &str {
    address
        .trim()
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

/// With a key configured, a reply must carry a valid signature.
fn check_reply(
    signer: Option<&Signer>,
    payload: &[u8],
    signature: Option<&str>,
) -> Result<(), SendError> {
    let Some(signer) = signer else {
        return Ok(());
    };
    match signature {
        Some(signature) if signer.verify(payload, signature) => Ok(()),
        Some(_) => Err(SendError::Unverified("reply signature mismatch".into())),
        None => Err(SendError::Unverified("reply is not signed".into())),
    }
}

// ── HTTP ──────────────────────────────────────────────────────────

type Connection = hyper::client::conn::http1::SendRequest<Full<Bytes>>;

pub struct HttpSender {
    address: String,
    signer: Option<Signer>,
    timeout: Duration,
}

impl HttpSender {
    pub fn new(address: &str, signer: Option<Signer>) -> Self {
        Self {
            address: authority(address).to_string(),
            signer,
            timeout: SEND_TIMEOUT,
        }
    }

    /// Bound connecting and awaiting the reply by `timeout` each.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connect(&self) -> Result<(Connection, Option<IpAddr>), SendError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| SendError::Transport(format!("connect {}: {e}", self.address)))?;
        let local_ip = stream.local_addr().ok().map(|a| a.ip());

        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| SendError::Transport(format!("handshake: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "agent connection closed with error");
            }
        });
        Ok((sender, local_ip))
    }

    fn request(
        &self,
        body: Vec<u8>,
        local_ip: Option<IpAddr>,
    ) -> Result<Request<Full<Bytes>>, SendError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("http://{}/update", self.address))
            .header(HOST, &self.address)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, GZIP)
            .header(ACCEPT_ENCODING, GZIP);
        if let Some(ip) = local_ip {
            builder = builder.header(REAL_IP_HEADER, ip.to_string());
        }
        if let Some(signer) = &self.signer {
            builder = builder.header(HASH_HEADER, signer.sign(&body));
        }
        builder
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| SendError::Encode(e.to_string()))
    }

    async fn exchange(
        &self,
        conn: &mut Connection,
        request: Request<Full<Bytes>>,
    ) -> Result<Metric, SendError> {
        let response = conn.send_request(request).await.map_err(|e| {
            if e.is_canceled() {
                SendError::Transport(format!("request not sent: {e}"))
            } else {
                SendError::Unconfirmed(format!("request: {e}"))
            }
        })?;

        let status = response.status();
        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case(GZIP));
        let signature = response
            .headers()
            .get(HASH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let raw = response
            .into_body()
            .collect()
            .await
            .map_err(|e| SendError::Unconfirmed(format!("response body: {e}")))?
            .to_bytes();
        let payload = if gzipped {
            codec::decompress(&raw, MAX_RESPONSE_BYTES)
                .map_err(|e| SendError::rejected(status, e.to_string()))?
        } else {
            raw.to_vec()
        };

        if !status.is_success() {
            return Err(SendError::rejected(
                status,
                String::from_utf8_lossy(&payload).trim().to_string(),
            ));
        }
        check_reply(self.signer.as_ref(), &payload, signature.as_deref())?;
        serde_json::from_slice(&payload).map_err(|e| SendError::rejected(status, e.to_string()))
    }
}

impl MetricSender for HttpSender {
    async fn send(&self, metric: &Metric) -> Result<Metric, SendError> {
        let json = serde_json::to_vec(metric).map_err(|e| SendError::Encode(e.to_string()))?;
        let body = codec::compress(&json).map_err(|e| SendError::Encode(e.to_string()))?;

        let (mut conn, local_ip) = tokio::time::timeout(self.timeout, self.connect())
            .await
            .map_err(|_| SendError::Transport(format!("connect {}: timed out", self.address)))??;
        let request = self.request(body, local_ip)?;

        // From here on the server may have seen the request.
        tokio::time::timeout(self.timeout, self.exchange(&mut conn, request))
            .await
            .map_err(|_| {
                SendError::Unconfirmed(format!("no reply within {}ms", self.timeout.as_millis()))
            })?
    }
}

// ── gRPC ──────────────────────────────────────────────────────────

pub struct GrpcSender {
    client: MetricsClient<Channel>,
    signer: Option<Signer>,
}

impl GrpcSender {
    /// Create a sender; the connection is established on first use.
    pub fn new(address: &str, signer: Option<Signer>) -> Result<Self, SendError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", authority(address)))
            .map_err(|e| SendError::Encode(format!("invalid gRPC address {address:?}: {e}")))?
            .timeout(SEND_TIMEOUT)
            .connect_timeout(SEND_TIMEOUT);
        Ok(Self {
            client: MetricsClient::new(endpoint.connect_lazy()),
            signer,
        })
    }
}

/// Map a failed call onto the delivery taxonomy. Only `Unavailable` means
/// the call never reached the service; a deadline or cancellation leaves
/// the outcome unknown.
fn classify_status(status: tonic::Status) -> SendError {
    match status.code() {
        tonic::Code::Unavailable => SendError::Transport(status.message().to_string()),
        tonic::Code::DeadlineExceeded | tonic::Code::Cancelled | tonic::Code::Unknown => {
            SendError::Unconfirmed(format!("{:?}: {}", status.code(), status.message()))
        }
        code => SendError::rejected(format!("{code:?}"), status.message()),
    }
}

impl MetricSender for GrpcSender {
    async fn send(&self, metric: &Metric) -> Result<Metric, SendError> {
        let message = proto::UpdateMetricsRequest {
            metrics: vec![proto::Metric::from(metric)],
        };
        let mut request = tonic::Request::new(message);
        if let Some(signer) = &self.signer {
            let signature = signer.sign(&signed_bytes(request.get_ref()));
            let value = signature
                .parse::<MetadataValue<Ascii>>()
                .map_err(|e| SendError::Encode(format!("signature metadata: {e}")))?;
            request.metadata_mut().insert(SIGNATURE_METADATA, value);
        }

        let mut client = self.client.clone();
        let response = client.update_metrics(request).await.map_err(classify_status)?;

        let signature = response
            .metadata()
            .get(SIGNATURE_METADATA)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let reply = response.into_inner();
        check_reply(self.signer.as_ref(), &signed_bytes(&reply), signature.as_deref())?;

        let stored = reply
            .metrics
            .into_iter()
            .next()
            .ok_or_else(|| SendError::rejected("OK", "empty response"))?;
        Metric::try_from(stored).map_err(|e| SendError::rejected("OK", e.to_string()))
    }
}

// ── Selection ─────────────────────────────────────────────────────

/// The configured wire format.
pub enum Transport {
    Http(HttpSender),
    Grpc(GrpcSender),
}

impl Transport {
    /// gRPC when a gRPC address is given, HTTP otherwise.
    pub fn from_config(
        address: &str,
        grpc_address: Option<&str>,
        signer: Option<Signer>,
    ) -> Result<Self, SendError> {
        match grpc_address.filter(|a| !a.is_empty()) {
            Some(grpc) => Ok(Transport::Grpc(GrpcSender::new(grpc, signer)?)),
            None => Ok(Transport::Http(HttpSender::new(address, signer))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transport::Http(_) => "http",
            Transport::Grpc(_) => "grpc",
        }
    }
}

impl MetricSender for Transport {
    async fn send(&self, metric: &Metric) -> Result<Metric, SendError> {
        match self {
            Transport::Http(sender) => sender.send(metric).await,
            Transport::Grpc(sender) => sender.send(metric).await,
        }
    }
}
