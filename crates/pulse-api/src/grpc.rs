//! gRPC front end: `pulse.metrics.Metrics/UpdateMetrics`.
//!
//! The interceptor sees only metadata, so it handles logging and the
//! trusted-subnet check (against the TCP peer). The signature covers the
//! request message in its canonical encoding (see [`signed_bytes`]) and is
//! checked inside the RPC, before the repository is touched.

use std::net::SocketAddr;
use std::sync::Arc;

use prost::Message;
use pulse_core::{Metric, MetricError, MetricValue, RawMetric, Signer};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use crate::middleware::TrustedSubnet;
use crate::proto;
use crate::proto::metrics_server::{Metrics, MetricsServer};
use crate::service::{MetricsService, ServiceError};

/// Metadata key carrying the signature (`HashSHA256`, lower-cased).
pub const SIGNATURE_METADATA: &str = "hashsha256";

/// Bytes covered by a gRPC signature, in either direction.
///
/// tonic hands the RPC a decoded message, so the server cannot see the
/// bytes on the wire. Both ends sign the prost encoding instead: fields in
/// tag order, defaults omitted, unknown fields dropped. A prost client
/// produces exactly these bytes. A client whose encoding differs (unknown
/// fields, repeated scalars, non-minimal varints) fails verification.
pub fn signed_bytes<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

impl From<ServiceError> for Status {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Invalid(msg) => Status::invalid_argument(msg),
            ServiceError::NotFound(msg) => Status::not_found(msg),
            ServiceError::Internal(msg) => Status::internal(msg),
        }
    }
}

impl From<&Metric> for proto::Metric {
    fn from(m: &Metric) -> Self {
        match m.value {
            MetricValue::Gauge(v) => proto::Metric {
                id: m.id.clone(),
                kind: proto::MetricType::Gauge.into(),
                delta: None,
                value: Some(v),
            },
            MetricValue::Counter(d) => proto::Metric {
                id: m.id.clone(),
                kind: proto::MetricType::Counter.into(),
                delta: Some(d),
                value: None,
            },
        }
    }
}

impl TryFrom<proto::Metric> for Metric {
    type Error = MetricError;

    fn try_from(m: proto::Metric) -> Result<Self, Self::Error> {
        let kind = match m.kind() {
            proto::MetricType::Gauge => "gauge",
            proto::MetricType::Counter => "counter",
            proto::MetricType::Unspecified => {
                return Err(MetricError::UnknownKind(m.kind.to_string()));
            }
        };
        Metric::try_from(RawMetric {
            id: m.id,
            kind: kind.to_string(),
            delta: m.delta,
            value: m.value,
        })
    }
}

/// Logs every call and enforces the trusted subnet on the peer address.
#[derive(Debug, Clone)]
pub struct PeerGuard {
    subnet: Arc<TrustedSubnet>,
}

impl PeerGuard {
    pub fn new(subnet: Arc<TrustedSubnet>) -> Self {
        Self { subnet }
    }
}

impl Interceptor for PeerGuard {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let peer: Option<SocketAddr> = request.remote_addr();
        debug!(?peer, "grpc call");
        if self.subnet.allows(peer.map(|addr| addr.ip())) {
            Ok(request)
        } else {
            warn!(?peer, "grpc caller outside trusted subnet");
            Err(Status::permission_denied("caller is not in the trusted subnet"))
        }
    }
}

/// gRPC implementation of the metrics service.
pub struct GrpcMetrics {
    service: MetricsService,
    signer: Option<Signer>,
}

impl GrpcMetrics {
    pub fn new(service: MetricsService, signer: Option<Signer>) -> Self {
        Self { service, signer }
    }

    /// Wrap in the peer interceptor for mounting on a tonic server.
    pub fn into_service(
        self,
        subnet: Arc<TrustedSubnet>,
    ) -> InterceptedService<MetricsServer<Self>, PeerGuard> {
        MetricsServer::with_interceptor(self, PeerGuard::new(subnet))
    }

    fn verify(&self, request: &Request<proto::UpdateMetricsRequest>) -> Result<(), Status> {
        let Some(signer) = &self.signer else {
            return Ok(());
        };
        let signature = request
            .metadata()
            .get(SIGNATURE_METADATA)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::invalid_argument("missing HashSHA256 metadata"))?;
        if signer.verify(&signed_bytes(request.get_ref()), signature) {
            Ok(())
        } else {
            warn!(peer = ?request.remote_addr(), "grpc signature mismatch");
            Err(Status::invalid_argument("signature mismatch"))
        }
    }
}

#[tonic::async_trait]
impl Metrics for GrpcMetrics {
    async fn update_metrics(
        &self,
        request: Request<proto::UpdateMetricsRequest>,
    ) -> Result<Response<proto::UpdateMetricsResponse>, Status> {
        self.verify(&request)?;

        let metrics = request
            .into_inner()
            .metrics
            .into_iter()
            .map(Metric::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        debug!(rpc = "UpdateMetrics", count = metrics.len(), "update received");

        let stored = self.service.update_batch(metrics).await?;
        let mut response = Response::new(proto::UpdateMetricsResponse {
            metrics: stored.iter().map(proto::Metric::from).collect(),
        });

        if let Some(signer) = &self.signer {
            let signature = signer.sign(&signed_bytes(response.get_ref()));
            if let Ok(value) = signature.parse::<MetadataValue<Ascii>>() {
                response.metadata_mut().insert(SIGNATURE_METADATA, value);
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::RetryPolicy;
    use pulse_store::{MemStorage, Persistence, Repository, Storage};
    use std::time::Duration;

    fn grpc(key: Option<&str>) -> GrpcMetrics {
        let storage = Arc::new(Storage::Memory(MemStorage::new()));
        let persistence = Arc::new(Persistence::new(storage, Duration::ZERO));
        GrpcMetrics::new(
            MetricsService::new(persistence, RetryPolicy::none()),
            Signer::from_key(key),
        )
    }

    fn batch() -> proto::UpdateMetricsRequest {
        proto::UpdateMetricsRequest {
            metrics: vec![
                proto::Metric::from(&Metric::counter("c1", 5)),
                proto::Metric::from(&Metric::gauge("g1", 9.9)),
                proto::Metric::from(&Metric::counter("c1", 2)),
            ],
        }
    }

    #[tokio::test]
    async fn update_returns_stored_values() {
        let reply = grpc(None)
            .update_metrics(Request::new(batch()))
            .await
            .unwrap()
            .into_inner();
        let stored: Vec<Metric> = reply
            .metrics
            .into_iter()
            .map(|m| Metric::try_from(m).unwrap())
            .collect();
        assert_eq!(stored, vec![Metric::counter("c1", 7), Metric::gauge("g1", 9.9)]);
    }

    #[tokio::test]
    async fn unspecified_kind_is_invalid_argument() {
        let request = proto::UpdateMetricsRequest {
            metrics: vec![proto::Metric {
                id: "x".into(),
                kind: 0,
                delta: Some(1),
                value: None,
            }],
        };
        let status = grpc(None).update_metrics(Request::new(request)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn missing_value_field_is_invalid_argument() {
        let request = proto::UpdateMetricsRequest {
            metrics: vec![proto::Metric {
                id: "g".into(),
                kind: proto::MetricType::Gauge.into(),
                delta: Some(3),
                value: None,
            }],
        };
        let status = grpc(None).update_metrics(Request::new(request)).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn signed_request_is_accepted_and_reply_signed() {
        let signer = Signer::new("secret");
        let body = batch();
        let mut request = Request::new(body.clone());
        request.metadata_mut().insert(
            SIGNATURE_METADATA,
            signer.sign(&body.encode_to_vec()).parse().unwrap(),
        );

        let response = grpc(Some("secret")).update_metrics(request).await.unwrap();
        let signature = response
            .metadata()
            .get(SIGNATURE_METADATA)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(signer.verify(&response.get_ref().encode_to_vec(), &signature));
    }

    #[tokio::test]
    async fn unsigned_or_tampered_request_is_rejected() {
        let svc = grpc(Some("secret"));

        let status = svc.update_metrics(Request::new(batch())).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let signer = Signer::new("secret");
        let mut tampered = batch();
        let signature = signer.sign(&tampered.encode_to_vec());
        tampered.metrics[0].delta = Some(500);
        let mut request = Request::new(tampered);
        request
            .metadata_mut()
            .insert(SIGNATURE_METADATA, signature.parse().unwrap());
        let status = svc.update_metrics(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        // Nothing reached the repository.
        assert!(svc.service.storage().list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn signature_is_checked_against_canonical_encoding() {
        let signer = Signer::new("secret");
        let svc = grpc(Some("secret"));

        // A prost-encoded request round-trips to the same signed bytes.
        let wire = batch().encode_to_vec();
        let decoded = proto::UpdateMetricsRequest::decode(wire.as_slice()).unwrap();
        assert_eq!(signed_bytes(&decoded), wire);

        // Field 15 is unknown to the schema and dropped on decode, so a
        // signature over the raw bytes no longer matches.
        let mut extended = wire.clone();
        extended.extend_from_slice(&[0x78, 0x01]);
        let decoded = proto::UpdateMetricsRequest::decode(extended.as_slice()).unwrap();
        assert_eq!(decoded, batch());
        let mut request = Request::new(decoded);
        request
            .metadata_mut()
            .insert(SIGNATURE_METADATA, signer.sign(&extended).parse().unwrap());
        let status = svc.update_metrics(request).await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn peer_guard_requires_known_peer_when_subnet_set() {
        let mut open = PeerGuard::new(Arc::new(TrustedSubnet::Any));
        assert!(open.call(Request::new(())).is_ok());

        let mut guarded = PeerGuard::new(Arc::new(TrustedSubnet::parse(Some("10.0.0.0/8"))));
        let status = guarded.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::PermissionDenied);
    }
}
