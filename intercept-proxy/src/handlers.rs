use crate::admin::Metrics;
use crate::config::BodyLimits;
use crate::flow::{HyperFlow, Verdict};
use crate::worker::{InterceptWorker, Interception};
use bytes::{Bytes, BytesMut};
use hudsucker::{
    hyper::{
        body::HttpBody,
        header::{HeaderValue, CONNECTION, CONTENT_LENGTH, UPGRADE},
        Body, Method, Request, Response, StatusCode,
    },
    HttpContext, HttpHandler, RequestOrResponse,
};
use std::fmt;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Request hook that pauses flows while interception is on.
#[derive(Clone)]
pub struct InterceptHandler {
    worker: InterceptWorker,
    metrics: Arc<Metrics>,
    limits: BodyLimits,
}

impl InterceptHandler {
    pub fn new(worker: InterceptWorker, limits: BodyLimits) -> Self {
        Self {
            metrics: worker.metrics(),
            worker,
            limits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BodyReadError {
    TooLarge(usize),
    Timeout,
    Stream(String),
}

impl fmt::Display for BodyReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyReadError::TooLarge(limit) => write!(f, "body exceeds {} bytes", limit),
            BodyReadError::Timeout => write!(f, "body read timed out"),
            BodyReadError::Stream(msg) => write!(f, "body stream error: {}", msg),
        }
    }
}

impl BodyReadError {
    fn status(&self) -> StatusCode {
        match self {
            BodyReadError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            BodyReadError::Timeout => StatusCode::REQUEST_TIMEOUT,
            BodyReadError::Stream(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Requests that are never paused: tunnels, protocol upgrades, and bodies
/// declared larger than the buffering limit.
pub(crate) fn bypass_reason(req: &Request<Body>, limits: &BodyLimits) -> Option<&'static str> {
    if req.method() == Method::CONNECT {
        return Some("tunnel");
    }
    if req.headers().contains_key(UPGRADE) {
        return Some("upgrade");
    }
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    match declared {
        Some(length) if length > limits.max_body_size => Some("oversized body"),
        _ => None,
    }
}

/// Buffer the whole request body, bounded in size and time.
pub(crate) async fn read_body(mut body: Body, limits: &BodyLimits) -> Result<Bytes, BodyReadError> {
    let read = async {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.data().await {
            let chunk = chunk.map_err(|e| BodyReadError::Stream(e.to_string()))?;
            if buffer.len() + chunk.len() > limits.max_body_size {
                return Err(BodyReadError::TooLarge(limits.max_body_size));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    };
    timeout(limits.read_timeout(), read)
        .await
        .map_err(|_| BodyReadError::Timeout)?
}

/// What the client sees when its flow is dropped.
pub(crate) fn killed_response() -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = StatusCode::BAD_GATEWAY;
    res.headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    res
}

fn error_response(status: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = status;
    res
}

#[async_trait::async_trait]
impl HttpHandler for InterceptHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        Metrics::incr(&self.metrics.total_requests);

        // Cheap exit before buffering anything.
        if !self.worker.is_enabled() {
            Metrics::incr(&self.metrics.passed_through);
            return RequestOrResponse::Request(req);
        }
        if let Some(reason) = bypass_reason(&req, &self.limits) {
            debug!("Not pausing {} {} ({})", req.method(), req.uri(), reason);
            Metrics::incr(&self.metrics.passed_through);
            return RequestOrResponse::Request(req);
        }

        let (parts, body) = req.into_parts();
        let body = match read_body(body, &self.limits).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to buffer body of {} {}: {}", parts.method, parts.uri, e);
                return RequestOrResponse::Response(error_response(e.status()));
            }
        };

        let (flow, verdict) = HyperFlow::new(parts, body);
        if let Interception::PassThrough(flow) = self.worker.intercept(Box::new(flow)).await {
            flow.resume();
        }

        match verdict.await {
            Ok(Verdict::Forward(req)) => RequestOrResponse::Request(req),
            Ok(Verdict::Kill) | Err(_) => RequestOrResponse::Response(killed_response()),
        }
    }
}
