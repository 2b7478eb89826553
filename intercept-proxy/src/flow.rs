//! Live flow handles
//!
//! A [`FlowHandle`] is the proxy engine's in-flight request, held while the
//! operator decides what to do with it. It is consumed exactly once, by
//! either [`FlowHandle::resume`] or [`FlowHandle::kill`]. A handle dropped
//! without either is treated as killed by the engine.

use bytes::Bytes;
use hudsucker::hyper::{
    header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST},
    http::{request::Parts, uri::PathAndQuery},
    Body, HeaderMap, Method, Request, Uri,
};
use intercept_common::HeaderList;
use std::str::FromStr;
use tokio::sync::oneshot;

use crate::error::FlowError;

pub trait FlowHandle: Send + Sync + 'static {
    fn method(&self) -> String;
    fn scheme(&self) -> String;
    fn host(&self) -> String;
    fn port(&self) -> u16;
    /// Path including the query string
    fn path(&self) -> String;
    fn url(&self) -> String;
    /// Headers in wire order
    fn headers(&self) -> Vec<(String, String)>;
    fn body(&self) -> &[u8];

    fn set_method(&mut self, method: &str) -> Result<(), FlowError>;
    fn set_path(&mut self, path: &str) -> Result<(), FlowError>;
    /// Replace the whole header set
    fn set_headers(&mut self, headers: &HeaderList) -> Result<(), FlowError>;
    fn set_body(&mut self, body: Vec<u8>);

    /// Let the (possibly modified) request continue upstream.
    fn resume(self: Box<Self>);
    /// Terminate the flow; no request is sent upstream.
    fn kill(self: Box<Self>);
}

/// What the engine should do with a paused request.
#[derive(Debug)]
pub enum Verdict {
    Forward(Request<Body>),
    Kill,
}

/// [`FlowHandle`] over a buffered hyper request.
///
/// The request hook keeps the matching receiver and turns the verdict back
/// into a request or a terminating response.
#[derive(Debug)]
pub struct HyperFlow {
    parts: Parts,
    body: Bytes,
    verdict: oneshot::Sender<Verdict>,
}

impl HyperFlow {
    pub fn new(parts: Parts, body: Bytes) -> (Self, oneshot::Receiver<Verdict>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                parts,
                body,
                verdict: tx,
            },
            rx,
        )
    }

    pub fn from_request(req: Request<()>, body: impl Into<Bytes>) -> (Self, oneshot::Receiver<Verdict>) {
        let (parts, _) = req.into_parts();
        Self::new(parts, body.into())
    }

    fn host_header(&self) -> Option<&str> {
        self.parts.headers.get(HOST).and_then(|value| value.to_str().ok())
    }

    fn authority(&self) -> String {
        self.parts
            .uri
            .authority()
            .map(|authority| authority.as_str().to_string())
            .or_else(|| self.host_header().map(str::to_string))
            .unwrap_or_default()
    }
}

fn default_port(scheme: &str) -> u16 {
    if scheme.eq_ignore_ascii_case("https") {
        443
    } else {
        80
    }
}

/// Split `host[:port]`, leaving bracketed IPv6 literals intact.
fn split_authority(authority: &str) -> (&str, Option<u16>) {
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => {
                let port = authority[end + 1..].strip_prefix(':').and_then(|p| p.parse().ok());
                (&authority[..=end], port)
            }
            None => (authority, None),
        };
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (authority, None),
        },
        None => (authority, None),
    }
}

impl FlowHandle for HyperFlow {
    fn method(&self) -> String {
        self.parts.method.as_str().to_string()
    }

    fn scheme(&self) -> String {
        self.parts.uri.scheme_str().unwrap_or("http").to_string()
    }

    fn host(&self) -> String {
        if let Some(host) = self.parts.uri.host() {
            return host.to_string();
        }
        let authority = self.authority();
        split_authority(&authority).0.to_string()
    }

    fn port(&self) -> u16 {
        if let Some(port) = self.parts.uri.port_u16() {
            return port;
        }
        if self.parts.uri.authority().is_none() {
            if let Some(port) = self.host_header().and_then(|host| split_authority(host).1) {
                return port;
            }
        }
        default_port(&self.scheme())
    }

    fn path(&self) -> String {
        self.parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string())
    }

    fn url(&self) -> String {
        if self.parts.uri.scheme().is_some() && self.parts.uri.authority().is_some() {
            return self.parts.uri.to_string();
        }
        format!("{}://{}{}", self.scheme(), self.authority(), self.path())
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect()
    }

    fn body(&self) -> &[u8] {
        &self.body
    }

    fn set_method(&mut self, method: &str) -> Result<(), FlowError> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| FlowError::InvalidMethod(method.to_string()))?;
        self.parts.method = method;
        Ok(())
    }

    fn set_path(&mut self, path: &str) -> Result<(), FlowError> {
        let invalid = || FlowError::InvalidPath(path.to_string());
        let path_and_query = PathAndQuery::from_str(path).map_err(|_| invalid())?;
        let mut uri_parts = self.parts.uri.clone().into_parts();
        uri_parts.path_and_query = Some(path_and_query);
        self.parts.uri = Uri::from_parts(uri_parts).map_err(|_| invalid())?;
        Ok(())
    }

    fn set_headers(&mut self, headers: &HeaderList) -> Result<(), FlowError> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FlowError::InvalidHeader(name.to_string()))?;
            let header_value = HeaderValue::from_bytes(value.as_bytes())
                .map_err(|_| FlowError::InvalidHeader(name.to_string()))?;
            map.append(header_name, header_value);
        }
        self.parts.headers = map;
        Ok(())
    }

    fn set_body(&mut self, body: Vec<u8>) {
        self.body = Bytes::from(body);
    }

    fn resume(self: Box<Self>) {
        let HyperFlow {
            mut parts,
            body,
            verdict,
        } = *self;
        // Keep a declared length truthful after body edits.
        if parts.headers.contains_key(CONTENT_LENGTH) {
            parts.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        let _ = verdict.send(Verdict::Forward(Request::from_parts(parts, Body::from(body))));
    }

    fn kill(self: Box<Self>) {
        let _ = self.verdict.send(Verdict::Kill);
    }
}
