//! Stateless request replay for the operator

use intercept_common::HeaderList;
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::ControlPlaneError;

#[derive(Debug, Clone, Deserialize)]
pub struct RepeaterRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HeaderList,
    #[serde(default)]
    pub body: String,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct RepeaterResponse {
    pub status_code: u16,
    pub headers: HeaderList,
    pub body: String,
}

pub struct Repeater {
    client: Client,
}

impl Repeater {
    /// Upstream certificates are not verified: the operator replays traffic
    /// to hosts the proxy already decrypted.
    pub fn new(timeout: Duration) -> Result<Self, ControlPlaneError> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ControlPlaneError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn send(&self, request: RepeaterRequest) -> Result<RepeaterResponse, ControlPlaneError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ControlPlaneError::BadRequest(format!("invalid method {:?}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ControlPlaneError::Repeater(e.to_string()))?;

        let status_code = response.status().as_u16();
        let headers: HeaderList = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::Repeater(e.to_string()))?;

        info!(method = %request.method, url = %request.url, status_code, "Repeater request sent");
        Ok(RepeaterResponse {
            status_code,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::any, Router};

    async fn spawn_upstream() -> String {
        let app = Router::new().route(
            "/*path",
            any(|method: axum::http::Method, headers: axum::http::HeaderMap, body: String| async move {
                let marker = headers
                    .get("x-marker")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-")
                    .to_string();
                (
                    [("x-upstream", "yes")],
                    format!("{} {} {}", method, marker, body),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_replays_method_headers_and_body() {
        let base = spawn_upstream().await;
        let repeater = Repeater::new(Duration::from_secs(5)).unwrap();

        let response = repeater
            .send(RepeaterRequest {
                method: "POST".into(),
                url: format!("{}/echo", base),
                headers: vec![("X-Marker", "m1")].into_iter().collect(),
                body: "payload".into(),
            })
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "POST m1 payload");
        assert_eq!(response.headers.get("x-upstream"), Some("yes"));
    }

    #[tokio::test]
    async fn test_bad_method_and_unreachable_host() {
        let repeater = Repeater::new(Duration::from_secs(2)).unwrap();

        let bad = repeater
            .send(RepeaterRequest {
                method: "NOT A METHOD".into(),
                url: "http://127.0.0.1:1/".into(),
                headers: HeaderList::new(),
                body: String::new(),
            })
            .await;
        assert!(matches!(bad, Err(ControlPlaneError::BadRequest(_))));

        let unreachable = repeater
            .send(RepeaterRequest {
                method: "GET".into(),
                url: "http://127.0.0.1:1/".into(),
                headers: HeaderList::new(),
                body: String::new(),
            })
            .await;
        assert!(matches!(unreachable, Err(ControlPlaneError::Repeater(_))));
    }
}
