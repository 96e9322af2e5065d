use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::alert::{AlertClient, AlertError, AlertFuture, AlertRequest};

/// Body of a successful alert creation answer.
#[derive(Debug, Deserialize)]
struct CreateAlertResponse {
    #[serde(rename = "requestId")]
    request_id: String,
}

/// Alert client that creates alerts through the OpsGenie REST API.
pub struct OpsGenieClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl OpsGenieClient {
    /// Creates a new [`OpsGenieClient`] posting to `url` with the given API key.
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                error!(error = %e, "Failed to build HTTP client");
                AlertError::Transport(format!("Failed to build HTTP client: {e}"))
            })?;
        info!(url = %url, "OpsGenie client initialized");
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

impl AlertClient for OpsGenieClient {
    fn create<'a>(&'a self, request: &'a AlertRequest) -> AlertFuture<'a> {
        Box::pin(async move {
            debug!(
                url = %self.url,
                user = %request.user,
                size = request.note.len(),
                "Posting alert to OpsGenie"
            );

            let response = self
                .client
                .post(&self.url)
                .header(AUTHORIZATION, format!("GenieKey {}", self.api_key))
                .json(request)
                .send()
                .await
                .map_err(|e| {
                    error!(url = %self.url, error = %e, "Failed to reach OpsGenie");
                    AlertError::Transport(e.to_string())
                })?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| AlertError::Transport(e.to_string()))?;
            if !status.is_success() {
                error!(status = status.as_u16(), body = %body, "OpsGenie rejected alert");
                return Err(AlertError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let created: CreateAlertResponse =
                serde_json::from_str(&body).map_err(|e| AlertError::Decode(e.to_string()))?;
            info!(
                request_id = %created.request_id,
                message = %request.message,
                "Created OpsGenie alert"
            );
            Ok(created.request_id)
        })
    }

    fn name(&self) -> &str {
        "opsgenie"
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        sync::oneshot,
    };

    use super::*;

    /// Serves a single HTTP request, replying with the given status and body
    /// and handing the raw request back through the returned channel.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v2/alerts", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buffer = [0u8; 4096];
            loop {
                let n = stream.read(&mut buffer).await.unwrap();
                request.extend_from_slice(&buffer[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| {
                            l.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            tx.send(String::from_utf8_lossy(&request).to_string()).ok();
        });

        (url, rx)
    }

    fn request() -> AlertRequest {
        AlertRequest::new(
            "Disk full".to_string(),
            "check it".to_string(),
            "USER".to_string(),
        )
    }

    #[tokio::test]
    async fn test_create_alert() {
        let (url, rx) = serve_once(
            "202 Accepted",
            r#"{"result":"Request will be processed","took":0.1,"requestId":"abc-123"}"#,
        )
        .await;
        let client = OpsGenieClient::new(&url, "secret", Duration::from_secs(5)).unwrap();

        let id = client.create(&request()).await.unwrap();
        assert_eq!(id, "abc-123");

        let raw = rx.await.unwrap();
        assert!(raw.starts_with("POST /v2/alerts"));
        assert!(raw.to_ascii_lowercase().contains("authorization: geniekey secret"));
        assert!(raw.contains(r#""message":"Disk full""#));
        assert!(raw.contains(r#""user":"USER""#));
    }

    #[tokio::test]
    async fn test_create_alert_rejected() {
        let (url, _rx) = serve_once("422 Unprocessable Entity", r#"{"message":"bad"}"#).await;
        let client = OpsGenieClient::new(&url, "secret", Duration::from_secs(5)).unwrap();

        let result = client.create(&request()).await;
        match result {
            Err(AlertError::Status { status, body }) => {
                assert_eq!(status, 422);
                assert!(body.contains("bad"));
            }
            other => panic!("Expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_alert_bad_body() {
        let (url, _rx) = serve_once("202 Accepted", "not json").await;
        let client = OpsGenieClient::new(&url, "secret", Duration::from_secs(5)).unwrap();

        let result = client.create(&request()).await;
        assert!(matches!(result, Err(AlertError::Decode(_))));
    }

    #[tokio::test]
    async fn test_create_alert_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v2/alerts", listener.local_addr().unwrap());
        drop(listener);
        let client = OpsGenieClient::new(&url, "secret", Duration::from_secs(5)).unwrap();

        let result = client.create(&request()).await;
        assert!(matches!(result, Err(AlertError::Transport(_))));
    }
}
