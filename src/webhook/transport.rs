use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;

use crate::config::WebhookConfig;
use crate::error::{GatewayError, Result};

/// One signed POST to a client callback URL
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// HTTP status returned by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP seam; `Err` means no response was received
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, request: &WebhookRequest) -> Result<WebhookResponse>;
}

/// [`WebhookTransport`] over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpWebhookTransport {
    client: Client,
}

impl HttpWebhookTransport {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| GatewayError::Webhook(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GatewayError::Webhook(format!("Invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| GatewayError::Webhook(format!("Invalid header value: {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn post(&self, request: &WebhookRequest) -> Result<WebhookResponse> {
        let response = self
            .client
            .post(&request.url)
            .headers(Self::header_map(&request.headers)?)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| GatewayError::Webhook(format!("Webhook request failed: {e}")))?;

        Ok(WebhookResponse {
            status: response.status().as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one connection, answer with `status`, return the raw request
    async fn serve_once(listener: TcpListener, status_line: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if raw.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        let response = format!("HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        socket.write_all(response.as_bytes()).await.unwrap();
        String::from_utf8_lossy(&raw).to_string()
    }

    fn request(url: String) -> WebhookRequest {
        WebhookRequest {
            url,
            headers: vec![
                ("X-Webhook-Event".to_string(), "message.sent".to_string()),
                ("X-Delivery-Attempt".to_string(), "1".to_string()),
            ],
            body: br#"{"event":"message.sent"}"#.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_posts_json_with_headers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hooks", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(listener, "204 No Content"));

        let transport = HttpWebhookTransport::new(&WebhookConfig::default()).unwrap();
        let response = transport.post(&request(url)).await.unwrap();
        assert_eq!(response.status, 204);
        assert!(response.is_success());

        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.starts_with("post /hooks"));
        assert!(raw.contains("content-type: application/json"));
        assert!(raw.contains("x-webhook-event: message.sent"));
        assert!(raw.contains(r#"{"event":"message.sent"}"#));
    }

    #[tokio::test]
    async fn test_error_status_is_returned() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hooks", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_once(listener, "500 Internal Server Error"));

        let transport = HttpWebhookTransport::new(&WebhookConfig::default()).unwrap();
        let response = transport.post(&request(url)).await.unwrap();
        assert_eq!(response.status, 500);
        assert!(!response.is_success());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hooks", listener.local_addr().unwrap());
        drop(listener);

        let transport = HttpWebhookTransport::new(&WebhookConfig::default()).unwrap();
        assert!(matches!(
            transport.post(&request(url)).await,
            Err(GatewayError::Webhook(_))
        ));
    }
}
