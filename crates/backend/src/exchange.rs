//! reqwest-backed [`HttpExchange`].

use async_trait::async_trait;
use gateway::{ExchangeRequest, ExchangeResponse, ExchangeResult, HttpExchange, TransportError};
use reqwest::header::{CONNECTION, CONTENT_TYPE};
use reqwest::Client;

use crate::BackendError;

/// Sends each exchange as a single POST on a fresh connection.
///
/// Holds two clients, one verifying certificates and one that does not; the
/// per-service `ssl_insecure` flag picks between them.
#[derive(Debug, Clone)]
pub struct ReqwestExchange {
    verified: Client,
    insecure: Client,
}

impl ReqwestExchange {
    /// Builds both clients.
    ///
    /// # Errors
    ///
    /// [`BackendError::ClientBuild`] if reqwest cannot initialise a client.
    pub fn new() -> Result<Self, BackendError> {
        Ok(Self {
            verified: build_client(false)?,
            insecure: build_client(true)?,
        })
    }

    fn client(&self, ssl_insecure: bool) -> &Client {
        if ssl_insecure {
            &self.insecure
        } else {
            &self.verified
        }
    }
}

fn build_client(ssl_insecure: bool) -> Result<Client, BackendError> {
    Client::builder()
        .pool_max_idle_per_host(0)
        .danger_accept_invalid_certs(ssl_insecure)
        .build()
        .map_err(|e| BackendError::ClientBuild {
            ssl_insecure,
            message: e.to_string(),
        })
}

fn classify_send_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Network(error.to_string())
    }
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn post(&self, request: ExchangeRequest) -> ExchangeResult {
        let mut response = self
            .client(request.ssl_insecure)
            .post(&request.url)
            .header(CONTENT_TYPE, request.content_type.as_str())
            .header(CONNECTION, "close")
            .timeout(request.timeout)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(url = %request.url, error = %e, "POST failed before a response arrived");
                classify_send_error(&e)
            })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = read_capped(&mut response, request.max_body_size).await?;

        Ok(ExchangeResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify_body_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::BodyRead(error.to_string())
    }
}

/// Reads at most `max + 1` bytes of the body.
///
/// A body past the limit is cut there and left for
/// [`ExchangeResponse::body_within`] to reject, so an oversized response never
/// sits in memory whole.
async fn read_capped(response: &mut reqwest::Response, max: usize) -> Result<Vec<u8>, TransportError> {
    let limit = max.saturating_add(1);
    if let Some(length) = response.content_length() {
        if length > max as u64 {
            tracing::warn!(content_length = length, max, "Response body exceeds the size limit");
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| classify_body_error(&e))? {
        let room = limit - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gateway::ContentType;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Accepts one connection, captures the raw request, and writes `response`.
    async fn serve_once(response: &'static str, delay: Duration) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            tokio::time::sleep(delay).await;
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
            request
        });
        (url, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0_u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let lower = line.to_ascii_lowercase();
                        lower
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if raw.len() >= end + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).to_string()
    }

    fn request(url: String, timeout: Duration) -> ExchangeRequest {
        ExchangeRequest {
            url,
            body: br#"{"T_ACCOUNT":"ACC1"}"#.to_vec(),
            content_type: ContentType::Json,
            timeout,
            ssl_insecure: false,
            max_body_size: 1024,
        }
    }

    #[tokio::test]
    async fn test_post_returns_status_headers_and_body() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello",
            Duration::ZERO,
        )
        .await;
        let exchange = ReqwestExchange::new().unwrap();

        let response = exchange.post(request(url, Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
        assert!(response
            .headers
            .iter()
            .any(|(name, value)| name == "content-type" && value == "text/plain"));

        let sent = server.await.unwrap().to_ascii_lowercase();
        assert!(sent.starts_with("post /api http/1.1"));
        assert!(sent.contains("content-type: application/json"));
        assert!(sent.contains("connection: close"));
        assert!(sent.ends_with(r#"{"t_account":"acc1"}"#));
    }

    #[tokio::test]
    async fn test_oversized_body_is_cut_one_byte_past_the_limit() {
        let (url, _server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 20\r\n\r\n01234567890123456789",
            Duration::ZERO,
        )
        .await;
        let exchange = ReqwestExchange::new().unwrap();
        let mut oversized = request(url, Duration::from_secs(5));
        oversized.max_body_size = 8;

        let response = exchange.post(oversized).await.unwrap();
        assert_eq!(response.body, b"012345678");
        assert!(matches!(
            response.body_within(8),
            Err(gateway::FormatError::TooLarge { size: 9, max: 8 })
        ));
    }

    #[tokio::test]
    async fn test_non_200_status_is_a_response_not_an_error() {
        let (url, _server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 2\r\n\r\n{}",
            Duration::ZERO,
        )
        .await;
        let exchange = ReqwestExchange::new().unwrap();

        let response = exchange.post(request(url, Duration::from_secs(5))).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.body, b"{}");
    }

    #[tokio::test]
    async fn test_slow_backend_times_out() {
        let (url, _server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n",
            Duration::from_secs(2),
        )
        .await;
        let exchange = ReqwestExchange::new().unwrap();

        let err = exchange
            .post(request(url, Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api", listener.local_addr().unwrap());
        drop(listener);
        let exchange = ReqwestExchange::new().unwrap();

        let err = exchange.post(request(url, Duration::from_secs(5))).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_truncated_body_is_a_body_read_error() {
        let (url, _server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort",
            Duration::ZERO,
        )
        .await;
        let exchange = ReqwestExchange::new().unwrap();

        let err = exchange.post(request(url, Duration::from_secs(5))).await.unwrap_err();
        assert!(matches!(err, TransportError::BodyRead(_)), "{err:?}");
    }
}
