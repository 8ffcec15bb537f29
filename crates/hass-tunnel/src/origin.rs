use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, HOST};
use thiserror::Error;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::debug;
use tunnel_client::{HttpReply, HttpTunnelRequest, LocalFrameAction, LocalStream};

/// Local origin calls time out after this long.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(15);

/// Hop-by-hop upgrade headers that must not be replayed on the local dial.
const HOP_BY_HOP: [&str; 5] = [
    "connection",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
];

/// Errors talking to the local origin. Per-request only; they become
/// 502-class replies or `ws-response` errors, never process failures.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("invalid method {0:?}")]
    Method(String),

    #[error("request to local origin failed: {0}")]
    Forward(#[from] reqwest::Error),

    #[error("failed to dial local websocket: {0}")]
    Dial(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Client for the one fixed local origin (the Home Assistant API).
///
/// Remote callers prove authority with a mandate; this client transparently
/// substitutes the origin's own shared-secret credential so that secret
/// never leaves the house.
#[derive(Debug, Clone)]
pub struct LocalOriginClient {
    base_url: String,
    local_host: String,
    hassio_token: String,
    http: reqwest::Client,
}

impl LocalOriginClient {
    pub fn new(
        base_url: impl Into<String>,
        local_host: impl Into<String>,
        hassio_token: impl Into<String>,
    ) -> Result<Self, OriginError> {
        let http = reqwest::Client::builder()
            .timeout(FORWARD_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.into(),
            local_host: local_host.into(),
            hassio_token: hassio_token.into(),
            http,
        })
    }

    /// Replay one tunneled HTTP request against the local origin and return
    /// the response for re-envelopment.
    ///
    /// All headers are copied verbatim except `Host`, which is rewritten to
    /// the configured local host; `X-HA-ACCESS` carries the origin token
    /// when one is configured.
    pub async fn forward_http(&self, request: &HttpTunnelRequest) -> Result<HttpReply, OriginError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| OriginError::Method(request.method.clone()))?;

        let mut url = format!("{}{}", self.base_url, request.url);
        if !request.query.is_empty() {
            url.push('?');
            url.push_str(&request.query);
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                debug!(header = %name, "skipping unrepresentable header");
                continue;
            };
            headers.insert(name, value);
        }

        if let Ok(host) = HeaderValue::from_str(&self.local_host) {
            headers.insert(HOST, host);
        }
        if !self.hassio_token.is_empty() {
            if let Ok(token) = HeaderValue::from_str(&self.hassio_token) {
                headers.insert("X-HA-ACCESS", token);
            }
        }

        let mut builder = self.http.request(method, &url).headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut reply_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                reply_headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        let body = response.bytes().await?.to_vec();

        Ok(HttpReply {
            status,
            headers: reply_headers,
            content_type,
            body,
        })
    }

    /// Open a WebSocket to the local origin for the given path, rewriting
    /// the scheme (`http` → `ws`, `https` → `wss`) and stripping the
    /// hop-by-hop upgrade headers before forwarding the rest.
    pub async fn dial_ws(
        &self,
        path: &str,
        query: &str,
        headers: &HashMap<String, String>,
    ) -> Result<LocalStream, OriginError> {
        use tokio_tungstenite::tungstenite::http;

        let url = self.local_ws_url(path, query);
        let mut request = url.into_client_request()?;

        for (name, value) in headers {
            let lower = name.to_ascii_lowercase();
            if lower == "host" || HOP_BY_HOP.contains(&lower.as_str()) {
                continue;
            }
            let (Ok(name), Ok(value)) = (
                http::HeaderName::from_bytes(name.as_bytes()),
                http::HeaderValue::from_str(value),
            ) else {
                debug!(header = %name, "skipping unrepresentable header");
                continue;
            };
            request.headers_mut().insert(name, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(stream)
    }

    fn local_ws_url(&self, path: &str, query: &str) -> String {
        let rest = self
            .base_url
            .strip_prefix("https://")
            .or_else(|| self.base_url.strip_prefix("http://"))
            .unwrap_or(&self.base_url);
        let scheme = if self.base_url.starts_with("https://") {
            "wss"
        } else {
            "ws"
        };

        let mut url = format!("{scheme}://{rest}{path}");
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Inspect the first frame the local origin sends on a new bridge.
    ///
    /// Home Assistant opens its WebSocket API with an `auth_required`
    /// challenge. The remote caller already proved authority with a
    /// mandate, so we answer the challenge locally with the origin token
    /// and tell the remote the handshake succeeded — the caller never
    /// learns the local secret. Everything else passes through verbatim.
    pub fn intercept_first_frame(&self, text: &str) -> LocalFrameAction {
        let Ok(mut value) = serde_json::from_str::<serde_json::Value>(text) else {
            return LocalFrameAction::Forward(text.to_string());
        };

        if value.get("type").and_then(|t| t.as_str()) != Some("auth_required") {
            return LocalFrameAction::Forward(text.to_string());
        }

        let to_local = serde_json::json!({
            "type": "auth",
            "api_password": self.hassio_token,
        });

        value["type"] = serde_json::Value::String("auth_ok".to_string());

        LocalFrameAction::Exchange {
            to_local: to_local.to_string(),
            to_remote: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> LocalOriginClient {
        LocalOriginClient::new(base_url, "hassio", "xyz").unwrap()
    }

    fn tunnel_request(method: &str, url: &str) -> HttpTunnelRequest {
        HttpTunnelRequest {
            id: "r1".to_string(),
            method: method.to_string(),
            url: url.to_string(),
            query: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // local_ws_url
    // -----------------------------------------------------------------------

    #[test]
    fn ws_url_rewrites_http_scheme() {
        let client = client("http://hassio/homeassistant");
        assert_eq!(
            client.local_ws_url("/api/websocket", ""),
            "ws://hassio/homeassistant/api/websocket"
        );
    }

    #[test]
    fn ws_url_rewrites_https_scheme() {
        let client = client("https://192.168.1.10:8123");
        assert_eq!(
            client.local_ws_url("/api/websocket", "token=1"),
            "wss://192.168.1.10:8123/api/websocket?token=1"
        );
    }

    // -----------------------------------------------------------------------
    // intercept_first_frame
    // -----------------------------------------------------------------------

    #[test]
    fn auth_required_is_answered_locally() {
        let client = client("http://hassio/homeassistant");

        let action =
            client.intercept_first_frame(r#"{"type":"auth_required","ha_version":"2024.1"}"#);

        match action {
            LocalFrameAction::Exchange {
                to_local,
                to_remote,
            } => {
                let local: serde_json::Value = serde_json::from_str(&to_local).unwrap();
                assert_eq!(local["type"], "auth");
                assert_eq!(local["api_password"], "xyz");

                let remote: serde_json::Value = serde_json::from_str(&to_remote).unwrap();
                assert_eq!(remote["type"], "auth_ok");
                // The rest of the original payload is preserved.
                assert_eq!(remote["ha_version"], "2024.1");
            }
            LocalFrameAction::Forward(text) => panic!("expected interception, got {text}"),
        }
    }

    #[test]
    fn other_frames_pass_verbatim() {
        let client = client("http://hassio/homeassistant");
        let frame = r#"{"type":"result","id":5,"success":true}"#;

        match client.intercept_first_frame(frame) {
            LocalFrameAction::Forward(text) => assert_eq!(text, frame),
            LocalFrameAction::Exchange { .. } => panic!("unexpected interception"),
        }
    }

    #[test]
    fn non_json_frames_pass_verbatim() {
        let client = client("http://hassio/homeassistant");

        match client.intercept_first_frame("plainly not json") {
            LocalFrameAction::Forward(text) => assert_eq!(text, "plainly not json"),
            LocalFrameAction::Exchange { .. } => panic!("unexpected interception"),
        }
    }

    // -----------------------------------------------------------------------
    // forward_http
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn forward_injects_host_and_access_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/states"))
            .and(header("Host", "hassio"))
            .and(header("X-HA-ACCESS", "xyz"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(b"[]".to_vec(), "application/json"),
            )
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let reply = client
            .forward_http(&tunnel_request("GET", "/api/states"))
            .await
            .unwrap();

        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, b"[]");
        assert_eq!(reply.content_type, "application/json");
    }

    #[tokio::test]
    async fn forward_preserves_method_body_and_query() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/services/light/turn_on"))
            .and(query_param("cached", "false"))
            .and(body_string(r#"{"entity_id":"light.kitchen"}"#))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let mut request = tunnel_request("POST", "/api/services/light/turn_on");
        request.query = "cached=false".to_string();
        request.body = br#"{"entity_id":"light.kitchen"}"#.to_vec();

        let reply = client.forward_http(&request).await.unwrap();
        assert_eq!(reply.status, 201);
    }

    #[tokio::test]
    async fn origin_status_is_mirrored_not_errored() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let reply = client
            .forward_http(&tunnel_request("GET", "/missing"))
            .await
            .unwrap();

        assert_eq!(reply.status, 404);
        assert_eq!(reply.body, b"not found");
    }

    #[tokio::test]
    async fn unreachable_origin_is_an_error() {
        // Nothing listens here.
        let client = client("http://127.0.0.1:1");
        let result = client.forward_http(&tunnel_request("GET", "/api/states")).await;
        assert!(matches!(result, Err(OriginError::Forward(_))));
    }
}
