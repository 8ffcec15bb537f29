use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base URI for tunnel envelope schemas.
pub const SCHEMA_BASE: &str = "https://proxy.brickchain.com/v1";

/// `ws-message` frame code for text payloads.
pub const TEXT_FRAME: i32 = 1;

/// `ws-message` frame code for binary payloads.
pub const BINARY_FRAME: i32 = 2;

/// One message on the tunnel.
///
/// Every application-level entity — HTTP calls, WebSocket sessions, the
/// registration handshake, liveness — is multiplexed over the single duplex
/// connection as a JSON document tagged with its schema URI. The correlation
/// `@id` ties responses, `ws-message`, and `ws-teardown` frames back to the
/// request that opened them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum Envelope {
    #[serde(rename = "https://proxy.brickchain.com/v1/registration-request.json")]
    RegistrationRequest {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
        #[serde(rename = "mandateToken")]
        mandate_token: String,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/registration-response.json")]
    RegistrationResponse {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
        #[serde(rename = "keyID", default)]
        key_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hostname: Option<String>,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/ping.json")]
    Ping {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/http-request.json")]
    HttpRequest {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
        method: String,
        url: String,
        #[serde(default)]
        query: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        /// base64 standard-encoded request body.
        #[serde(default)]
        body: String,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/http-response.json")]
    HttpResponse {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
        status: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(rename = "contentType", default)]
        content_type: String,
        /// base64 standard-encoded response body.
        #[serde(default)]
        body: String,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/ws-request.json")]
    WsRequest {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
        url: String,
        #[serde(default)]
        query: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/ws-response.json")]
    WsResponse {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/ws-message.json")]
    WsMessage {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
        #[serde(rename = "messageType")]
        message_type: i32,
        /// Raw frame payload; never base64-encoded.
        #[serde(default)]
        body: String,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/ws-teardown.json")]
    WsTeardown {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "https://proxy.brickchain.com/v1/disconnect.json")]
    Disconnect {
        #[serde(rename = "@id")]
        id: String,
        #[serde(rename = "@timestamp")]
        timestamp: DateTime<Utc>,
    },
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Envelope {
    /// The correlation id.
    pub fn id(&self) -> &str {
        match self {
            Envelope::RegistrationRequest { id, .. }
            | Envelope::RegistrationResponse { id, .. }
            | Envelope::Ping { id, .. }
            | Envelope::HttpRequest { id, .. }
            | Envelope::HttpResponse { id, .. }
            | Envelope::WsRequest { id, .. }
            | Envelope::WsResponse { id, .. }
            | Envelope::WsMessage { id, .. }
            | Envelope::WsTeardown { id, .. }
            | Envelope::Disconnect { id, .. } => id,
        }
    }

    pub fn registration_request(mandate_token: String) -> Self {
        Envelope::RegistrationRequest {
            id: new_id(),
            timestamp: Utc::now(),
            mandate_token,
        }
    }

    pub fn http_response(
        id: impl Into<String>,
        status: u16,
        headers: HashMap<String, String>,
        content_type: String,
        body: String,
    ) -> Self {
        Envelope::HttpResponse {
            id: id.into(),
            timestamp: Utc::now(),
            status,
            headers,
            content_type,
            body,
        }
    }

    pub fn ws_response_ok(id: impl Into<String>) -> Self {
        Envelope::WsResponse {
            id: id.into(),
            timestamp: Utc::now(),
            ok: true,
            error: None,
        }
    }

    pub fn ws_response_error(id: impl Into<String>, error: impl Into<String>) -> Self {
        Envelope::WsResponse {
            id: id.into(),
            timestamp: Utc::now(),
            ok: false,
            error: Some(error.into()),
        }
    }

    pub fn ws_message(id: impl Into<String>, message_type: i32, body: String) -> Self {
        Envelope::WsMessage {
            id: id.into(),
            timestamp: Utc::now(),
            message_type,
            body,
        }
    }

    pub fn ws_teardown(id: impl Into<String>) -> Self {
        Envelope::WsTeardown {
            id: id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn disconnect() -> Self {
        Envelope::Disconnect {
            id: new_id(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(envelope: &Envelope) -> Envelope {
        let json = serde_json::to_string(envelope).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn every_variant_roundtrips() {
        let envelopes = vec![
            Envelope::registration_request("a.b.c".to_string()),
            Envelope::RegistrationResponse {
                id: new_id(),
                timestamp: Utc::now(),
                key_id: "key-1".to_string(),
                hostname: Some("abc.proxy.example.com".to_string()),
            },
            Envelope::Ping {
                id: new_id(),
                timestamp: Utc::now(),
            },
            Envelope::HttpRequest {
                id: "r1".to_string(),
                timestamp: Utc::now(),
                method: "POST".to_string(),
                url: "/api/states".to_string(),
                query: "limit=5".to_string(),
                headers: HashMap::from([("Accept".to_string(), "application/json".to_string())]),
                body: "aGVsbG8=".to_string(),
            },
            Envelope::http_response(
                "r1",
                200,
                HashMap::from([("Content-Length".to_string(), "5".to_string())]),
                "application/json".to_string(),
                "aGVsbG8=".to_string(),
            ),
            Envelope::WsRequest {
                id: "w1".to_string(),
                timestamp: Utc::now(),
                url: "/api/websocket".to_string(),
                query: String::new(),
                headers: HashMap::new(),
            },
            Envelope::ws_response_ok("w1"),
            Envelope::ws_response_error("w1", "denied"),
            Envelope::ws_message("w1", TEXT_FRAME, "{\"type\":\"auth_ok\"}".to_string()),
            Envelope::ws_teardown("w1"),
            Envelope::disconnect(),
        ];

        for envelope in envelopes {
            assert_eq!(roundtrip(&envelope), envelope);
        }
    }

    #[test]
    fn type_tag_is_the_schema_uri() {
        let json = serde_json::to_value(Envelope::ws_teardown("w1")).unwrap();
        assert_eq!(
            json["@type"],
            "https://proxy.brickchain.com/v1/ws-teardown.json"
        );
        assert_eq!(json["@id"], "w1");
        assert!(json.get("@timestamp").is_some());
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"@type":"https://proxy.brickchain.com/v1/unheard-of.json","@id":"x","@timestamp":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{
            "@type": "https://proxy.brickchain.com/v1/http-request.json",
            "@id": "r9",
            "@timestamp": "2024-01-01T00:00:00Z",
            "method": "GET",
            "url": "/_ping"
        }"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        match envelope {
            Envelope::HttpRequest {
                query,
                headers,
                body,
                ..
            } => {
                assert!(query.is_empty());
                assert!(headers.is_empty());
                assert!(body.is_empty());
            }
            other => panic!("expected HttpRequest, got {other:?}"),
        }
    }
}
