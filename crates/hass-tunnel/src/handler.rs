use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use realm_auth::MandateVerifier;
use tracing::{debug, error};
use tunnel_client::{
    HttpReply, HttpTunnelRequest, LocalFrameAction, LocalStream, OriginBridge,
};

use crate::origin::LocalOriginClient;

/// Health-check path answered before any mandate check.
const PING_PATH: &str = "/_ping";

/// The [`OriginBridge`] implementation: mandate verification at the edge,
/// then forwarding to the local Home Assistant origin.
pub struct OriginHandler {
    verifier: MandateVerifier,
    origin: LocalOriginClient,
}

impl OriginHandler {
    pub fn new(verifier: MandateVerifier, origin: LocalOriginClient) -> Self {
        Self { verifier, origin }
    }
}

#[async_trait]
impl OriginBridge for OriginHandler {
    async fn serve_http(&self, request: &HttpTunnelRequest) -> HttpReply {
        if request.url == PING_PATH {
            return HttpReply::text(200, "");
        }

        // The proxy records the public host it served in X-Forwarded-Host.
        let forwarded_host = request
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("x-forwarded-host"))
            .map(|(_, value)| value.as_str())
            .unwrap_or("-");

        debug!(
            method = %request.method,
            url = %request.url,
            host = forwarded_host,
            "tunneled request"
        );

        if let Err(reason) = self.verifier.verify(&request.headers) {
            debug!(%reason, "unauthorized request");
            return HttpReply::text(401, "Unauthorized");
        }

        match self.origin.forward_http(request).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, url = %request.url, "local forward failed");
                HttpReply::text(502, e.to_string())
            }
        }
    }

    async fn authorize_ws(
        &self,
        headers: &HashMap<String, String>,
    ) -> Result<DateTime<Utc>, String> {
        self.verifier
            .verify(headers)
            .map(|grant| grant.valid_until)
            .map_err(|reason| reason.to_string())
    }

    async fn dial_ws(
        &self,
        url: &str,
        query: &str,
        headers: &HashMap<String, String>,
    ) -> Result<LocalStream, String> {
        self.origin
            .dial_ws(url, query, headers)
            .await
            .map_err(|e| e.to_string())
    }

    fn inspect_local_frame(&self, first: bool, text: &str) -> LocalFrameAction {
        if first {
            self.origin.intercept_first_frame(text)
        } else {
            LocalFrameAction::Forward(text.to_string())
        }
    }
}
