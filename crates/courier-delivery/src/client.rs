//! HTTP client for callback delivery.
//!
//! Posts JSON with a per-attempt timeout, never follows redirects, and caps
//! concurrent outbound requests with a semaphore shared by all workers.

use std::{sync::Arc, time::Duration};

use courier_core::{CallbackPayload, RequestId};
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{DeliveryError, Result},
    ssrf::{PublicAddressResolver, SsrfPolicy},
};

/// Header carrying the request id on every callback.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Header carrying the 1-based attempt number.
pub const ATTEMPT_HEADER: &str = "X-Attempt";

/// Configuration for the callback client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a single attempt, connect through body.
    pub timeout: Duration,
    /// User agent sent with callbacks.
    pub user_agent: String,
    /// Maximum concurrent outbound requests.
    pub max_connections: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(crate::DEFAULT_CALLBACK_TIMEOUT_MS),
            user_agent: concat!("courier/", env!("CARGO_PKG_VERSION")).to_string(),
            max_connections: crate::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Outcome of one HTTP exchange. Any status code counts as a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Time from send to response headers.
    pub duration: Duration,
}

impl CallbackResponse {
    /// Whether the receiver acknowledged with a 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Shared outbound client for callbacks.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    client: reqwest::Client,
    config: ClientConfig,
    permits: Arc<Semaphore>,
}

impl CallbackClient {
    /// Builds a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the connection cap is zero
    /// or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::build(config, false)
    }

    /// Builds a client whose connections honour `policy`.
    ///
    /// With private-IP blocking on, host names are resolved through
    /// `PublicAddressResolver`, so non-public addresses are never dialled.
    ///
    /// # Errors
    ///
    /// Same as [`CallbackClient::new`].
    pub fn for_policy(config: ClientConfig, policy: &SsrfPolicy) -> Result<Self> {
        Self::build(config, policy.block_private_ips)
    }

    fn build(config: ClientConfig, public_only: bool) -> Result<Self> {
        if config.max_connections == 0 {
            return Err(DeliveryError::configuration("max_connections must be at least 1"));
        }

        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(Policy::none())
            .pool_max_idle_per_host(config.max_connections);
        if public_only {
            builder = builder.dns_resolver(Arc::new(PublicAddressResolver));
        }

        let client = builder.build().map_err(|e| {
            DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
        })?;

        let permits = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self { client, config, permits })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Outbound requests that could start right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Rejects all further sends. In-flight sends finish normally.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Sends one callback attempt.
    ///
    /// `attempt` is 1-based and sent as `X-Attempt`.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the attempt exceeds the configured timeout
    /// - `Network` for connect, DNS, TLS, or I/O failures, or after `close`
    pub async fn send(
        &self,
        url: &str,
        request_id: &RequestId,
        attempt: u32,
        payload: &CallbackPayload,
    ) -> Result<CallbackResponse> {
        let span = info_span!("callback_delivery", request_id = %request_id, attempt, url);

        async move {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| DeliveryError::network("callback client is closed"))?;

            let started = std::time::Instant::now();
            let response = self
                .client
                .post(url)
                .header(REQUEST_ID_HEADER, request_id.as_str())
                .header(ATTEMPT_HEADER, attempt.to_string())
                .json(payload)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "callback request failed");
                    if e.is_timeout() {
                        DeliveryError::timeout(self.config.timeout)
                    } else {
                        DeliveryError::network(e.to_string())
                    }
                })?;

            let result = CallbackResponse {
                status_code: response.status().as_u16(),
                duration: started.elapsed(),
            };
            debug!(
                status = result.status_code,
                duration_ms = result.duration.as_millis(),
                "received callback response"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use courier_core::WorkResult;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn payload(id: &str) -> CallbackPayload {
        CallbackPayload::success(
            WorkResult {
                request_id: RequestId::from(id),
                input_hash: "in".into(),
                output_hash: "out".into(),
                iterations: 1,
                processing_time_ms: 0.1,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn sends_json_with_tracking_headers() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("X-Request-ID", "req-1"))
            .and(matchers::header("X-Attempt", "2"))
            .and(matchers::header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = CallbackClient::with_defaults().unwrap();
        let url = format!("{}/hook", server.uri());
        let response =
            client.send(&url, &RequestId::from("req-1"), 2, &payload("req-1")).await.unwrap();

        assert_eq!(response.status_code, 204);
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(matchers::path("/hook"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}/next", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(matchers::path("/next"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = CallbackClient::with_defaults().unwrap();
        let url = format!("{}/hook", server.uri());
        let response = client.send(&url, &RequestId::from("r"), 1, &payload("r")).await.unwrap();

        assert_eq!(response.status_code, 302);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn slow_receiver_times_out() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = CallbackClient::new(ClientConfig {
            timeout: Duration::from_millis(50),
            ..ClientConfig::default()
        })
        .unwrap();
        let error = client.send(&server.uri(), &RequestId::from("r"), 1, &payload("r")).await;

        assert!(matches!(error, Err(DeliveryError::Timeout { timeout_ms: 50 })));
    }

    #[tokio::test]
    async fn closed_client_refuses_to_send() {
        let client = CallbackClient::with_defaults().unwrap();
        client.close();

        let id = RequestId::from("r");
        let error = client.send("http://example.com", &id, 1, &payload("r")).await;
        assert!(matches!(error, Err(DeliveryError::Network { .. })));
    }

    #[tokio::test]
    async fn strict_policy_never_dials_names_resolving_to_loopback() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client =
            CallbackClient::for_policy(ClientConfig::default(), &SsrfPolicy::default()).unwrap();
        let url = format!("http://localhost:{}/hook", server.address().port());
        let error = client.send(&url, &RequestId::from("r"), 1, &payload("r")).await;

        assert!(matches!(error, Err(DeliveryError::Network { .. })));
    }

    #[tokio::test]
    async fn permissive_policy_resolves_names_normally() {
        let server = MockServer::start().await;
        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            CallbackClient::for_policy(ClientConfig::default(), &SsrfPolicy::permissive()).unwrap();
        let url = format!("http://localhost:{}/hook", server.address().port());
        let response = client.send(&url, &RequestId::from("r"), 1, &payload("r")).await.unwrap();

        assert!(response.is_success());
    }

    #[test]
    fn zero_connection_cap_is_rejected() {
        let config = ClientConfig { max_connections: 0, ..ClientConfig::default() };
        assert!(matches!(CallbackClient::new(config), Err(DeliveryError::Configuration { .. })));
    }
}
