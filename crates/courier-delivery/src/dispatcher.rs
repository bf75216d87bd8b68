//! Callback delivery loop.
//!
//! The dispatcher owns a request from `callback_pending` to its terminal
//! callback status. It reports outcomes only by updating the status record;
//! nothing is returned to the caller and no error escapes. Once cancelled, no
//! further attempt starts and the record is left in `callback_pending`.

use std::sync::Arc;

use courier_core::{
    CallbackPayload, Clock, RequestId, RequestRecord, RequestStatus, StatusStore, WorkResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::CallbackClient,
    error::DeliveryError,
    retry::RetryPolicy,
    ssrf::SsrfValidator,
};

/// Validates callback URLs and delivers results with retries.
pub struct CallbackDispatcher {
    store: Arc<dyn StatusStore>,
    client: Arc<CallbackClient>,
    validator: SsrfValidator,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl CallbackDispatcher {
    /// Creates a dispatcher.
    pub fn new(
        store: Arc<dyn StatusStore>,
        client: Arc<CallbackClient>,
        validator: SsrfValidator,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            client,
            validator,
            policy,
            clock,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Stops retrying once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Returns the retry policy in force.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delivers `result` to `callback_url`, recording the outcome.
    ///
    /// Blocked URLs fail immediately with no attempt. Otherwise up to
    /// `max_retries + 1` attempts are made; each failure increments
    /// `callback_attempts` and sets `callback_last_error`. A 2xx on any
    /// attempt ends the loop with `callback_success`. Cancellation between
    /// attempts abandons the delivery without touching the record.
    pub async fn deliver(&self, request_id: &RequestId, callback_url: &str, result: WorkResult) {
        if let Err(rejection) = self.validator.validate(callback_url).await {
            warn!(
                request_id = %request_id,
                url = callback_url,
                error = %rejection,
                "callback URL blocked by security policy"
            );
            let message = rejection.record_message();
            self.update_record(request_id, |record| {
                record.fail(RequestStatus::CallbackFailed, message);
            })
            .await;
            return;
        }

        let payload = CallbackPayload::success(result, self.clock.now_utc());
        let total_attempts = self.policy.total_attempts();
        let mut last_error = DeliveryError::network("no attempt made");

        for attempt in 0..total_attempts {
            if self.cancellation_token.is_cancelled() {
                info!(
                    request_id = %request_id,
                    attempt = attempt + 1,
                    "callback delivery abandoned"
                );
                return;
            }

            let outcome = self
                .client
                .send(callback_url, request_id, attempt + 1, &payload)
                .await
                .and_then(|response| {
                    if response.is_success() {
                        Ok(response)
                    } else {
                        Err(DeliveryError::http_status(response.status_code))
                    }
                });

            match outcome {
                Ok(response) => {
                    info!(
                        request_id = %request_id,
                        attempt = attempt + 1,
                        status = response.status_code,
                        "callback delivered"
                    );
                    self.update_record(request_id, |record| {
                        record.status = RequestStatus::CallbackSuccess;
                    })
                    .await;
                    return;
                },
                Err(failure) => {
                    let message = failure.record_message();
                    warn!(
                        request_id = %request_id,
                        attempt = attempt + 1,
                        error = %message,
                        "callback attempt failed"
                    );
                    self.update_record(request_id, |record| {
                        record.callback_attempts = record.callback_attempts.saturating_add(1);
                        record.callback_last_error = Some(message);
                    })
                    .await;
                    last_error = failure;
                },
            }

            if attempt + 1 < total_attempts {
                let delay = self.policy.delay_for(attempt);
                debug!(
                    request_id = %request_id,
                    delay_ms = delay.as_millis(),
                    "waiting before next callback attempt"
                );
                tokio::select! {
                    biased;
                    () = self.cancellation_token.cancelled() => {
                        info!(
                            request_id = %request_id,
                            "callback delivery abandoned during backoff"
                        );
                        return;
                    },
                    () = self.clock.sleep(delay) => {},
                }
            }
        }

        let exhausted = DeliveryError::RetriesExhausted {
            attempts: total_attempts,
            last_error: last_error.record_message(),
        };
        error!(request_id = %request_id, error = %exhausted, "callback permanently failed");
        let message = exhausted.record_message();
        self.update_record(request_id, |record| {
            record.fail(RequestStatus::CallbackFailed, message);
        })
        .await;
    }

    async fn update_record<F>(&self, request_id: &RequestId, mutate: F)
    where
        F: FnOnce(&mut RequestRecord),
    {
        update_record(self.store.as_ref(), request_id, mutate).await;
    }
}

/// Loads, mutates, and saves a record. Store failures are logged.
pub(crate) async fn update_record<F>(store: &dyn StatusStore, request_id: &RequestId, mutate: F)
where
    F: FnOnce(&mut RequestRecord),
{
    let mut record = match store.get(request_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(request_id = %request_id, "request record missing, update skipped");
            return;
        },
        Err(e) => {
            error!(request_id = %request_id, error = %e, "failed to load request record");
            return;
        },
    };

    let previous = record.status;
    mutate(&mut record);
    if previous != record.status && !previous.can_transition_to(record.status) {
        warn!(
            request_id = %request_id,
            from = %previous,
            to = %record.status,
            "unexpected status transition"
        );
    }

    if let Err(e) = store.save(&record).await {
        error!(request_id = %request_id, error = %e, "failed to save request record");
    }
}
