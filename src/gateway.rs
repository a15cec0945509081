use std::future::Future;
use std::time::Instant;

use serde::de::DeserializeOwned;
use tokio::time::timeout;
use tracing::{Instrument, debug, info_span, warn};

use crate::GatewayResult;
use crate::body::read_all_body;
use crate::error::GatewayError;
use crate::executor::RequestExecutor;
use crate::policy::{GatewayPolicy, PolicyOverrides, ResolvedPolicy};
use crate::request::RequestDescriptor;
use crate::stream::JsonSequence;
use crate::util::{remaining_budget, truncate_body};

/// The single chokepoint for outbound HTTP calls.
///
/// Every call runs the same pipeline: issue the exchange, classify the status
/// code, decode the JSON body, all bounded by one aggregate deadline and
/// retried uniformly on failure. Calls are fully independent; the handle is
/// cheap to clone and holds no per-call state.
#[derive(Clone, Debug, Default)]
pub struct Gateway {
    executor: RequestExecutor,
    defaults: GatewayPolicy,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway with non-default policy defaults. Per-call overrides still
    /// take precedence.
    pub fn with_policy(defaults: GatewayPolicy) -> Self {
        Self {
            executor: RequestExecutor,
            defaults,
        }
    }

    /// Issues the exchange and decodes the body as exactly one `T`, under
    /// the default policy (5s timeout, 3 retries).
    pub async fn execute_single<T>(&self, descriptor: &RequestDescriptor) -> GatewayResult<T>
    where
        T: DeserializeOwned,
    {
        self.execute_single_with(descriptor, PolicyOverrides::new())
            .await
    }

    /// Variant of [`execute_single`](Self::execute_single) accepting per-call
    /// timeout and retry overrides.
    pub async fn execute_single_with<T>(
        &self,
        descriptor: &RequestDescriptor,
        overrides: PolicyOverrides,
    ) -> GatewayResult<T>
    where
        T: DeserializeOwned,
    {
        let policy = overrides.resolve(&self.defaults);
        let deadline = Instant::now() + policy.timeout;
        self.run_attempts(descriptor, policy, deadline, "single", |_attempt| {
            self.attempt_single::<T>(descriptor)
        })
        .await
    }

    /// Issues the exchange and decodes the body as a lazy sequence of `T`,
    /// emitted incrementally, under the default policy.
    pub async fn execute_sequence<T>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> GatewayResult<JsonSequence<T>>
    where
        T: DeserializeOwned,
    {
        self.execute_sequence_with(descriptor, PolicyOverrides::new())
            .await
    }

    /// Variant of [`execute_sequence`](Self::execute_sequence) accepting
    /// per-call timeout and retry overrides.
    pub async fn execute_sequence_with<T>(
        &self,
        descriptor: &RequestDescriptor,
        overrides: PolicyOverrides,
    ) -> GatewayResult<JsonSequence<T>>
    where
        T: DeserializeOwned,
    {
        let policy = overrides.resolve(&self.defaults);
        let deadline = Instant::now() + policy.timeout;
        let budget_ms = policy.timeout.as_millis();
        let max_attempts = policy.max_attempts();
        self.run_attempts(descriptor, policy, deadline, "sequence", |attempt| {
            self.attempt_sequence::<T>(descriptor, deadline, budget_ms, max_attempts - attempt)
        })
        .await
    }

    /// The shared policy loop: one aggregate deadline fixed at call start
    /// bounds every attempt, and each failed attempt is retried immediately
    /// until the budget of `retries + 1` attempts is spent. Single and
    /// sequence modes differ only in the attempt future they pass in.
    async fn run_attempts<T, F, Fut>(
        &self,
        descriptor: &RequestDescriptor,
        policy: ResolvedPolicy,
        deadline: Instant,
        mode: &'static str,
        attempt_fn: F,
    ) -> GatewayResult<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let budget_ms = policy.timeout.as_millis();
        let max_attempts = policy.max_attempts();

        for attempt in 1..=max_attempts {
            let span = info_span!(
                "outgate.call",
                mode,
                method = %descriptor.method(),
                uri = %descriptor.url(),
                attempt,
                max_attempts
            );

            let Some(remaining) = remaining_budget(deadline) else {
                return Err(self.timeout_error(descriptor, budget_ms));
            };

            match timeout(remaining, attempt_fn(attempt).instrument(span)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => {
                    if attempt < max_attempts {
                        warn!(
                            mode,
                            method = %descriptor.method(),
                            uri = %descriptor.url(),
                            attempt,
                            max_attempts,
                            code = error.code().as_str(),
                            error = %error,
                            "retrying call after failure"
                        );
                        continue;
                    }
                    return Err(error);
                }
                // Aggregate budget spent mid-attempt: cancel the in-flight
                // exchange (dropped with the timed-out future) and fail the
                // call even if retry budget remains.
                Err(_) => return Err(self.timeout_error(descriptor, budget_ms)),
            }
        }

        Err(self.timeout_error(descriptor, budget_ms))
    }

    async fn attempt_single<T>(&self, descriptor: &RequestDescriptor) -> GatewayResult<T>
    where
        T: DeserializeOwned,
    {
        debug!("sending request");
        let body = self
            .executor
            .open_exchange(
                descriptor.url(),
                descriptor.body().cloned(),
                descriptor.method().clone(),
            )
            .await?;
        let body = read_all_body(body).await?;

        debug!("decoding response");
        serde_json::from_slice(&body).map_err(|source| GatewayError::Decode {
            source,
            body: truncate_body(&body),
        })
    }

    async fn attempt_sequence<T>(
        &self,
        descriptor: &RequestDescriptor,
        deadline: Instant,
        budget_ms: u128,
        retries_left: u32,
    ) -> GatewayResult<JsonSequence<T>>
    where
        T: DeserializeOwned,
    {
        debug!("sending sequence request");
        let body = self
            .executor
            .open_exchange(
                descriptor.url(),
                descriptor.body().cloned(),
                descriptor.method().clone(),
            )
            .await?;

        debug!("streaming response elements");
        Ok(JsonSequence::new(
            self.executor,
            descriptor,
            body,
            deadline,
            budget_ms,
            retries_left,
        ))
    }

    fn timeout_error(&self, descriptor: &RequestDescriptor, budget_ms: u128) -> GatewayError {
        GatewayError::Timeout {
            budget_ms,
            method: descriptor.method().clone(),
            uri: descriptor.url().to_owned(),
        }
    }
}
