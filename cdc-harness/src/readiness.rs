//! Bounded-retry readiness checks for every collaborator of a run.
//!
//! A [`ReadinessCheck`] performs one lightweight probe of a collaborator. The gate,
//! [`wait_ready`], retries it at a fixed interval and reports [`Readiness::Unready`] with the
//! last error once the attempts are exhausted instead of failing the process.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use cdc_config::shared::ReadinessConfig;
use cdc_mysql::version::{MYSQL_5_7, meets_version};
use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clients::{SourceClient, TargetClient};
use crate::error::{ErrorKind, HarnessError, HarnessResult};
use crate::metrics::{CDC_READINESS_ATTEMPTS_TOTAL, ENDPOINT_LABEL, OUTCOME_LABEL};
use crate::{bail, harness_error};

/// A single reachability probe of a collaborator.
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Kind reported when an attempt does not finish in time.
    fn unreachable_kind(&self) -> ErrorKind {
        ErrorKind::PipelineUnreachable
    }

    async fn check(&self) -> HarnessResult<()>;
}

/// Liveness query against the source, logging the server version.
pub struct SourceLiveness<S> {
    source: S,
}

impl<S> SourceLiveness<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: SourceClient> ReadinessCheck for SourceLiveness<S> {
    fn name(&self) -> &str {
        "source"
    }

    fn unreachable_kind(&self) -> ErrorKind {
        ErrorKind::SourceConnectionFailed
    }

    async fn check(&self) -> HarnessResult<()> {
        self.source.ping().await?;

        let version = self.source.server_version().await?;
        if meets_version(version, MYSQL_5_7) {
            debug!(version = ?version, "source server version");
        } else {
            warn!(version = ?version, "source server is older than 5.7 or reports an unknown version");
        }

        Ok(())
    }
}

/// Liveness query against the target front end.
pub struct TargetLiveness<T> {
    target: T,
}

impl<T> TargetLiveness<T> {
    pub fn new(target: T) -> Self {
        Self { target }
    }
}

#[async_trait]
impl<T: TargetClient> ReadinessCheck for TargetLiveness<T> {
    fn name(&self) -> &str {
        "target"
    }

    fn unreachable_kind(&self) -> ErrorKind {
        ErrorKind::TargetConnectionFailed
    }

    async fn check(&self) -> HarnessResult<()> {
        self.target.ping().await
    }
}

/// Waits for at least one storage node to register with the target front end.
pub struct TargetBackends<T> {
    target: T,
}

impl<T> TargetBackends<T> {
    pub fn new(target: T) -> Self {
        Self { target }
    }
}

#[async_trait]
impl<T: TargetClient> ReadinessCheck for TargetBackends<T> {
    fn name(&self) -> &str {
        "target-backends"
    }

    fn unreachable_kind(&self) -> ErrorKind {
        ErrorKind::TargetConnectionFailed
    }

    async fn check(&self) -> HarnessResult<()> {
        let alive = self.target.alive_backends().await?;
        if alive == 0 {
            bail!(
                ErrorKind::TargetConnectionFailed,
                "Target has no alive backend",
                "SHOW BACKENDS reports no node with Alive = true"
            );
        }

        Ok(())
    }
}

/// HTTP liveness endpoint of the pipeline control plane.
pub struct PipelineHealth {
    client: reqwest::Client,
    url: String,
}

impl PipelineHealth {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReadinessCheck for PipelineHealth {
    fn name(&self) -> &str {
        "pipeline"
    }

    async fn check(&self) -> HarnessResult<()> {
        self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Readiness check built from a closure.
pub struct PredicateCheck<F> {
    name: String,
    predicate: F,
}

impl<F, Fut> PredicateCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = HarnessResult<()>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

#[async_trait]
impl<F, Fut> ReadinessCheck for PredicateCheck<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = HarnessResult<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> HarnessResult<()> {
        (self.predicate)().await
    }
}

/// A collaborator together with its retry policy.
pub struct ServiceEndpoint {
    pub name: String,
    pub check: Box<dyn ReadinessCheck>,
    pub attempt_timeout: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl ServiceEndpoint {
    /// Creates an endpoint using the retry policy from the configuration.
    pub fn new(check: impl ReadinessCheck + 'static, config: &ReadinessConfig) -> Self {
        Self {
            name: check.name().to_string(),
            check: Box::new(check),
            attempt_timeout: config.attempt_timeout(),
            interval: config.interval(),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl fmt::Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("name", &self.name)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("interval", &self.interval)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Final state of a readiness wait.
#[derive(Debug, Clone)]
pub enum Readiness {
    Ready { attempts: u32, elapsed: Duration },
    Unready { attempts: u32, last_error: HarnessError },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Readiness of one named endpoint, as returned by [`wait_all_ready`].
#[derive(Debug, Clone)]
pub struct EndpointReadiness {
    pub name: String,
    pub readiness: Readiness,
}

#[derive(Serialize)]
struct EndpointStatus<'a> {
    name: &'a str,
    ready: bool,
    attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for EndpointReadiness {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let status = match &self.readiness {
            Readiness::Ready { attempts, elapsed } => EndpointStatus {
                name: &self.name,
                ready: true,
                attempts: *attempts,
                elapsed_ms: Some(elapsed.as_millis()),
                error: None,
            },
            Readiness::Unready {
                attempts,
                last_error,
            } => EndpointStatus {
                name: &self.name,
                ready: false,
                attempts: *attempts,
                elapsed_ms: None,
                error: Some(
                    last_error
                        .detail()
                        .unwrap_or(last_error.description())
                        .to_string(),
                ),
            },
        };

        status.serialize(serializer)
    }
}

impl fmt::Display for EndpointReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.readiness {
            Readiness::Ready { attempts, elapsed } => write!(
                f,
                "{:<16} ready after {attempts} attempt(s) in {}ms",
                self.name,
                elapsed.as_millis()
            ),
            Readiness::Unready {
                attempts,
                last_error,
            } => write!(
                f,
                "{:<16} UNREACHABLE after {attempts} attempt(s): {}",
                self.name,
                last_error.detail().unwrap_or(last_error.description())
            ),
        }
    }
}

/// Retries the endpoint's check until it succeeds or the attempts are exhausted.
pub async fn wait_ready(endpoint: &ServiceEndpoint) -> Readiness {
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = match tokio::time::timeout(endpoint.attempt_timeout, endpoint.check.check())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(harness_error!(
                endpoint.check.unreachable_kind(),
                "Readiness attempt timed out",
                format!(
                    "{} did not answer within {}ms",
                    endpoint.name,
                    endpoint.attempt_timeout.as_millis()
                )
            )),
        };

        match result {
            Ok(()) => {
                counter!(CDC_READINESS_ATTEMPTS_TOTAL, ENDPOINT_LABEL => endpoint.name.clone(), OUTCOME_LABEL => "ok")
                    .increment(1);
                let elapsed = started.elapsed();
                info!(endpoint = %endpoint.name, attempts, elapsed_ms = elapsed.as_millis() as u64, "endpoint ready");

                return Readiness::Ready { attempts, elapsed };
            }
            Err(err) => {
                counter!(CDC_READINESS_ATTEMPTS_TOTAL, ENDPOINT_LABEL => endpoint.name.clone(), OUTCOME_LABEL => "error")
                    .increment(1);

                if attempts >= endpoint.max_attempts {
                    warn!(endpoint = %endpoint.name, attempts, error = %err, "endpoint unready");
                    return Readiness::Unready {
                        attempts,
                        last_error: err,
                    };
                }

                debug!(
                    endpoint = %endpoint.name,
                    attempt = attempts,
                    max_attempts = endpoint.max_attempts,
                    error = err.detail().unwrap_or(err.description()),
                    "endpoint not ready yet, retrying"
                );
                tokio::time::sleep(endpoint.interval).await;
            }
        }
    }
}

/// Waits for every endpoint concurrently and returns all outcomes in input order.
pub async fn wait_all_ready(endpoints: &[ServiceEndpoint]) -> Vec<EndpointReadiness> {
    let outcomes = join_all(endpoints.iter().map(wait_ready)).await;

    endpoints
        .iter()
        .zip(outcomes)
        .map(|(endpoint, readiness)| EndpointReadiness {
            name: endpoint.name.clone(),
            readiness,
        })
        .collect()
}

/// Turns readiness outcomes into an error naming every unreachable endpoint.
pub fn require_ready(outcomes: &[EndpointReadiness]) -> HarnessResult<()> {
    let errors: Vec<HarnessError> = outcomes
        .iter()
        .filter_map(|outcome| match &outcome.readiness {
            Readiness::Ready { .. } => None,
            Readiness::Unready { last_error, .. } => Some(last_error.clone()),
        })
        .collect();

    if errors.is_empty() {
        return Ok(());
    }

    Err(errors.into())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::clients::memory::MemoryPipeline;
    use crate::types::EntitySchema;

    fn policy(max_attempts: u32) -> ReadinessConfig {
        ReadinessConfig {
            max_attempts,
            interval_ms: 1000,
            attempt_timeout_ms: 500,
            ..ReadinessConfig::default()
        }
    }

    fn flaky(failures: u32) -> (Arc<AtomicU32>, impl ReadinessCheck + 'static) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let check = PredicateCheck::new("flaky", move || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call <= failures {
                    Err(harness_error!(ErrorKind::PipelineUnreachable, "not yet"))
                } else {
                    Ok(())
                }
            }
        });
        (calls, check)
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_ready() {
        let (calls, check) = flaky(2);
        let endpoint = ServiceEndpoint::new(check, &policy(5));

        let readiness = wait_ready(&endpoint).await;
        let Readiness::Ready { attempts, elapsed } = readiness else {
            panic!("endpoint should be ready");
        };
        assert_eq!(attempts, 3);
        assert_eq!(elapsed, Duration::from_secs(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_with_last_error() {
        let (calls, check) = flaky(u32::MAX);
        let endpoint = ServiceEndpoint::new(check, &policy(4));

        let readiness = wait_ready(&endpoint).await;
        let Readiness::Unready {
            attempts,
            last_error,
        } = readiness
        else {
            panic!("endpoint should be unready");
        };
        assert_eq!(attempts, 4);
        assert_eq!(last_error.kind(), ErrorKind::PipelineUnreachable);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_attempts_time_out() {
        let check = PredicateCheck::new("hanging", || async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let endpoint = ServiceEndpoint::new(check, &policy(2));

        let Readiness::Unready { last_error, .. } = wait_ready(&endpoint).await else {
            panic!("endpoint should be unready");
        };
        assert!(last_error.detail().unwrap().contains("within 500ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_source_is_reported_with_the_others() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        pipeline.set_source_down(true).await;

        let endpoints = vec![
            ServiceEndpoint::new(SourceLiveness::new(pipeline.source()), &policy(2)),
            ServiceEndpoint::new(TargetLiveness::new(pipeline.target()), &policy(2)),
            ServiceEndpoint::new(TargetBackends::new(pipeline.target()), &policy(2)),
        ];

        let outcomes = wait_all_ready(&endpoints).await;
        assert_eq!(outcomes.len(), 3);
        assert!(!outcomes[0].readiness.is_ready());
        assert!(outcomes[1].readiness.is_ready());
        assert!(outcomes[2].readiness.is_ready());

        let err = require_ready(&outcomes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
        assert!(err.is_connectivity());
    }

    #[tokio::test(start_paused = true)]
    async fn target_without_backends_is_unready() {
        let pipeline = MemoryPipeline::new(Arc::new(EntitySchema::standard()), Duration::ZERO);
        pipeline.set_alive_backends(0).await;

        let endpoint = ServiceEndpoint::new(TargetBackends::new(pipeline.target()), &policy(1));
        assert!(!wait_ready(&endpoint).await.is_ready());
    }
}
