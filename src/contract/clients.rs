use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ethers::providers::{Http, Provider};
use reqwest::{Client, Url};
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::{MAX_RETRY_ATTEMPTS, RETRY_BASE_DELAY};
use crate::error::SyncError;
use crate::types::HealthMetrics;
use crate::utils::retry_async;

/// RPC client wrapper with retry, timeout and health tracking
#[derive(Debug, Clone)]
pub struct RpcClient {
    provider: Arc<Provider<Http>>,
    timeout: Duration,
    health: Arc<RwLock<HealthMetrics>>,
}

impl RpcClient {
    /// Creates a new RPC client with the given endpoint and timeout
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let url = Url::parse(rpc_url)
            .map_err(|e| SyncError::Configuration(format!("Invalid RPC URL: {}", e)))?;

        let http = Http::new_with_client(
            url,
            Client::builder().timeout(timeout).build().map_err(|e| {
                SyncError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?,
        );

        let provider = Provider::new(http).interval(Duration::from_millis(500));

        Ok(Self {
            provider: Arc::new(provider),
            timeout,
            health: Arc::new(RwLock::new(HealthMetrics::default())),
        })
    }

    /// Runs a read with per-attempt timeout and exponential backoff.
    ///
    /// Only `ContractUnreachable` is retried; decode and address errors are final.
    pub async fn execute<T, F, Fut>(&self, label: &'static str, operation: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let timeout = self.timeout;
        let result = retry_async(
            || {
                let attempt = operation();
                async move {
                    let started = Instant::now();
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(result) => result.map(|value| (value, started.elapsed())),
                        Err(_) => Err(SyncError::ContractUnreachable(format!(
                            "{} timed out after {:?}",
                            label, timeout
                        ))),
                    }
                }
            },
            MAX_RETRY_ATTEMPTS,
            RETRY_BASE_DELAY,
            true,
            |e: &SyncError| matches!(e, SyncError::ContractUnreachable(_)),
        )
        .await;

        let mut health = self.health.write().await;
        match result {
            Ok((value, elapsed)) => {
                health.record_success(elapsed);
                Ok(value)
            }
            Err(e) => {
                health.record_failure();
                warn!(call = label, error = %e, "RPC read failed");
                Err(e)
            }
        }
    }

    /// Records the outcome of a call made outside `execute` (writes, receipts).
    pub async fn record(&self, ok: bool, elapsed: Duration) {
        let mut health = self.health.write().await;
        if ok {
            health.record_success(elapsed);
        } else {
            health.record_failure();
        }
    }

    pub async fn health(&self) -> HealthMetrics {
        self.health.read().await.clone()
    }

    /// Gets the underlying provider
    pub fn provider(&self) -> Arc<Provider<Http>> {
        Arc::clone(&self.provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_rejects_bad_url() {
        assert!(matches!(
            RpcClient::new("not a url", Duration::from_secs(1)),
            Err(SyncError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_decode_errors_are_not_retried() {
        let client = RpcClient::new("http://127.0.0.1:8545", Duration::from_secs(1)).unwrap();
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), SyncError> = client
            .execute("decode", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::DecodeError("bad tuple".into()))
            })
            .await;

        assert!(matches!(result, Err(SyncError::DecodeError(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let health = client.health().await;
        assert_eq!(health.failed_calls, 1);
        assert_eq!(health.connection_status, ConnectionStatus::Degraded);
    }

    #[tokio::test]
    async fn test_success_updates_health() {
        let client = RpcClient::new("http://127.0.0.1:8545", Duration::from_secs(1)).unwrap();
        let value = client.execute("ok", || async { Ok(7u64) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(client.health().await.connection_status, ConnectionStatus::Healthy);
    }
}
