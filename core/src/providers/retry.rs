use crate::traits::{AssistantTurn, CompletionRequest, Provider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Retries failed completions with exponential backoff.
///
/// The loop itself never retries. Wrap a provider in this when transient
/// faults should be absorbed; every attempt still counts against the
/// caller's deadline.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    max_retries: u32,
    backoff: Duration,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> anyhow::Result<AssistantTurn> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request).await {
                Ok(turn) => return Ok(turn),
                Err(e) if attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Completion failed, retrying: {:#}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "completion failed after {} attempts",
                        attempt + 1
                    )));
                }
            }
        }
    }
}
