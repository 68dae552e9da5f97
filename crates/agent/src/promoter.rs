//! Escalates a streaming call across model tiers when a tier is too slow to
//! produce its first content-bearing event.
//!
//! Events that arrive before the first content event (agent switches) are
//! held back and flushed together with it. If the tier times out they are
//! discarded along with the attempt, so callers only ever observe output
//! from the tier that ends up answering.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hirewire_core::domain::tier::ModelTier;
use hirewire_core::errors::DomainError;

use crate::runner::{ContentSignal, Streamed};

#[derive(Debug, Error)]
pub enum PromotionError<E> {
    #[error("all model tiers exhausted: {}", tiers.join(", "))]
    Exhausted { tiers: Vec<String> },
    #[error("cancelled by caller")]
    Cancelled,
    #[error("attempt on `{model}` failed: {source}")]
    Attempt {
        model: String,
        #[source]
        source: E,
    },
    #[error("attempt on `{model}` aborted: {reason}")]
    Aborted { model: String, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Promoted<R> {
    pub model: String,
    pub result: R,
}

enum AttemptOutcome<R, E> {
    Completed(R),
    TimedOut,
    Failed(PromotionError<E>),
}

#[derive(Clone, Debug)]
pub struct TierPromoter {
    tiers: Vec<ModelTier>,
}

impl TierPromoter {
    pub fn new(tiers: Vec<ModelTier>) -> Result<Self, DomainError> {
        if tiers.is_empty() {
            return Err(DomainError::EmptyTierChain);
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[ModelTier] {
        &self.tiers
    }

    /// Runs `start` per tier until one produces content, forwarding that
    /// tier's events to `output`. A closed `output` counts as cancellation.
    pub async fn drive<T, R, E, F>(
        &self,
        mut start: F,
        output: &mpsc::Sender<T>,
        cancel: &CancellationToken,
    ) -> Result<Promoted<R>, PromotionError<E>>
    where
        T: ContentSignal,
        F: FnMut(&ModelTier, CancellationToken) -> Streamed<T, R, E>,
    {
        for (index, tier) in self.tiers.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PromotionError::Cancelled);
            }

            let attempt_cancel = cancel.child_token();
            let stream = start(tier, attempt_cancel.clone());
            let outcome = pump(
                stream,
                &tier.model,
                Some(tier.first_token_timeout),
                output,
                cancel,
                &attempt_cancel,
            )
            .await;

            match outcome {
                AttemptOutcome::Completed(result) => {
                    if index > 0 {
                        info!(
                            event_name = "tier.promoted",
                            model = %tier.model,
                            tier_index = index,
                            "answered by promoted tier"
                        );
                    }
                    return Ok(Promoted { model: tier.model.clone(), result });
                }
                AttemptOutcome::TimedOut => {
                    warn!(
                        event_name = "tier.timeout",
                        model = %tier.model,
                        timeout_ms = u64::try_from(tier.first_token_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                        "tier produced no content before its deadline"
                    );
                }
                AttemptOutcome::Failed(error) => return Err(error),
            }
        }

        Err(PromotionError::Exhausted {
            tiers: self.tiers.iter().map(|tier| tier.model.clone()).collect(),
        })
    }
}

/// Forwards a single stream with no first-token deadline. Used when no tier
/// chain is configured.
pub async fn forward<T, R, E>(
    stream: Streamed<T, R, E>,
    model: &str,
    output: &mpsc::Sender<T>,
    cancel: &CancellationToken,
    attempt_cancel: &CancellationToken,
) -> Result<R, PromotionError<E>>
where
    T: ContentSignal,
{
    match pump(stream, model, None, output, cancel, attempt_cancel).await {
        AttemptOutcome::Completed(result) => Ok(result),
        AttemptOutcome::TimedOut => Err(PromotionError::Exhausted { tiers: vec![model.to_string()] }),
        AttemptOutcome::Failed(error) => Err(error),
    }
}

async fn pump<T, R, E>(
    stream: Streamed<T, R, E>,
    model: &str,
    first_token_timeout: Option<Duration>,
    output: &mpsc::Sender<T>,
    cancel: &CancellationToken,
    attempt_cancel: &CancellationToken,
) -> AttemptOutcome<R, E>
where
    T: ContentSignal,
{
    let Streamed { mut events, completion } = stream;
    let deadline = deadline_after(first_token_timeout);
    tokio::pin!(deadline);

    let mut started = false;
    let mut held: Vec<T> = Vec::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                attempt_cancel.cancel();
                return AttemptOutcome::Failed(PromotionError::Cancelled);
            }
            _ = &mut deadline, if !started => {
                attempt_cancel.cancel();
                return AttemptOutcome::TimedOut;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if !started && !event.is_content() {
                    held.push(event);
                    continue;
                }
                started = true;
                for pending in held.drain(..).chain(std::iter::once(event)) {
                    if output.send(pending).await.is_err() {
                        attempt_cancel.cancel();
                        return AttemptOutcome::Failed(PromotionError::Cancelled);
                    }
                }
            }
        }
    }

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            attempt_cancel.cancel();
            return AttemptOutcome::Failed(PromotionError::Cancelled);
        }
        result = completion => result,
    };

    match result {
        Ok(Ok(result)) => {
            for pending in held {
                if output.send(pending).await.is_err() {
                    return AttemptOutcome::Failed(PromotionError::Cancelled);
                }
            }
            AttemptOutcome::Completed(result)
        }
        Ok(Err(source)) => {
            AttemptOutcome::Failed(PromotionError::Attempt { model: model.to_string(), source })
        }
        Err(_) => AttemptOutcome::Failed(PromotionError::Aborted {
            model: model.to_string(),
            reason: "attempt ended without reporting a result".to_string(),
        }),
    }
}

fn deadline_after(timeout: Option<Duration>) -> impl Future<Output = ()> {
    async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    }
}
