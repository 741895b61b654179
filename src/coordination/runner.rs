//! Polling loop that finalizes one destination chain's queue, head first

use super::machine::FinalizationStateMachine;
use super::queue::{RequestBook, RequestQueue};
use super::request::{InteropRequest, RequestStatus};
use crate::chain::ChainKind;
use crate::config::PollIntervals;
use crate::error::{FinalizerError, FinalizerResult};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Serial finalizer of one destination chain
pub struct FinalizerRunner {
    chain: ChainKind,
    book: Arc<RequestBook>,
    queue: Arc<RequestQueue>,
    machine: FinalizationStateMachine,
    intervals: PollIntervals,
    request_timeout: Option<Duration>,
}

impl FinalizerRunner {
    /// Fails fast for chains that cannot be finalization targets
    pub fn new(
        chain: ChainKind,
        book: Arc<RequestBook>,
        machine: FinalizationStateMachine,
        intervals: PollIntervals,
        request_timeout: Option<Duration>,
    ) -> FinalizerResult<Self> {
        if !chain.is_finalization_target() {
            return Err(FinalizerError::UnsupportedChain {
                chain: chain.to_string(),
            });
        }

        let queue = book.queue(&chain);
        Ok(Self {
            chain,
            book,
            queue,
            machine,
            intervals,
            request_timeout,
        })
    }

    /// Process the queue until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> FinalizerResult<()> {
        info!("Finalizer for {} started", self.chain);

        loop {
            let Some(mut request) = self.queue.peek_head().await else {
                if self.sleep(self.intervals.queue, &cancel).await.is_err() {
                    break;
                }
                continue;
            };

            if request.start() {
                self.book.record(&request).await;
                self.queue.replace_head(request.clone()).await;
            }

            match self.drive(&mut request, &cancel).await {
                Ok(()) => {
                    self.queue.dequeue_head().await;
                    crate::metrics::record_queue_depth(&self.chain, self.queue.len().await);
                }
                Err(_) => {
                    // Cancelled mid-request: keep its progress at the head
                    self.queue.replace_head(request).await;
                    break;
                }
            }
        }

        info!("Finalizer for {} stopped", self.chain);
        Ok(())
    }

    /// Drive the head request to a terminal state. Only cancellation escapes.
    async fn drive(
        &self,
        request: &mut InteropRequest,
        cancel: &CancellationToken,
    ) -> FinalizerResult<()> {
        debug!(
            "Driving {:?} from {} on {}",
            request.source_tx_hash,
            request.status(),
            self.chain
        );

        while !request.status().is_terminal() {
            if cancel.is_cancelled() {
                return Err(FinalizerError::Cancelled);
            }

            if self.deadline_passed(request) {
                let err = FinalizerError::DeadlineExceeded {
                    tx_hash: format!("{:?}", request.source_tx_hash),
                };
                self.fail(request, err).await;
                break;
            }

            let stage = request.status();
            match self.machine.poll(request).await {
                Ok(true) => {
                    self.book.record(request).await;
                    self.queue.replace_head(request.clone()).await;
                }
                Ok(false) => self.sleep(self.interval(stage), cancel).await?,
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Retrying {:?} at {} on {}: {}",
                        request.source_tx_hash, stage, self.chain, e
                    );
                    self.sleep(self.interval(stage), cancel).await?;
                }
                Err(e) => self.fail(request, e).await,
            }
        }

        if request.status() == RequestStatus::Finalized {
            let latency = (Utc::now() - request.enqueued_at).num_milliseconds() as f64 / 1000.0;
            crate::metrics::record_finalized(&self.chain, latency);
        }
        Ok(())
    }

    async fn fail(&self, request: &mut InteropRequest, err: FinalizerError) {
        if err.should_alert() {
            error!(
                "Request {:?} on {} failed at {}: {}",
                request.source_tx_hash,
                self.chain,
                request.status(),
                err
            );
        } else {
            warn!(
                "Request {:?} on {} failed at {}: {}",
                request.source_tx_hash,
                self.chain,
                request.status(),
                err
            );
        }

        if let Err(e) = request.fail(&err) {
            warn!("Could not fail {:?}: {}", request.source_tx_hash, e);
            return;
        }
        self.book.record(request).await;
        crate::metrics::record_failed(&self.chain);
    }

    /// The deadline runs from when the request reached the head
    fn deadline_passed(&self, request: &InteropRequest) -> bool {
        let (Some(timeout), Some(started_at)) = (self.request_timeout, request.started_at) else {
            return false;
        };
        let elapsed = Utc::now() - started_at;
        elapsed.to_std().map(|e| e >= timeout).unwrap_or(false)
    }

    fn interval(&self, stage: RequestStatus) -> Duration {
        match stage {
            RequestStatus::WaitingSourceFinality => self.intervals.source_finality,
            RequestStatus::WaitingGatewayFinality => self.intervals.gateway_finality,
            RequestStatus::WaitingTargetRootIngestion => self.intervals.root_ingestion,
            _ => self.intervals.broadcast,
        }
    }

    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> FinalizerResult<()> {
        tokio::select! {
            _ = cancel.cancelled() => Err(FinalizerError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
