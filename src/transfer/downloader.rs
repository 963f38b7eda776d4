use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Duration;

use crate::core::{ClientHandle, PeerIdentity, PeerRef, ResourceDescriptor};
use crate::transfer::scheduler::{Assignment, DownloadRun};
use crate::utils::{MetricsCollector, P2PError, Result, StatusSink};

/// What a finished run looked like.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub resource: ResourceDescriptor,
    pub limit: usize,
    pub peak_active: usize,
    /// Peers dropped after a failed attempt, in failure order.
    pub evicted: Vec<PeerRef>,
}

/// Result of one attempt, handed back to the scheduling loop.
struct AttemptOutcome {
    part: u32,
    peer: PeerRef,
    result: Result<bool>,
}

/// Downloads every part of a resource from a candidate set.
///
/// The scheduling loop owns the [`DownloadRun`]; attempts only report back
/// through the `JoinSet`.
pub struct Downloader {
    capacity: usize,
    transfer_timeout: Option<Duration>,
    sink: Arc<dyn StatusSink>,
    metrics: MetricsCollector,
}

impl Downloader {
    pub fn new(
        capacity: usize,
        transfer_timeout: Option<Duration>,
        sink: Arc<dyn StatusSink>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            capacity,
            transfer_timeout,
            sink,
            metrics,
        }
    }

    pub async fn run(
        &self,
        resource: &ResourceDescriptor,
        candidates: Vec<(PeerRef, Arc<dyn ClientHandle>)>,
    ) -> Result<RunReport> {
        let mut run = DownloadRun::new(resource.clone(), candidates, self.capacity);
        if run.limit() == 0 {
            warn!("No candidates to download {} from", resource);
            self.sink
                .append_log(&format!("No peer available for {}", resource));
            return Err(P2PError::NoCandidates(resource.to_string()));
        }

        info!(
            "Starting download of {} from {} peers, {} at a time",
            resource,
            run.candidate_count(),
            run.limit()
        );
        self.sink.set_download_queue(run.queue_entries());

        let mut attempts = JoinSet::new();
        while run.should_continue() {
            while let Some(assignment) = run.assign_next() {
                self.sink.append_log(&format!(
                    "Downloading {} part {} from {}",
                    resource.name, assignment.part, assignment.peer.name
                ));
                attempts.spawn(attempt(
                    assignment,
                    resource.name.clone(),
                    self.transfer_timeout,
                ));
            }
            debug_assert!(run.invariants_hold());
            self.sink.set_download_queue(run.queue_entries());

            let outcome = match attempts.join_next().await {
                Some(Ok(outcome)) => outcome,
                Some(Err(e)) => {
                    // The attempt's part and peer are unknown; the run cannot
                    // keep its accounting and is abandoned.
                    error!("Transfer task for {} aborted: {}", resource, e);
                    break;
                }
                None => break,
            };
            self.apply(&mut run, outcome).await;
            debug_assert!(run.invariants_hold());
            self.sink.set_download_queue(run.queue_entries());
        }
        attempts.abort_all();

        let report = RunReport {
            resource: resource.clone(),
            limit: run.limit(),
            peak_active: run.peak_active(),
            evicted: run.evicted().to_vec(),
        };

        if run.is_complete() {
            self.metrics.record_run_completed().await;
            info!("Download of {} complete", resource);
            Ok(report)
        } else {
            self.metrics.record_run_failed().await;
            let err = P2PError::DownloadFailed {
                resource: resource.to_string(),
                done: run.done_count(),
                total: run.total_parts(),
            };
            warn!("{}", err);
            self.sink.append_log(&err.to_string());
            Err(err)
        }
    }

    async fn apply(&self, run: &mut DownloadRun, outcome: AttemptOutcome) {
        let identity: PeerIdentity = outcome.peer.identity();
        let name = &run.resource().name;

        match outcome.result {
            Ok(true) => {
                debug!("Part {} of {} received from {}", outcome.part, name, outcome.peer);
                self.sink.append_log(&format!(
                    "Part {} of {} received from {}",
                    outcome.part, name, outcome.peer.name
                ));
                run.complete_part(outcome.part, &identity);
                self.metrics.record_part_downloaded().await;
            }
            Ok(false) => {
                self.sink.append_log(&format!(
                    "{} declined part {} of {}",
                    outcome.peer.name, outcome.part, name
                ));
                run.fail_part(outcome.part, &identity);
                self.metrics.record_part_failed().await;
            }
            Err(e) => {
                warn!("Part {} of {} from {} failed: {}", outcome.part, name, outcome.peer, e);
                self.sink.append_log(&format!(
                    "Client {} does not respond, part {} of {} rescheduled",
                    outcome.peer.name, outcome.part, name
                ));
                run.fail_part(outcome.part, &identity);
                self.metrics.record_part_failed().await;
            }
        }
    }
}

async fn attempt(
    assignment: Assignment,
    resource: String,
    timeout: Option<Duration>,
) -> AttemptOutcome {
    let transfer = assignment.handle.request_transfer(&resource, assignment.part);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, transfer).await {
            Ok(result) => result,
            Err(_) => Err(P2PError::Timeout(format!(
                "part {} of {} from {}",
                assignment.part, resource, assignment.peer
            ))),
        },
        None => transfer.await,
    };

    AttemptOutcome {
        part: assignment.part,
        peer: assignment.peer,
        result,
    }
}
