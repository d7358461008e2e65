// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publish request bookkeeping.
//!
//! [`PublishDispatcher`] decides how many publish requests to keep at the
//! server, which acknowledgements ride on them and when to back off. It does
//! no I/O; the dispatch task issues the requests it hands out and reports
//! every completion back.
//!
//! Limits:
//!
//! - the target is `max(1, live subscriptions)`, never above the cap
//! - the cap starts at `max_outstanding` and is lowered when the server
//!   answers `BadTooManyPublishRequests`
//! - `BadNoSubscription` pauses issuance until [`resume`](PublishDispatcher::resume)
//! - other failures requeue the acknowledgements and back off

use tokio::time::Instant;

use crate::codec::StatusCode;
use crate::error::OpcUaError;
use crate::services::{PublishRequest, PublishResponse, SubscriptionAcknowledgement};
use crate::types::PublishSettings;

use super::retry::ExponentialBackoff;

// =============================================================================
// PublishStats
// =============================================================================

/// Publish counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Requests issued.
    pub issued: u64,
    /// Responses received.
    pub completed: u64,
    /// Failed requests.
    pub failed: u64,
    /// Acknowledgements sent.
    pub acknowledged: u64,
    /// Acknowledgements the server rejected.
    pub rejected_acks: u64,
}

// =============================================================================
// PublishDispatcher
// =============================================================================

/// Outstanding publish requests and pending acknowledgements.
#[derive(Debug)]
pub struct PublishDispatcher {
    max_outstanding: usize,
    cap: usize,
    outstanding: usize,
    pending_acks: Vec<SubscriptionAcknowledgement>,
    paused: bool,
    failures: u32,
    next_issue_at: Option<Instant>,
    backoff: ExponentialBackoff,
    stats: PublishStats,
}

impl PublishDispatcher {
    /// Creates a dispatcher.
    pub fn new(settings: &PublishSettings) -> Self {
        let max_outstanding = settings.max_outstanding.max(1);
        Self {
            max_outstanding,
            cap: max_outstanding,
            outstanding: 0,
            pending_acks: Vec::new(),
            paused: false,
            failures: 0,
            next_issue_at: None,
            backoff: settings.backoff.clone(),
            stats: PublishStats::default(),
        }
    }

    /// Requests currently at the server.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Effective cap on outstanding requests.
    pub fn effective_cap(&self) -> usize {
        self.cap
    }

    /// Returns `true` while issuance is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Acknowledgements waiting for the next request.
    pub fn pending_acks(&self) -> &[SubscriptionAcknowledgement] {
        &self.pending_acks
    }

    /// Counters.
    pub fn stats(&self) -> &PublishStats {
        &self.stats
    }

    /// Number of requests that should be outstanding.
    pub fn target(&self, subscriptions: usize) -> usize {
        subscriptions.max(1).min(self.cap)
    }

    /// Hands out the requests needed to reach the target.
    ///
    /// Pending acknowledgements go on the first request. Nothing is issued
    /// without live subscriptions, while paused or while backing off.
    pub fn next_requests(&mut self, subscriptions: usize, now: Instant) -> Vec<PublishRequest> {
        if subscriptions == 0 || self.paused {
            return Vec::new();
        }
        if let Some(at) = self.next_issue_at {
            if now < at {
                return Vec::new();
            }
            self.next_issue_at = None;
        }

        let missing = self.target(subscriptions).saturating_sub(self.outstanding);
        let mut requests = Vec::with_capacity(missing);
        for _ in 0..missing {
            let acks = std::mem::take(&mut self.pending_acks);
            self.stats.acknowledged += acks.len() as u64;
            requests.push(PublishRequest {
                subscription_acknowledgements: acks,
                ..Default::default()
            });
        }
        self.outstanding += requests.len();
        self.stats.issued += requests.len() as u64;
        requests
    }

    /// Queues an acknowledgement for the next request.
    pub fn acknowledge(&mut self, subscription_id: u32, sequence_number: u32) {
        let ack = SubscriptionAcknowledgement {
            subscription_id,
            sequence_number,
        };
        if !self.pending_acks.contains(&ack) {
            self.pending_acks.push(ack);
        }
    }

    /// Records a response. Returns the acknowledgements the server rejected.
    pub fn on_response(
        &mut self,
        acks: &[SubscriptionAcknowledgement],
        response: &PublishResponse,
    ) -> Vec<(SubscriptionAcknowledgement, StatusCode)> {
        self.release();
        self.stats.completed += 1;
        self.failures = 0;
        self.next_issue_at = None;

        let rejected: Vec<_> = acks
            .iter()
            .zip(response.results.iter())
            .filter(|(_, status)| status.is_bad())
            .map(|(ack, status)| (ack.clone(), *status))
            .collect();
        for (ack, status) in &rejected {
            self.stats.rejected_acks += 1;
            tracing::debug!(
                subscription_id = ack.subscription_id,
                sequence_number = ack.sequence_number,
                status = %status,
                "Acknowledgement rejected"
            );
        }
        rejected
    }

    /// Records a failed request.
    pub fn on_failure(
        &mut self,
        acks: Vec<SubscriptionAcknowledgement>,
        error: &OpcUaError,
        now: Instant,
    ) {
        let outstanding_before = self.outstanding;
        self.release();
        self.stats.failed += 1;

        match error.status_code() {
            Some(status) if status.matches(StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS) => {
                let cap = outstanding_before.saturating_sub(1).max(1);
                if cap < self.cap {
                    tracing::info!(cap = cap, "Server limits outstanding publish requests");
                    self.cap = cap;
                }
                self.requeue(acks);
            }
            Some(status) if status.matches(StatusCode::BAD_NO_SUBSCRIPTION) => {
                tracing::debug!("Server has no subscriptions, pausing publish");
                self.paused = true;
            }
            _ => {
                self.requeue(acks);
                let delay = self.backoff.delay(self.failures);
                self.failures = self.failures.saturating_add(1);
                self.next_issue_at = Some(now + delay);
                tracing::warn!(
                    error = %error,
                    attempt = self.failures,
                    delay = ?delay,
                    "Publish failed, backing off"
                );
            }
        }
    }

    /// Resumes issuance after a pause.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Forgets in-flight requests, as after their transport was replaced.
    ///
    /// Pending acknowledgements are dropped; they refer to the old session's
    /// delivery state and are re-derived after recovery.
    pub fn clear(&mut self) {
        self.outstanding = 0;
        self.pending_acks.clear();
        self.paused = false;
        self.failures = 0;
        self.next_issue_at = None;
        self.cap = self.max_outstanding;
    }

    fn release(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    fn requeue(&mut self, acks: Vec<SubscriptionAcknowledgement>) {
        self.stats.acknowledged = self.stats.acknowledged.saturating_sub(acks.len() as u64);
        for ack in acks {
            if !self.pending_acks.contains(&ack) {
                self.pending_acks.push(ack);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeerError;
    use std::time::Duration;

    fn dispatcher(max_outstanding: usize) -> PublishDispatcher {
        let settings = PublishSettings {
            max_outstanding,
            backoff: ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1)),
            ..Default::default()
        };
        PublishDispatcher::new(&settings)
    }

    fn fault(status: StatusCode) -> OpcUaError {
        PeerError::service_fault("Publish", status).into()
    }

    #[tokio::test]
    async fn test_target_follows_subscription_count() {
        let mut dispatcher = dispatcher(5);
        let now = Instant::now();
        assert!(dispatcher.next_requests(0, now).is_empty());
        assert_eq!(dispatcher.next_requests(1, now).len(), 1);
        assert_eq!(dispatcher.next_requests(3, now).len(), 2);
        assert_eq!(dispatcher.outstanding(), 3);
        assert!(dispatcher.next_requests(3, now).is_empty());
    }

    #[tokio::test]
    async fn test_never_exceeds_cap() {
        let mut dispatcher = dispatcher(2);
        let now = Instant::now();
        assert_eq!(dispatcher.next_requests(10, now).len(), 2);
        assert!(dispatcher.next_requests(10, now).is_empty());

        dispatcher.on_response(&[], &PublishResponse::default());
        assert_eq!(dispatcher.next_requests(10, now).len(), 1);
        assert_eq!(dispatcher.outstanding(), 2);
    }

    #[tokio::test]
    async fn test_acks_ride_on_first_request() {
        let mut dispatcher = dispatcher(5);
        dispatcher.acknowledge(1, 10);
        dispatcher.acknowledge(1, 11);
        dispatcher.acknowledge(1, 11);

        let requests = dispatcher.next_requests(2, Instant::now());
        assert_eq!(requests[0].subscription_acknowledgements.len(), 2);
        assert!(requests[1].subscription_acknowledgements.is_empty());
        assert!(dispatcher.pending_acks().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_acks_reported() {
        let mut dispatcher = dispatcher(5);
        dispatcher.acknowledge(1, 10);
        dispatcher.acknowledge(2, 3);
        let mut requests = dispatcher.next_requests(1, Instant::now());
        let acks = std::mem::take(&mut requests[0].subscription_acknowledgements);

        let response = PublishResponse {
            results: vec![StatusCode::GOOD, StatusCode::BAD_SUBSCRIPTION_ID_INVALID],
            ..Default::default()
        };
        let rejected = dispatcher.on_response(&acks, &response);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0.subscription_id, 2);
        assert_eq!(dispatcher.stats().rejected_acks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_backs_off_and_requeues() {
        let mut dispatcher = dispatcher(5);
        dispatcher.acknowledge(1, 4);
        let mut requests = dispatcher.next_requests(1, Instant::now());
        let acks = std::mem::take(&mut requests[0].subscription_acknowledgements);

        let error = OpcUaError::request_timeout("Publish", Duration::from_secs(60));
        dispatcher.on_failure(acks, &error, Instant::now());
        assert_eq!(dispatcher.outstanding(), 0);
        assert_eq!(dispatcher.pending_acks().len(), 1);
        assert!(dispatcher.next_requests(1, Instant::now()).is_empty());

        tokio::time::advance(Duration::from_millis(100)).await;
        let requests = dispatcher.next_requests(1, Instant::now());
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].subscription_acknowledgements.len(), 1);
    }

    #[tokio::test]
    async fn test_too_many_publish_requests_lowers_cap() {
        let mut dispatcher = dispatcher(5);
        let now = Instant::now();
        assert_eq!(dispatcher.next_requests(5, now).len(), 5);

        dispatcher.on_failure(Vec::new(), &fault(StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS), now);
        assert_eq!(dispatcher.effective_cap(), 4);
        assert!(dispatcher.next_requests(5, now).is_empty());
        assert_eq!(dispatcher.outstanding(), 4);

        dispatcher.clear();
        assert_eq!(dispatcher.effective_cap(), 5);
    }

    #[tokio::test]
    async fn test_no_subscription_pauses() {
        let mut dispatcher = dispatcher(5);
        let now = Instant::now();
        dispatcher.next_requests(1, now);
        dispatcher.on_failure(Vec::new(), &fault(StatusCode::BAD_NO_SUBSCRIPTION), now);
        assert!(dispatcher.is_paused());
        assert!(dispatcher.next_requests(1, now).is_empty());

        dispatcher.resume();
        assert_eq!(dispatcher.next_requests(1, now).len(), 1);
    }
}
