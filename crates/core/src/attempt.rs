//! One in-flight snapshot coordination round.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use replisub_types::{Marker, Position, SnapshotMarker, SnapshotRequest, SnapshotResponse};

use crate::controller::ReplicatedSubscriptionsController;

/// Lifecycle state of a snapshot round.
///
/// Once a round leaves `Pending` it never returns; the transition happens
/// exactly once, inside the round's critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Waiting for responses.
    Pending,
    /// Every expected cluster responded; the finalized map was published.
    Completed,
    /// Abandoned by timeout cleanup before all responses arrived.
    TimedOut,
}

/// Guarded accumulator: the record-then-check-for-completion sequence must
/// be one atomic unit so concurrent deliveries of the last missing
/// responses cannot both (or neither) trigger finalization.
struct AttemptInner {
    responses: BTreeMap<String, Position>,
    state: AttemptState,
}

/// One snapshot round: publishes a request per expected peer cluster,
/// accumulates their responses, and finalizes exactly once when all have
/// answered. Rounds that never complete are reclaimed lazily by the
/// controller's per-tick cleanup.
pub struct SnapshotAttempt {
    /// Round identifier, unique among concurrently pending rounds.
    snapshot_id: String,
    /// Clusters that must respond before the round can finalize.
    expected_clusters: BTreeSet<String>,
    /// Monotonic start, for timeout ages.
    started_at: Instant,
    /// Wall-clock start (unix millis), compared against the topic's
    /// last-append timestamp by the controller's eligibility checks.
    started_at_millis: u64,
    /// Age at which the round is considered abandoned.
    timeout: Duration,
    inner: Mutex<AttemptInner>,
}

impl SnapshotAttempt {
    /// Creates a new pending round over `expected_clusters` with a fresh
    /// unique identifier.
    pub fn new(expected_clusters: BTreeSet<String>, timeout: Duration) -> Self {
        let started_at_millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            expected_clusters,
            started_at: Instant::now(),
            started_at_millis,
            timeout,
            inner: Mutex::new(AttemptInner {
                responses: BTreeMap::new(),
                state: AttemptState::Pending,
            }),
        }
    }

    /// The round's identifier.
    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    /// Wall-clock start of the round in unix millis.
    pub fn start_time_millis(&self) -> u64 {
        self.started_at_millis
    }

    /// Time elapsed since the round started.
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AttemptState {
        self.inner.lock().state
    }

    /// Number of distinct clusters that have responded so far.
    pub fn response_count(&self) -> usize {
        self.inner.lock().responses.len()
    }

    /// Whether the round's age has reached its timeout.
    ///
    /// Evaluated lazily by the controller's cleanup pass rather than by a
    /// dedicated timer; detection latency is bounded by one tick interval.
    pub fn is_timed_out(&self) -> bool {
        self.started_at.elapsed() >= self.timeout
    }

    /// Transitions `Pending` → `TimedOut` iff the round has expired.
    ///
    /// Returns whether the transition happened. The state check shares the
    /// responses' critical section, so a round can never be both finalized
    /// and reclaimed as timed out.
    pub(crate) fn mark_timed_out(&self) -> bool {
        if !self.is_timed_out() {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.state != AttemptState::Pending {
            return false;
        }
        inner.state = AttemptState::TimedOut;
        true
    }

    /// Publishes one snapshot-request marker per expected cluster.
    ///
    /// Fire-and-forget: no transport-level acknowledgment is expected
    /// beyond the eventual response markers.
    pub async fn start(&self, controller: &ReplicatedSubscriptionsController) {
        for cluster in &self.expected_clusters {
            debug!(
                topic = controller.topic_name(),
                snapshot_id = %self.snapshot_id,
                cluster = %cluster,
                "Requesting snapshot position"
            );
            let request = SnapshotRequest {
                snapshot_id: self.snapshot_id.clone(),
                source_cluster: controller.local_cluster().to_string(),
            };
            controller.write_marker(&Marker::SnapshotRequest(request)).await;
        }
    }

    /// Handles one response marker routed to this round.
    ///
    /// Recording is idempotent: a duplicate response for the same cluster
    /// overwrites, which is safe because every response within one round
    /// answers the same logical request. When the last expected cluster
    /// answers, the round finalizes exactly once: the finalized map (peers'
    /// reported positions plus the local cluster's current tail) is
    /// published as a snapshot marker and the controller is notified.
    pub async fn received_response(
        &self,
        controller: &ReplicatedSubscriptionsController,
        marker_position: Position,
        response: &SnapshotResponse,
    ) {
        debug!(
            topic = controller.topic_name(),
            snapshot_id = %response.snapshot_id,
            cluster = %response.response_cluster,
            position = %response.position,
            marker_position = %marker_position,
            "Received snapshot response"
        );

        let Some(mut positions) = self.record_response(response) else {
            return;
        };

        positions.insert(
            controller.local_cluster().to_string(),
            controller.local_tail_position(),
        );

        let snapshot = SnapshotMarker::from_positions(self.snapshot_id.as_str(), &positions);
        controller.write_marker(&Marker::Snapshot(snapshot)).await;
        controller.snapshot_completed(&self.snapshot_id);
    }

    /// Records a response; returns the accumulated map exactly once, when
    /// the recording completed the round.
    ///
    /// Responses from clusters outside the expected set are dropped, which
    /// keeps `responses.keys ⊆ expected_clusters`.
    fn record_response(&self, response: &SnapshotResponse) -> Option<BTreeMap<String, Position>> {
        if !self.expected_clusters.contains(&response.response_cluster) {
            debug!(
                snapshot_id = %response.snapshot_id,
                cluster = %response.response_cluster,
                "Dropping response from unexpected cluster"
            );
            return None;
        }

        let mut inner = self.inner.lock();
        if inner.state != AttemptState::Pending {
            return None;
        }

        inner
            .responses
            .insert(response.response_cluster.clone(), response.position);

        let complete = self
            .expected_clusters
            .iter()
            .all(|cluster| inner.responses.contains_key(cluster));
        if !complete {
            return None;
        }

        inner.state = AttemptState::Completed;
        Some(inner.responses.clone())
    }
}
