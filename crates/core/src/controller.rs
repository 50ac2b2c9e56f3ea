//! Per-topic snapshot coordinator.
//!
//! Encapsulates all replicated-subscription tracking for one topic: the
//! periodic snapshot-initiation cycle, dispatch of inbound markers, the
//! pending-rounds registry, and application of completed snapshots to local
//! cursor state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use replisub_types::{
    ConfigError, Marker, MarkerError, Position, SnapshotConfig, SnapshotMarker, SnapshotRequest,
    SnapshotResponse, SubscriptionUpdate,
};

use crate::attempt::SnapshotAttempt;
use crate::metrics;
use crate::topic::{InitialPosition, ReplicatedTopic};

/// Coordinates the replicated-subscription snapshot protocol for one topic.
///
/// One instance per topic, created when subscription replication is enabled
/// and dropped when the topic is unloaded. All state is reconstructed empty
/// on (re)creation; nothing here is persisted.
///
/// Marker handlers and the timer tick run concurrently on the runtime; the
/// pending-rounds registry and the per-round accumulators carry their own
/// synchronization, so every method takes `&self`.
pub struct ReplicatedSubscriptionsController {
    topic: Arc<dyn ReplicatedTopic>,
    local_cluster: String,
    config: SnapshotConfig,
    /// Rounds awaiting responses, keyed by snapshot id. Entries are removed
    /// exactly once, on completion or on timeout cleanup.
    pending_snapshots: DashMap<String, Arc<SnapshotAttempt>>,
    /// Wall-clock start (unix millis) of the last completed round, 0 while
    /// none has ever completed.
    last_completed_snapshot_start_time: AtomicU64,
    last_completed_snapshot_id: Mutex<Option<String>>,
    /// Position assigned to the most recently published local marker.
    position_of_last_local_marker: Mutex<Option<Position>>,
    shutdown: broadcast::Sender<()>,
}

impl ReplicatedSubscriptionsController {
    /// Creates a controller for `topic`, identifying itself as
    /// `local_cluster` in outbound markers.
    ///
    /// The periodic cycle does not run until [`start`](Self::start) is
    /// called.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when `config` is invalid.
    pub fn new(
        topic: Arc<dyn ReplicatedTopic>,
        local_cluster: impl Into<String>,
        config: SnapshotConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(Arc::new(Self {
            topic,
            local_cluster: local_cluster.into(),
            config,
            pending_snapshots: DashMap::new(),
            last_completed_snapshot_start_time: AtomicU64::new(0),
            last_completed_snapshot_id: Mutex::new(None),
            position_of_last_local_marker: Mutex::new(None),
            shutdown,
        }))
    }

    /// Spawns the periodic snapshot-initiation task.
    ///
    /// Ticks at the configured frequency until [`close`](Self::close) is
    /// called. Returns the task handle.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(controller.config.snapshot_frequency);
            loop {
                tokio::select! {
                    _ = ticker.tick() => controller.start_new_snapshot().await,
                    _ = shutdown.recv() => {
                        debug!(topic = controller.topic_name(), "Snapshot timer stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Cancels future timer ticks.
    ///
    /// Rounds left pending simply receive no further processing; their late
    /// responses would be dropped as unknown ids anyway.
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }

    /// Entry point for inbound marker traffic from the log-dispatch path.
    ///
    /// `position` is the log position the marker was stored at, `tag` the
    /// marker-type tag from the entry metadata. Undecodable payloads are
    /// logged and dropped: the protocol already tolerates marker loss and
    /// the sender will not resend.
    pub async fn received_marker(&self, position: Position, tag: u32, payload: &[u8]) {
        let marker = match Marker::decode(tag, payload) {
            Ok(marker) => marker,
            Err(MarkerError::UnknownType { tag }) => {
                // Transport-level markers share the tag space; not ours.
                debug!(topic = self.topic_name(), tag, "Ignoring marker of unhandled type");
                return;
            },
            Err(error) => {
                warn!(topic = self.topic_name(), error = %error, "Failed to parse marker");
                return;
            },
        };

        match marker {
            Marker::SnapshotRequest(request) => self.received_snapshot_request(&request).await,
            Marker::SnapshotResponse(response) => {
                self.received_snapshot_response(position, &response).await;
            },
            Marker::SubscriptionUpdate(update) => {
                self.received_subscription_update(&update).await;
            },
            // Finalized-snapshot markers are consumed by the cursor-side
            // snapshot cache, not by the controller.
            Marker::Snapshot(_) => {},
        }
    }

    /// Answers a peer's snapshot request with this cluster's tail position.
    ///
    /// Stateless: no bookkeeping is kept on the responding side.
    async fn received_snapshot_request(&self, request: &SnapshotRequest) {
        // If the replicator toward the requester is down the response could
        // never be delivered; kick off reconnection without waiting on it.
        if !self.topic.is_replicator_connected(&request.source_cluster) {
            self.topic.trigger_replicator_reconnect();
        }

        // The response marker is published locally and then replicated, so
        // its own position is necessarily higher than the one it reports.
        let last_position = self.topic.last_position();
        debug!(
            topic = self.topic_name(),
            snapshot_id = %request.snapshot_id,
            source_cluster = %request.source_cluster,
            position = %last_position,
            "Received snapshot request"
        );

        let response = SnapshotResponse {
            snapshot_id: request.snapshot_id.clone(),
            source_cluster: request.source_cluster.clone(),
            response_cluster: self.local_cluster.clone(),
            position: last_position,
        };
        self.write_marker(&Marker::SnapshotResponse(response)).await;
    }

    /// Routes a response marker to the pending round it answers.
    ///
    /// A response for an id no longer registered is dropped silently: the
    /// round already completed or timed out, which is expected churn, not
    /// an error.
    async fn received_snapshot_response(&self, position: Position, response: &SnapshotResponse) {
        let attempt = self
            .pending_snapshots
            .get(&response.snapshot_id)
            .map(|entry| Arc::clone(entry.value()));
        let Some(attempt) = attempt else {
            debug!(
                topic = self.topic_name(),
                snapshot_id = %response.snapshot_id,
                cluster = %response.response_cluster,
                "Received late response for unknown snapshot"
            );
            return;
        };

        attempt.received_response(self, position, response).await;
    }

    /// Applies an update marker to local cursor state.
    ///
    /// Only the entry for this controller's own cluster matters; markers
    /// not naming it are ignored. A missing subscription is created
    /// asynchronously (earliest start, replicated-state flag set) with the
    /// cumulative acknowledgment as its continuation. This is how a
    /// failed-over cluster catches up a subscription's cursor.
    async fn received_subscription_update(&self, update: &SubscriptionUpdate) {
        let Some(position) = update.position_for(&self.local_cluster) else {
            // No entry for this cluster, ignore
            return;
        };

        debug!(
            topic = self.topic_name(),
            subscription = %update.subscription_name,
            position = %position,
            "Received update for subscription"
        );

        match self.topic.subscription(&update.subscription_name) {
            Some(subscription) => subscription.acknowledge_cumulative(position),
            None => {
                info!(
                    topic = self.topic_name(),
                    subscription = %update.subscription_name,
                    position = %position,
                    "Creating subscription after replicated-subscription update"
                );
                match self
                    .topic
                    .create_subscription(&update.subscription_name, InitialPosition::Earliest, true)
                    .await
                {
                    Ok(subscription) => subscription.acknowledge_cumulative(position),
                    Err(error) => warn!(
                        topic = self.topic_name(),
                        subscription = %update.subscription_name,
                        error = %error,
                        "Failed to create subscription for replicated update"
                    ),
                }
            },
        }
    }

    /// Publishes an update marker carrying `snapshot`'s cluster→position
    /// map for `subscription_name`.
    ///
    /// The map is re-sorted by cluster name so identical snapshots always
    /// produce byte-identical markers.
    pub async fn local_subscription_updated(
        &self,
        subscription_name: &str,
        snapshot: &SnapshotMarker,
    ) {
        debug!(
            topic = self.topic_name(),
            subscription = subscription_name,
            snapshot_id = %snapshot.snapshot_id,
            "Updating subscription to snapshot"
        );

        let positions: BTreeMap<String, Position> = snapshot
            .clusters
            .iter()
            .map(|entry| (entry.cluster.clone(), entry.position))
            .collect();
        let update = SubscriptionUpdate::from_positions(subscription_name, &positions);
        self.write_marker(&Marker::SubscriptionUpdate(update)).await;
    }

    /// Runs one snapshot-initiation cycle: reclaim timed-out rounds, check
    /// eligibility, and start a new round if all checks pass.
    ///
    /// Invoked by the periodic timer; callable directly where the caller
    /// owns scheduling.
    pub async fn start_new_snapshot(&self) {
        self.cleanup_timed_out_snapshots();

        let last_completed_start = self
            .last_completed_snapshot_start_time
            .load(Ordering::Acquire);

        if last_completed_start == 0 && !self.pending_snapshots.is_empty() {
            // No round has ever completed and one is already in flight: the
            // remote side may have replication disabled and will never
            // answer. Starting more rounds would only accumulate doomed
            // attempts, so retry cadence degrades to the round timeout.
            debug!(
                topic = self.topic_name(),
                "Pending snapshot exists but none has ever succeeded, \
                 skipping snapshot creation until pending snapshot timeout"
            );
            return;
        }

        let last_appended = self.topic.last_data_appended_at();
        if last_appended == 0 || last_appended < last_completed_start {
            // A snapshot of an unchanged log is redundant.
            debug!(topic = self.topic_name(), "No new data in topic, skipping snapshot creation");
            return;
        }

        let clusters = self.topic.replicated_clusters();
        let any_disconnected = clusters
            .iter()
            .any(|cluster| !self.topic.is_replicator_connected(cluster));
        if any_disconnected {
            // A round that cannot reach every peer cannot complete.
            debug!(
                topic = self.topic_name(),
                "Some peer clusters are not reachable, skipping snapshot creation"
            );
            return;
        }

        let attempt = Arc::new(SnapshotAttempt::new(
            clusters.into_iter().collect(),
            self.config.snapshot_timeout,
        ));
        debug!(
            topic = self.topic_name(),
            snapshot_id = attempt.snapshot_id(),
            "Starting snapshot creation"
        );

        metrics::record_snapshot_started();
        self.pending_snapshots
            .insert(attempt.snapshot_id().to_string(), Arc::clone(&attempt));
        attempt.start(self).await;
    }

    /// Records completion of a round: deregisters it and remembers its id
    /// and start time for the eligibility checks of later ticks.
    pub(crate) fn snapshot_completed(&self, snapshot_id: &str) {
        let removed = self.pending_snapshots.remove(snapshot_id);
        *self.last_completed_snapshot_id.lock() = Some(snapshot_id.to_string());

        if let Some((_, attempt)) = removed {
            self.last_completed_snapshot_start_time
                .store(attempt.start_time_millis(), Ordering::Release);
            debug!(
                topic = self.topic_name(),
                snapshot_id, "Snapshot completed"
            );
            metrics::record_snapshot_completed(attempt.duration().as_secs_f64());
        }
    }

    /// Reclaims every pending round whose age exceeds the timeout.
    ///
    /// The `mark_timed_out` transition arbitrates against concurrent
    /// finalization, so a round is counted (and removed) exactly once on
    /// exactly one of the two paths.
    fn cleanup_timed_out_snapshots(&self) {
        let expired: Vec<Arc<SnapshotAttempt>> = self
            .pending_snapshots
            .iter()
            .filter(|entry| entry.value().is_timed_out())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for attempt in expired {
            if !attempt.mark_timed_out() {
                // Lost the race to a concurrent finalization.
                continue;
            }
            if self.pending_snapshots.remove(attempt.snapshot_id()).is_some() {
                debug!(
                    topic = self.topic_name(),
                    snapshot_id = attempt.snapshot_id(),
                    "Snapshot creation timed out"
                );
                metrics::record_snapshot_timed_out(attempt.duration().as_secs_f64());
            }
        }
    }

    /// Publishes a marker through the topic's write path.
    ///
    /// Failures are logged, never retried here: the next tick's fresh round
    /// is the retry mechanism. On success the assigned position is recorded
    /// as the latest local marker.
    pub(crate) async fn write_marker(&self, marker: &Marker) {
        let payload = match marker.encode() {
            Ok(bytes) => Bytes::from(bytes),
            Err(error) => {
                warn!(
                    topic = self.topic_name(),
                    marker_type = %marker.marker_type(),
                    error = %error,
                    "Failed to encode marker"
                );
                return;
            },
        };

        match self.topic.publish_marker(marker.marker_type(), payload).await {
            Ok(position) => {
                debug!(
                    topic = self.topic_name(),
                    marker_type = %marker.marker_type(),
                    position = %position,
                    "Published marker"
                );
                *self.position_of_last_local_marker.lock() = Some(position);
            },
            Err(error) => warn!(
                topic = self.topic_name(),
                marker_type = %marker.marker_type(),
                error = %error,
                "Failed to publish marker"
            ),
        }
    }

    /// The name of the cluster this controller represents.
    pub fn local_cluster(&self) -> &str {
        &self.local_cluster
    }

    /// Id of the most recently completed round, if any.
    pub fn last_completed_snapshot_id(&self) -> Option<String> {
        self.last_completed_snapshot_id.lock().clone()
    }

    /// Position assigned to the most recently published local marker.
    pub fn position_of_last_local_marker(&self) -> Option<Position> {
        *self.position_of_last_local_marker.lock()
    }

    /// Number of rounds currently awaiting responses.
    pub fn pending_snapshot_count(&self) -> usize {
        self.pending_snapshots.len()
    }

    /// Ids of the rounds currently awaiting responses.
    pub fn pending_snapshot_ids(&self) -> Vec<String> {
        self.pending_snapshots
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub(crate) fn topic_name(&self) -> &str {
        self.topic.name()
    }

    pub(crate) fn local_tail_position(&self) -> Position {
        self.topic.last_position()
    }
}
