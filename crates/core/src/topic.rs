//! Collaborator traits: the topic, its replicators, and its subscriptions.
//!
//! The snapshot protocol treats the replicated log, per-cluster replicator
//! connectivity, and the subscription/cursor store as external
//! collaborators. Broker integrations implement these traits; tests supply
//! mocks.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Snafu;

use replisub_types::{MarkerType, Position};

/// Error type for topic collaborator operations.
#[derive(Debug, Snafu)]
pub enum TopicError {
    /// Publishing a marker through the topic write path failed.
    #[snafu(display("marker publish failed: {message}"))]
    Publish {
        /// Description of the publish failure.
        message: String,
    },

    /// Creating a subscription failed.
    #[snafu(display("creating subscription {name} failed: {message}"))]
    SubscriptionCreate {
        /// The subscription that could not be created.
        name: String,
        /// Description of the failure.
        message: String,
    },
}

/// Where a newly created subscription's cursor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialPosition {
    /// The earliest retained entry of the topic.
    Earliest,
    /// The current tail of the topic.
    Latest,
}

/// One replica of a topic's log, as seen by its snapshot controller.
///
/// Query methods are non-blocking reads of broker state.
/// `trigger_replicator_reconnect` only kicks off reconnection; callers never
/// wait on it.
#[async_trait]
pub trait ReplicatedTopic: Send + Sync {
    /// The topic's fully qualified name, used in logs.
    fn name(&self) -> &str;

    /// Position of the latest durably written entry.
    fn last_position(&self) -> Position;

    /// Unix-millis timestamp of the last data append, 0 if none ever.
    fn last_data_appended_at(&self) -> u64;

    /// Names of the peer clusters this topic replicates to.
    fn replicated_clusters(&self) -> Vec<String>;

    /// Whether the replicator toward `cluster` currently has a live
    /// connection.
    fn is_replicator_connected(&self, cluster: &str) -> bool;

    /// Starts reconnection of any closed replicator producers. Returns
    /// immediately.
    fn trigger_replicator_reconnect(&self);

    /// Publishes a marker through the topic's normal write path.
    ///
    /// The entry is stored and replicated like any message but tagged so it
    /// is excluded from application-level delivery. Resolves to the
    /// position assigned to the entry.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Publish`] if the entry could not be written.
    async fn publish_marker(
        &self,
        marker_type: MarkerType,
        payload: Bytes,
    ) -> Result<Position, TopicError>;

    /// Looks up an existing subscription by name.
    fn subscription(&self, name: &str) -> Option<Arc<dyn ReplicatedSubscription>>;

    /// Creates a subscription on this topic.
    ///
    /// `replicated` sets the cross-cluster replicated-state flag so the new
    /// subscription participates in this protocol itself.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::SubscriptionCreate`] on failure. Concurrent
    /// duplicate creation is the implementor's concern; callers tolerate it
    /// because a cumulative acknowledgment at an already-reached position
    /// is a no-op.
    async fn create_subscription(
        &self,
        name: &str,
        initial_position: InitialPosition,
        replicated: bool,
    ) -> Result<Arc<dyn ReplicatedSubscription>, TopicError>;
}

/// A subscription's cursor, reduced to the one operation this protocol
/// needs.
pub trait ReplicatedSubscription: Send + Sync {
    /// The subscription's name.
    fn name(&self) -> &str;

    /// Marks all entries up to and including `position` as consumed.
    ///
    /// Acknowledging a position the cursor has already reached or passed is
    /// a no-op.
    fn acknowledge_cumulative(&self, position: Position);
}
