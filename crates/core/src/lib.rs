//! Cross-cluster replicated-subscription snapshot protocol.
//!
//! Each cluster holding a replica of a topic runs one
//! [`ReplicatedSubscriptionsController`] per topic. Controllers exchange
//! in-band marker messages over the replicated log to periodically agree on
//! a cluster→position map ("snapshot"): the position up to which each
//! cluster's data is known to be durable and observed. Completed snapshots
//! let a subscription's cumulative-acknowledgment cursor be transplanted to
//! another cluster on failover without message loss or duplicate
//! redelivery.
//!
//! The protocol is best-effort and eventually consistent. Markers may be
//! lost or arrive in different orders on different clusters; unanswered
//! rounds time out and the next timer tick starts a fresh one. Nothing here
//! escalates a failure beyond "try again next cycle".
//!
//! The log transport, topic storage, and cursor internals are collaborators
//! behind the [`ReplicatedTopic`] and [`ReplicatedSubscription`] traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod attempt;
pub mod controller;
pub mod metrics;
pub mod topic;

pub use attempt::{AttemptState, SnapshotAttempt};
pub use controller::ReplicatedSubscriptionsController;
pub use topic::{InitialPosition, ReplicatedSubscription, ReplicatedTopic, TopicError};
