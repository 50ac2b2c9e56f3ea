//! Marker payloads exchanged between clusters.
//!
//! Markers are control messages carried on the replicated topic log like
//! ordinary entries, distinguished by a numeric type tag in the entry
//! metadata and excluded from application-level delivery. The replication
//! transport forwards them verbatim to every peer cluster, preserving
//! per-cluster arrival order but nothing across clusters; the snapshot
//! protocol is built to tolerate loss, duplication, and cross-cluster
//! reordering of everything defined here.
//!
//! ## Wire compatibility
//!
//! Tag values and field order are part of the cross-cluster wire format and
//! must never change. Acknowledgment markers of the replication transport
//! share the same tag space but are handled elsewhere; their tags decode to
//! [`MarkerError::UnknownType`] here and callers drop them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::codec::{self, CodecError};
use crate::position::Position;

/// Numeric type tag identifying a marker kind in log-entry metadata.
///
/// Values are fixed by the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MarkerType {
    /// A snapshot coordinator asking every peer for its current position.
    SnapshotRequest = 10,
    /// A peer's answer to a [`MarkerType::SnapshotRequest`].
    SnapshotResponse = 11,
    /// The finalized cluster→position map of a completed snapshot round.
    Snapshot = 12,
    /// Instruction to move a named subscription's cursor.
    SubscriptionUpdate = 13,
}

impl MarkerType {
    /// Returns the wire tag value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Maps a wire tag back to a marker type, if known.
    pub const fn from_u32(value: u32) -> Option<Self> {
        match value {
            10 => Some(Self::SnapshotRequest),
            11 => Some(Self::SnapshotResponse),
            12 => Some(Self::Snapshot),
            13 => Some(Self::SubscriptionUpdate),
            _ => None,
        }
    }
}

impl fmt::Display for MarkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SnapshotRequest => "snapshot_request",
            Self::SnapshotResponse => "snapshot_response",
            Self::Snapshot => "snapshot",
            Self::SubscriptionUpdate => "subscription_update",
        };
        f.write_str(name)
    }
}

/// Error type for marker decoding.
#[derive(Debug, Snafu)]
pub enum MarkerError {
    /// The tag does not name a marker kind this protocol handles.
    #[snafu(display("unknown marker type tag {tag}"))]
    UnknownType {
        /// The unrecognized wire tag.
        tag: u32,
    },

    /// The payload bytes do not decode as the kind the tag promises.
    #[snafu(display("malformed {marker_type} payload: {source}"))]
    Malformed {
        /// The marker kind the tag named.
        marker_type: MarkerType,
        /// The underlying codec error.
        source: CodecError,
    },
}

/// Asks every peer cluster for the position of its latest durable entry.
///
/// One request marker is published per expected peer when a snapshot round
/// starts. Responses are matched back to the round by `snapshot_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Identifier of the snapshot round, unique among pending rounds.
    pub snapshot_id: String,
    /// Name of the cluster that initiated the round.
    pub source_cluster: String,
}

/// A peer cluster's answer to a [`SnapshotRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    /// Identifier of the round being answered.
    pub snapshot_id: String,
    /// Name of the cluster that initiated the round (the addressee).
    pub source_cluster: String,
    /// Name of the cluster producing this response.
    pub response_cluster: String,
    /// The responding cluster's current tail position.
    pub position: Position,
}

/// One `(cluster, position)` entry of a finalized snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterPosition {
    /// Cluster name.
    pub cluster: String,
    /// That cluster's position as of the snapshot round.
    pub position: Position,
}

/// The finalized result of a completed snapshot round.
///
/// Lists every participating cluster (the initiator included) with the
/// position up to which its data was observed, sorted by cluster name so
/// identical inputs always serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMarker {
    /// Identifier of the completed round.
    pub snapshot_id: String,
    /// Name-sorted cluster→position entries.
    pub clusters: Vec<ClusterPosition>,
}

impl SnapshotMarker {
    /// Builds a snapshot marker from a cluster→position map.
    ///
    /// The map's key ordering (`BTreeMap` iterates by name) fixes the
    /// deterministic entry order.
    pub fn from_positions(
        snapshot_id: impl Into<String>,
        positions: &BTreeMap<String, Position>,
    ) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            clusters: sorted_cluster_positions(positions),
        }
    }
}

/// Instructs every cluster to move the named subscription's cursor to its
/// own entry of the carried cluster→position map.
///
/// A cluster absent from `clusters` ignores the marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    /// Name of the subscription to update.
    pub subscription_name: String,
    /// Name-sorted cluster→position entries.
    pub clusters: Vec<ClusterPosition>,
}

impl SubscriptionUpdate {
    /// Builds an update marker from a cluster→position map, name-sorted.
    pub fn from_positions(
        subscription_name: impl Into<String>,
        positions: &BTreeMap<String, Position>,
    ) -> Self {
        Self {
            subscription_name: subscription_name.into(),
            clusters: sorted_cluster_positions(positions),
        }
    }

    /// Returns the position recorded for `cluster`, if any.
    pub fn position_for(&self, cluster: &str) -> Option<Position> {
        self.clusters
            .iter()
            .find(|entry| entry.cluster == cluster)
            .map(|entry| entry.position)
    }
}

fn sorted_cluster_positions(positions: &BTreeMap<String, Position>) -> Vec<ClusterPosition> {
    positions
        .iter()
        .map(|(cluster, position)| ClusterPosition {
            cluster: cluster.clone(),
            position: *position,
        })
        .collect()
}

/// A decoded marker: the closed set of control-message kinds, matched
/// exhaustively by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// See [`SnapshotRequest`].
    SnapshotRequest(SnapshotRequest),
    /// See [`SnapshotResponse`].
    SnapshotResponse(SnapshotResponse),
    /// See [`SnapshotMarker`].
    Snapshot(SnapshotMarker),
    /// See [`SubscriptionUpdate`].
    SubscriptionUpdate(SubscriptionUpdate),
}

impl Marker {
    /// Returns the wire tag for this marker's kind.
    pub fn marker_type(&self) -> MarkerType {
        match self {
            Self::SnapshotRequest(_) => MarkerType::SnapshotRequest,
            Self::SnapshotResponse(_) => MarkerType::SnapshotResponse,
            Self::Snapshot(_) => MarkerType::Snapshot,
            Self::SubscriptionUpdate(_) => MarkerType::SubscriptionUpdate,
        }
    }

    /// Encodes the payload (the tag travels separately in entry metadata).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::SnapshotRequest(request) => codec::encode(request),
            Self::SnapshotResponse(response) => codec::encode(response),
            Self::Snapshot(snapshot) => codec::encode(snapshot),
            Self::SubscriptionUpdate(update) => codec::encode(update),
        }
    }

    /// Decodes a payload by its wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`MarkerError::UnknownType`] for tags outside the handled
    /// set and [`MarkerError::Malformed`] when the payload bytes do not
    /// match the tagged kind.
    pub fn decode(tag: u32, payload: &[u8]) -> Result<Self, MarkerError> {
        let marker_type = MarkerType::from_u32(tag).ok_or(MarkerError::UnknownType { tag })?;
        match marker_type {
            MarkerType::SnapshotRequest => codec::decode(payload)
                .map(Self::SnapshotRequest)
                .context(MalformedSnafu { marker_type }),
            MarkerType::SnapshotResponse => codec::decode(payload)
                .map(Self::SnapshotResponse)
                .context(MalformedSnafu { marker_type }),
            MarkerType::Snapshot => codec::decode(payload)
                .map(Self::Snapshot)
                .context(MalformedSnafu { marker_type }),
            MarkerType::SubscriptionUpdate => codec::decode(payload)
                .map(Self::SubscriptionUpdate)
                .context(MalformedSnafu { marker_type }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags_are_stable() {
        assert_eq!(MarkerType::SnapshotRequest.as_u32(), 10);
        assert_eq!(MarkerType::SnapshotResponse.as_u32(), 11);
        assert_eq!(MarkerType::Snapshot.as_u32(), 12);
        assert_eq!(MarkerType::SubscriptionUpdate.as_u32(), 13);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let result = Marker::decode(99, &[]);
        assert!(matches!(result, Err(MarkerError::UnknownType { tag: 99 })));
    }

    #[test]
    fn test_decode_malformed_payload() {
        // Truncated bytes under a valid tag
        let result = Marker::decode(MarkerType::SnapshotRequest.as_u32(), &[0x05]);
        assert!(matches!(
            result,
            Err(MarkerError::Malformed {
                marker_type: MarkerType::SnapshotRequest,
                ..
            })
        ));
    }

    #[test]
    fn test_request_roundtrip_through_tag_dispatch() {
        let request = SnapshotRequest {
            snapshot_id: "round-1".to_string(),
            source_cluster: "east".to_string(),
        };
        let marker = Marker::SnapshotRequest(request.clone());
        let payload = marker.encode().expect("encode request");
        let decoded =
            Marker::decode(marker.marker_type().as_u32(), &payload).expect("decode request");
        assert_eq!(decoded, Marker::SnapshotRequest(request));
    }

    #[test]
    fn test_update_marker_is_name_sorted_and_deterministic() {
        // Insert in reverse order; BTreeMap still iterates name-sorted.
        let mut positions = BTreeMap::new();
        positions.insert("west".to_string(), Position::new(3, 3));
        positions.insert("central".to_string(), Position::new(2, 2));
        positions.insert("east".to_string(), Position::new(1, 1));

        let update = SubscriptionUpdate::from_positions("sub1", &positions);
        let names: Vec<&str> = update.clusters.iter().map(|c| c.cluster.as_str()).collect();
        assert_eq!(names, vec!["central", "east", "west"]);

        let again = SubscriptionUpdate::from_positions("sub1", &positions);
        let first = Marker::SubscriptionUpdate(update).encode().unwrap();
        let second = Marker::SubscriptionUpdate(again).encode().unwrap();
        assert_eq!(first, second, "identical inputs must serialize identically");
    }

    #[test]
    fn test_update_position_lookup() {
        let mut positions = BTreeMap::new();
        positions.insert("east".to_string(), Position::new(5, 10));
        let update = SubscriptionUpdate::from_positions("sub1", &positions);
        assert_eq!(update.position_for("east"), Some(Position::new(5, 10)));
        assert_eq!(update.position_for("west"), None);
    }
}
