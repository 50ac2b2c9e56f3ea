//! Wire types and configuration for the replicated-subscription snapshot
//! protocol.
//!
//! This crate provides the foundational types shared across clusters:
//! - Log positions ([`Position`])
//! - Marker payloads and their stable type tags ([`marker`])
//! - Centralized postcard serialization ([`codec`])
//! - Snapshot cycle configuration ([`config`])
//!
//! Marker payloads cross cluster boundaries, so everything here must stay
//! byte-compatible across versions. Keeping the wire types in their own
//! crate lets transport-side consumers avoid pulling in the protocol engine.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod marker;
pub mod position;

// Re-export commonly used types at crate root
pub use codec::{decode, encode, CodecError};
pub use config::{ConfigError, SnapshotConfig};
pub use marker::{
    ClusterPosition, Marker, MarkerError, MarkerType, SnapshotMarker, SnapshotRequest,
    SnapshotResponse, SubscriptionUpdate,
};
pub use position::Position;
