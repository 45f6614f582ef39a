//! `packwave-waves` — wave batching domain.
//!
//! A wave is a batch of demand documents released together so their
//! allocation and pick-work are computed and dispatched as one unit. The
//! clusterer proposes waves; it never commits anything.

pub mod cluster;
pub mod wave;

pub use cluster::{suggest_clusters, Cluster, ClusterCandidate, ClusterParams, ClusterSize};
pub use wave::{
    AddDocument, CancelWave, MarkCompleted, MarkReleased, OpenWave, Wave, WaveCommand, WaveEvent,
    WaveId, WaveStats, WaveStatus,
};
