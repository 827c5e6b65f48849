//! Progress bookkeeping: the agent registry, the per-codebase matrix and the
//! final artifact (live or restored from a snapshot).

pub mod agents;
pub mod artifact;
pub mod markdown;
pub mod matrix;
pub mod snapshot;

pub use agents::{AgentRef, TrackedAgents};
pub use artifact::{AgentMdOutput, AggregatedArtifact};
pub use matrix::{
    AgentProgress, AgentStatus, Applied, CodebaseProgress, CodebaseStatus, MatrixSettings,
    ProgressMatrix,
};
pub use snapshot::{PersistedSnapshot, SnapshotStatus, normalize_progress};
