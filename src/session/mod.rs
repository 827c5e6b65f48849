//! Generation sessions: per-repository state, the registry that owns them
//! and the backend they talk to.

pub mod backend;
pub mod registry;
pub mod state;

pub use backend::{GenerationBackend, HttpBackend};
pub use registry::{SessionRegistry, SessionSettings, Transition};
pub use state::{ConnectionState, GenerationSession, SessionKey};
