//! CLI command implementations.
//!
//! | Module        | Commands handled |
//! |---------------|------------------|
//! | `watch`       | `Watch`          |
//! | `snapshot`    | `Snapshot`       |
//! | `replay`      | `Replay`         |
//! | `mock_server` | `MockServer`     |
//! | `config`      | `Config`         |

pub mod config;
pub mod mock_server;
pub mod replay;
pub mod snapshot;
pub mod watch;

pub use config::cmd_config;
pub use mock_server::cmd_mock_server;
pub use replay::cmd_replay;
pub use snapshot::cmd_snapshot;
pub use watch::{WatchArgs, cmd_watch};
