//! Real-time progress engine for AGENTS.md generation runs.
//!
//! A generation backend streams agent activity for every codebase of a
//! repository over server-sent events. This crate turns that channel into an
//! ordered, bounded event sequence ([`stream`]), classifies each event
//! ([`events`]), folds it into a per-codebase progress matrix and the final
//! documentation artifact ([`progress`]) and keeps one session per
//! repository ([`session`]). A stored snapshot of a finished run can be
//! loaded in place of the live channel.

pub mod config;
pub mod display;
pub mod errors;
pub mod events;
pub mod mock;
pub mod progress;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod ui;
