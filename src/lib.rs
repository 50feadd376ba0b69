//! # netassure
//!
//! A client for network-assurance backends that organize collected network
//! state into point-in-time snapshots.
//!
//! The crate covers the parts of the API with real state behind them:
//! resolving symbolic snapshot references, sweeping paginated table queries,
//! and driving the snapshot lifecycle (load, unload, lock, unlock, download)
//! through asynchronous backend jobs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── Session ────────────────────────────┐
//! │  active snapshot ──▶ SnapshotRegistry ($last/$prev/...)          │
//! │                                                                  │
//! │  SnapshotLifecycle ──▶ JobTracker ──▶ QueryEngine (pages)        │
//! └───────────────┬──────────────────────────────┬───────────────────┘
//!                 ▼                              ▼
//!            Transport (trait) ──────────▶ HttpTransport (reqwest)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! netassure snapshots                       # list snapshots with aliases
//! netassure query tables/inventory/devices --columns hostname,siteName
//! netassure lock '$last'
//! netassure download '$prev' --out ./archives
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Snapshot, page, and job records |
//! | [`transport`] | Backend transport trait and HTTP implementation |
//! | [`query`] | Table queries, pagination, column discovery |
//! | [`registry`] | Snapshot registry and symbolic references |
//! | [`backoff`] | Polling schedules |
//! | [`jobs`] | Backend job tracking |
//! | [`lifecycle`] | Snapshot state transitions and downloads |
//! | [`session`] | Per-connection entry point |
//! | [`logging`] | Subscriber setup for the CLI |
//! | [`commands`] | CLI subcommand implementations |

pub mod backoff;
pub mod commands;
pub mod config;
pub mod error;
pub mod jobs;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod query;
pub mod registry;
pub mod session;
pub mod transport;

pub use error::{ClientError, Result};
