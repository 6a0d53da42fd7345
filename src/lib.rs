//! sitesync: two-way website file and database synchronizer with
//! point-in-time backups.
//!
//! The engine mirrors a site tree over rsync, moves the database through a
//! dump/import pipeline (direct connection or remote-shell-mediated),
//! rewrites site URLs after a pull and keeps zip backup archives with the
//! database dump bundled in. All state lives in an explicit
//! [`profile::ConnectionProfile`]; the orchestrator composes the engines
//! behind trait seams so each can be replaced in tests.

pub mod backup;
pub mod database;
pub mod error;
pub mod exclusion;
pub mod exec;
pub mod lock;
pub mod logging;
pub mod profile;
pub mod sync;
pub mod transfer;

pub use backup::{ArchiveBuilder, BackupArchive, DB_DUMP_ENTRY};
pub use database::DatabaseEngine;
pub use error::SyncError;
pub use exclusion::ExclusionSet;
pub use lock::ProfileLock;
pub use logging::{init_tracing, LogSink, LogStatus, TracingLogSink};
pub use profile::{ConnectionProfile, DbTarget, SshAuth};
pub use sync::{Direction, Orchestrator, SyncOperation, SyncStatus};
pub use transfer::FileTransferEngine;

// vim: ts=4
