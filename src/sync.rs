//! Sync orchestration.
//!
//! One `full_sync` invocation walks the stage sequence
//! `PreBackup (optional) -> TransferFiles -> TransferDatabase ->
//! RewriteUrls (pull only) -> Finalize`, records each stage outcome
//! independently and always reaches finalization: stage failures are logged
//! and aggregated, never thrown past this boundary. Stages are not rolled
//! back; a partial result leaves the target with whatever stages completed.
//!
//! The orchestrator runs one operation at a time with no internal
//! parallelism. Callers must not invoke it concurrently for the same
//! profile (the CLI serializes with a profile lock).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use crate::backup::BackupArchive;
use crate::error::{BackupError, DatabaseError, TransferError};
use crate::logging::{LogSink, LogStatus};
use crate::profile::ConnectionProfile;

/// Sync direction. Pull overwrites local state with remote state, push is
/// the inverse; both are destructive to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	Pull,
	Push,
}

impl FromStr for Direction {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"pull" => Ok(Direction::Pull),
			"push" => Ok(Direction::Push),
			_ => Err(format!("Unknown direction: {}. Valid options: pull, push", s)),
		}
	}
}

impl fmt::Display for Direction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Direction::Pull => write!(f, "pull"),
			Direction::Push => write!(f, "push"),
		}
	}
}

/// Terminal state of one sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
	/// Every attempted stage succeeded
	Completed,

	/// A stage failed but orchestration ran to completion
	PartiallyCompleted,

	/// An unrecoverable error stopped the run before any stage
	Aborted,
}

impl fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncStatus::Completed => write!(f, "completed"),
			SyncStatus::PartiallyCompleted => write!(f, "partially completed"),
			SyncStatus::Aborted => write!(f, "aborted"),
		}
	}
}

/// Aggregate record of one sync invocation. Immutable once finalized;
/// persisting it as a log entry belongs to the caller.
///
/// Stage outcomes are `None` when the stage was never attempted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
	pub direction: Direction,
	pub started_at: DateTime<Utc>,
	pub finished_at: DateTime<Utc>,
	pub files: Option<bool>,
	pub database: Option<bool>,
	pub url_rewrite: Option<bool>,
	pub elapsed_secs: f64,
	pub status: SyncStatus,
	/// Cause message when the run aborted
	pub message: Option<String>,
}

impl SyncOperation {
	fn start(direction: Direction) -> Self {
		let now = Utc::now();
		SyncOperation {
			direction,
			started_at: now,
			finished_at: now,
			files: None,
			database: None,
			url_rewrite: None,
			elapsed_secs: 0.0,
			status: SyncStatus::Aborted,
			message: None,
		}
	}

	fn finalize(&mut self, timer: Instant, aborted: bool) {
		self.finished_at = Utc::now();
		self.elapsed_secs = (timer.elapsed().as_millis() as f64) / 1000.0;
		if aborted {
			self.status = SyncStatus::Aborted;
			return;
		}
		let attempted: Vec<bool> =
			[self.files, self.database, self.url_rewrite].iter().flatten().copied().collect();
		self.status = if attempted.iter().all(|ok| *ok) {
			SyncStatus::Completed
		} else {
			SyncStatus::PartiallyCompleted
		};
	}
}

/// File Transfer Engine seam
#[async_trait]
pub trait FileSyncer: Send + Sync {
	/// Mirror the site tree in the given direction, one transport run
	async fn sync_files(
		&self,
		profile: &ConnectionProfile,
		direction: Direction,
	) -> Result<(), TransferError>;
}

/// Database Transfer Engine seam
#[async_trait]
pub trait DatabaseSyncer: Send + Sync {
	/// Export the remote database and import it locally
	async fn pull_database(&self, profile: &ConnectionProfile) -> Result<(), DatabaseError>;

	/// Export the local database to `out`
	async fn export_local(
		&self,
		profile: &ConnectionProfile,
		out: &Path,
	) -> Result<(), DatabaseError>;

	/// Deliver a local dump to the remote database and import it there
	async fn push_database(
		&self,
		profile: &ConnectionProfile,
		dump: &Path,
	) -> Result<(), DatabaseError>;

	/// Import a dump file into the local database
	async fn import_local(
		&self,
		profile: &ConnectionProfile,
		dump: &Path,
	) -> Result<(), DatabaseError>;

	/// Literal find/replace across all text columns; returns affected rows
	async fn rewrite_urls(
		&self,
		profile: &ConnectionProfile,
		search: &str,
		replace: &str,
	) -> Result<u64, DatabaseError>;
}

/// Archive Builder seam
#[async_trait]
pub trait BackupMaker: Send + Sync {
	async fn create_backup(&self, profile: &ConnectionProfile)
		-> Result<BackupArchive, BackupError>;
}

/// Composes file transfer, database transfer, URL rewrite and pre-sync
/// backups into one pull or push operation
pub struct Orchestrator {
	files: Arc<dyn FileSyncer>,
	database: Arc<dyn DatabaseSyncer>,
	backup: Arc<dyn BackupMaker>,
	log: Arc<dyn LogSink>,
}

impl Orchestrator {
	pub fn new(
		files: Arc<dyn FileSyncer>,
		database: Arc<dyn DatabaseSyncer>,
		backup: Arc<dyn BackupMaker>,
		log: Arc<dyn LogSink>,
	) -> Self {
		Orchestrator { files, database, backup, log }
	}

	/// Run a full sync in the given direction. Never returns an error:
	/// stage failures are recorded in the returned operation so result
	/// reporting and last-sync bookkeeping always happen.
	pub async fn full_sync(
		&self,
		profile: &ConnectionProfile,
		direction: Direction,
	) -> SyncOperation {
		let timer = Instant::now();
		let mut op = SyncOperation::start(direction);
		let dir_name = direction.to_string();

		if let Err(e) = profile.validate_sync() {
			self.log.record("full", &dir_name, LogStatus::Error, &e.to_string());
			op.message = Some(e.to_string());
			op.finalize(timer, true);
			return op;
		}

		// Pushing overwrites the remote, so a safety backup is mandatory;
		// pulling only risks local state and backs up on request
		let want_backup = match direction {
			Direction::Push => true,
			Direction::Pull => profile.backup_before_pull,
		};
		if want_backup {
			match self.backup.create_backup(profile).await {
				Ok(archive) => {
					self.log.record(
						"backup",
						&dir_name,
						LogStatus::Success,
						&format!("Pre-sync backup created: {}", archive.name),
					);
				}
				Err(e) => {
					// A failed safety net is logged, not fatal
					self.log.record(
						"backup",
						&dir_name,
						LogStatus::Warning,
						&format!("Pre-sync backup failed, continuing: {}", e),
					);
				}
			}
		}

		match direction {
			Direction::Pull => {
				op.files = Some(self.run_files(profile, direction).await);
				op.database = Some(self.run_pull_database(profile).await);
				// Rewrite only makes sense over a freshly imported database
				if op.database == Some(true) {
					op.url_rewrite = Some(
						self.run_rewrite(profile, &profile.remote_url, &profile.local_url).await,
					);
				}
			}
			Direction::Push => {
				// Capture the local database before files move; the gap
				// between the two snapshots is accepted by design
				let dump_path = profile
					.backup_dir()
					.join(format!("db-export-{}.sql", Utc::now().format("%Y-%m-%d-%H-%M-%S")));
				let exported = match fs::create_dir_all(profile.backup_dir()) {
					Ok(()) => self.run_export_local(profile, &dump_path).await,
					Err(e) => {
						self.log.record(
							"database",
							&dir_name,
							LogStatus::Error,
							&format!("Cannot prepare dump directory: {}", e),
						);
						false
					}
				};
				op.files = Some(self.run_files(profile, direction).await);
				op.database = Some(if exported {
					self.run_push_database(profile, &dump_path).await
				} else {
					false
				});
			}
		}

		op.finalize(timer, false);
		let summary = format!(
			"Completed in {:.2} seconds (files: {:?}, database: {:?}, url_rewrite: {:?})",
			op.elapsed_secs, op.files, op.database, op.url_rewrite
		);
		let status = match op.status {
			SyncStatus::Completed => LogStatus::Success,
			_ => LogStatus::Warning,
		};
		self.log.record("full", &dir_name, status, &summary);
		op
	}

	async fn run_files(&self, profile: &ConnectionProfile, direction: Direction) -> bool {
		let dir_name = direction.to_string();
		match self.files.sync_files(profile, direction).await {
			Ok(()) => {
				self.log.record("files", &dir_name, LogStatus::Success, "Files synced successfully");
				true
			}
			Err(e) => {
				self.log.record("files", &dir_name, LogStatus::Error, &e.to_string());
				false
			}
		}
	}

	async fn run_pull_database(&self, profile: &ConnectionProfile) -> bool {
		match self.database.pull_database(profile).await {
			Ok(()) => {
				self.log.record(
					"database",
					"pull",
					LogStatus::Success,
					"Database imported successfully",
				);
				true
			}
			Err(e) => {
				self.log.record("database", "pull", LogStatus::Error, &e.to_string());
				false
			}
		}
	}

	async fn run_export_local(&self, profile: &ConnectionProfile, out: &Path) -> bool {
		match self.database.export_local(profile, out).await {
			Ok(()) => {
				self.log.record("database", "push", LogStatus::Info, "Local database exported");
				true
			}
			Err(e) => {
				self.log.record("database", "push", LogStatus::Error, &e.to_string());
				false
			}
		}
	}

	async fn run_push_database(&self, profile: &ConnectionProfile, dump: &Path) -> bool {
		match self.database.push_database(profile, dump).await {
			Ok(()) => {
				self.log.record(
					"database",
					"push",
					LogStatus::Success,
					"Database imported to remote successfully",
				);
				true
			}
			Err(e) => {
				self.log.record("database", "push", LogStatus::Error, &e.to_string());
				false
			}
		}
	}

	async fn run_rewrite(&self, profile: &ConnectionProfile, search: &str, replace: &str) -> bool {
		match self.database.rewrite_urls(profile, search, replace).await {
			Ok(rows) => {
				// Zero rows updated is a valid outcome, not an error
				self.log.record(
					"search_replace",
					"pull",
					LogStatus::Success,
					&format!("URL rewrite updated {} rows", rows),
				);
				true
			}
			Err(e) => {
				self.log.record("search_replace", "pull", LogStatus::Error, &e.to_string());
				false
			}
		}
	}
}


// vim: ts=4
