//! Error types for sitesync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Top-level error type for the CLI surface. Stage errors
/// ([`TransferError`], [`DatabaseError`]) stay inside the orchestrator,
/// which folds them into stage outcomes instead of raising them; only the
/// operations that fail a whole command end up here.
#[derive(Debug)]
pub enum SyncError {
	/// Invalid or incomplete connection profile
	Config(ConfigError),

	/// Backup creation or management failed
	Backup(BackupError),

	/// Backup restore failed
	Restore(RestoreError),

	/// Another operation holds the profile lock
	LockFailed { message: String },

	/// I/O error
	Io(io::Error),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Config(e) => write!(f, "Configuration error: {}", e),
			SyncError::Backup(e) => write!(f, "Backup error: {}", e),
			SyncError::Restore(e) => write!(f, "Restore error: {}", e),
			SyncError::LockFailed { message } => write!(f, "Lock acquisition failed: {}", message),
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<ConfigError> for SyncError {
	fn from(e: ConfigError) -> Self {
		SyncError::Config(e)
	}
}

impl From<BackupError> for SyncError {
	fn from(e: BackupError) -> Self {
		SyncError::Backup(e)
	}
}

impl From<RestoreError> for SyncError {
	fn from(e: RestoreError) -> Self {
		SyncError::Restore(e)
	}
}

/// Connection profile validation and loading errors
///
/// Raised before any stage runs; a sync never makes a partial attempt
/// with an incomplete profile.
#[derive(Debug)]
pub enum ConfigError {
	/// A required connection field is empty
	MissingField { field: &'static str },

	/// Profile file could not be read
	ReadFailed { path: String, source: io::Error },

	/// Profile file could not be parsed
	ParseFailed { path: String, message: String },

	/// Profile file could not be written
	WriteFailed { path: String, source: io::Error },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::MissingField { field } => {
				write!(f, "Required profile field is not set: {}", field)
			}
			ConfigError::ReadFailed { path, source } => {
				write!(f, "Cannot read profile {}: {}", path, source)
			}
			ConfigError::ParseFailed { path, message } => {
				write!(f, "Cannot parse profile {}: {}", path, message)
			}
			ConfigError::WriteFailed { path, source } => {
				write!(f, "Cannot write profile {}: {}", path, source)
			}
		}
	}
}

impl Error for ConfigError {}

/// External command execution errors
#[derive(Debug)]
pub enum ExecError {
	/// Required external executable was not found on this host
	ToolUnavailable { tool: String },

	/// Subprocess spawn failed
	SpawnFailed { program: String, source: io::Error },

	/// Transient credential file could not be created
	SecretFileFailed { source: io::Error },
}

impl fmt::Display for ExecError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExecError::ToolUnavailable { tool } => {
				write!(f, "Required tool not found: {}", tool)
			}
			ExecError::SpawnFailed { program, source } => {
				write!(f, "Failed to spawn '{}': {}", program, source)
			}
			ExecError::SecretFileFailed { source } => {
				write!(f, "Failed to create credential file: {}", source)
			}
		}
	}
}

impl Error for ExecError {}

/// File transfer errors, classified for operator messaging
#[derive(Debug)]
pub enum TransferError {
	/// The remote tree root does not exist; surfaced separately so the
	/// caller can point the operator at the remote path setting
	RemotePathNotFound { path: String, detail: String },

	/// Transport exited non-zero for any other reason
	CommandFailed { status: i32, detail: String },

	/// Command execution failed before the transport ran
	Exec(ExecError),
}

impl fmt::Display for TransferError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransferError::RemotePathNotFound { path, detail } => {
				write!(
					f,
					"Remote directory not found: {}. Verify the remote site path setting. ({})",
					path, detail
				)
			}
			TransferError::CommandFailed { status, detail } => {
				write!(f, "File sync failed with status {}: {}", status, detail)
			}
			TransferError::Exec(e) => write!(f, "{}", e),
		}
	}
}

impl Error for TransferError {}

impl From<ExecError> for TransferError {
	fn from(e: ExecError) -> Self {
		TransferError::Exec(e)
	}
}

/// Database transfer errors
#[derive(Debug)]
pub enum DatabaseError {
	/// Could not open a connection to the target database
	ConnectionFailed { target: String, source: sqlx::Error },

	/// All export strategies failed
	ExportFailed { detail: String },

	/// Import could not proceed at all (statement-level failures are
	/// counted during a best-effort import, not raised)
	ImportFailed { detail: String },

	/// Dump artifact is below the minimum sanity size
	UndersizedDump { path: String, size: u64 },

	/// Query failed outside of a best-effort import
	Sql(sqlx::Error),

	/// Command execution failed
	Exec(ExecError),

	/// I/O error while handling a dump file
	Io(io::Error),
}

impl fmt::Display for DatabaseError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DatabaseError::ConnectionFailed { target, source } => {
				write!(f, "Cannot connect to database {}: {}", target, source)
			}
			DatabaseError::ExportFailed { detail } => {
				write!(f, "Database export failed: {}", detail)
			}
			DatabaseError::ImportFailed { detail } => {
				write!(f, "Database import failed: {}", detail)
			}
			DatabaseError::UndersizedDump { path, size } => {
				write!(f, "Dump {} is only {} bytes, treating as invalid", path, size)
			}
			DatabaseError::Sql(e) => write!(f, "Query failed: {}", e),
			DatabaseError::Exec(e) => write!(f, "{}", e),
			DatabaseError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for DatabaseError {}

impl From<sqlx::Error> for DatabaseError {
	fn from(e: sqlx::Error) -> Self {
		DatabaseError::Sql(e)
	}
}

impl From<ExecError> for DatabaseError {
	fn from(e: ExecError) -> Self {
		DatabaseError::Exec(e)
	}
}

impl From<io::Error> for DatabaseError {
	fn from(e: io::Error) -> Self {
		DatabaseError::Io(e)
	}
}

/// Backup archive creation and management errors
#[derive(Debug)]
pub enum BackupError {
	/// Archive container could not be created or sealed
	ArchiveFailed { path: String, message: String },

	/// Supplied backup name resolves outside the backup directory
	OutsideBackupDir { path: String },

	/// Named backup does not exist
	NotFound { path: String },

	/// I/O error while building the archive
	Io(io::Error),
}

impl fmt::Display for BackupError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BackupError::ArchiveFailed { path, message } => {
				write!(f, "Could not create backup archive {}: {}", path, message)
			}
			BackupError::OutsideBackupDir { path } => {
				write!(f, "Refusing to touch {}: outside the backup directory", path)
			}
			BackupError::NotFound { path } => write!(f, "Backup not found: {}", path),
			BackupError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for BackupError {}

impl From<io::Error> for BackupError {
	fn from(e: io::Error) -> Self {
		BackupError::Io(e)
	}
}

/// Backup restore errors
#[derive(Debug)]
pub enum RestoreError {
	/// Supplied backup name resolves outside the backup directory
	OutsideBackupDir { path: String },

	/// Named backup does not exist
	NotFound { path: String },

	/// Archive entry would escape the site root
	UnsafeEntry { name: String },

	/// Archive could not be opened or read
	ArchiveFailed { path: String, message: String },

	/// Database import of the bundled dump failed
	Database(DatabaseError),

	/// I/O error while extracting
	Io(io::Error),
}

impl fmt::Display for RestoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RestoreError::OutsideBackupDir { path } => {
				write!(f, "Refusing to restore {}: outside the backup directory", path)
			}
			RestoreError::NotFound { path } => write!(f, "Backup not found: {}", path),
			RestoreError::UnsafeEntry { name } => {
				write!(f, "Archive entry {} would escape the site root", name)
			}
			RestoreError::ArchiveFailed { path, message } => {
				write!(f, "Could not read backup archive {}: {}", path, message)
			}
			RestoreError::Database(e) => write!(f, "Bundled dump import failed: {}", e),
			RestoreError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for RestoreError {}

impl From<DatabaseError> for RestoreError {
	fn from(e: DatabaseError) -> Self {
		RestoreError::Database(e)
	}
}

impl From<io::Error> for RestoreError {
	fn from(e: io::Error) -> Self {
		RestoreError::Io(e)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_umbrella_conversions() {
		let e: SyncError = ConfigError::MissingField { field: "ssh_host" }.into();
		assert!(matches!(e, SyncError::Config(_)));
		assert!(e.to_string().contains("ssh_host"));

		let e: SyncError = BackupError::NotFound { path: "x.zip".to_string() }.into();
		assert!(matches!(e, SyncError::Backup(_)));
		assert!(e.to_string().contains("x.zip"));

		let e: SyncError = RestoreError::UnsafeEntry { name: "../etc/passwd".to_string() }.into();
		assert!(matches!(e, SyncError::Restore(_)));
		assert!(e.to_string().contains("../etc/passwd"));

		let e: SyncError = "sync partially completed".to_string().into();
		assert!(matches!(e, SyncError::Other { .. }));

		let e: SyncError = io::Error::other("disk full").into();
		assert!(matches!(e, SyncError::Io(_)));
	}

	#[test]
	fn test_nested_display_keeps_context() {
		let e = RestoreError::Database(DatabaseError::ImportFailed {
			detail: "cannot read dump".to_string(),
		});
		let e: SyncError = e.into();
		assert!(e.to_string().contains("cannot read dump"));
	}
}

// vim: ts=4
