//! Point-in-time backup archives.
//!
//! A backup is one zip archive holding the site tree (minus exclusions) with
//! the local database dump sealed in under the reserved entry name
//! [`DB_DUMP_ENTRY`]. Archives are built next to their final location under a
//! `.part` name and renamed once complete, so a listing never shows a
//! half-written backup. A failed database dump degrades the backup to
//! files-only instead of failing it.
//!
//! Every operation that takes a backup name resolves it against the backup
//! directory and refuses names that land outside it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zip::write::{SimpleFileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

use crate::error::{BackupError, RestoreError};
use crate::exclusion::ExclusionSet;
use crate::logging::{info, warn};
use crate::profile::ConnectionProfile;
use crate::sync::{BackupMaker, DatabaseSyncer};

/// Reserved archive entry holding the bundled database dump. Site files are
/// stored at their site-relative paths and can never collide with it because
/// the dump is staged outside the walked tree.
pub const DB_DUMP_ENTRY: &str = "database-backup.sql";

/// One backup archive on disk
#[derive(Debug, Clone, Serialize)]
pub struct BackupArchive {
	/// File name within the backup directory, `backup-<timestamp>.zip`
	pub name: String,

	#[serde(skip)]
	pub path: PathBuf,

	pub size: u64,

	pub created: DateTime<Utc>,

	/// False for a degraded, files-only archive
	pub includes_database: bool,
}

/// Builds, restores and manages backup archives
pub struct ArchiveBuilder {
	database: Arc<dyn DatabaseSyncer>,
}

impl ArchiveBuilder {
	pub fn new(database: Arc<dyn DatabaseSyncer>) -> Self {
		ArchiveBuilder { database }
	}

	/// Profile exclusions plus the backup directory itself when it lives
	/// inside the site root
	fn exclusions(profile: &ConnectionProfile) -> ExclusionSet {
		let set = ExclusionSet::new(profile.exclude_paths.clone());
		match profile.backup_dir().strip_prefix(&profile.site_root) {
			Ok(rel) if !rel.as_os_str().is_empty() => set.with_forced(&rel.to_string_lossy()),
			_ => set,
		}
	}

	pub async fn create(&self, profile: &ConnectionProfile) -> Result<BackupArchive, BackupError> {
		let backup_dir = profile.backup_dir();
		fs::create_dir_all(&backup_dir)?;

		let stamp = Utc::now().format("%Y-%m-%d-%H-%M-%S");
		let name = format!("backup-{}.zip", stamp);
		let final_path = backup_dir.join(&name);
		let part_path = backup_dir.join(format!("{}.part", name));
		let dump_path = backup_dir.join(format!("db-temp-{}.sql", stamp));

		// Files-only degradation: the tree snapshot is still worth keeping
		// when the dump fails
		let includes_database = match self.database.export_local(profile, &dump_path).await {
			Ok(()) => true,
			Err(e) => {
				warn!("database dump failed, creating files-only backup: {}", e);
				false
			}
		};

		let result = self.write_archive(profile, &part_path, includes_database.then_some(dump_path.as_path()));
		// The staged dump never outlives archive creation
		let _ = fs::remove_file(&dump_path);

		if let Err(e) = result {
			let _ = fs::remove_file(&part_path);
			return Err(e);
		}

		// Seal: the archive only becomes visible under its final name
		fs::rename(&part_path, &final_path)?;
		let size = fs::metadata(&final_path)?.len();
		info!("backup created: {} ({} bytes)", name, size);
		Ok(BackupArchive {
			name,
			path: final_path,
			size,
			created: Utc::now(),
			includes_database,
		})
	}

	fn write_archive(
		&self,
		profile: &ConnectionProfile,
		part_path: &Path,
		dump: Option<&Path>,
	) -> Result<(), BackupError> {
		let excludes = Self::exclusions(profile);
		let file = File::create(part_path)?;
		let mut writer = ZipWriter::new(file);
		let options = SimpleFileOptions::default()
			.compression_method(CompressionMethod::Deflated)
			.unix_permissions(0o644);

		let walk = ignore::WalkBuilder::new(&profile.site_root)
			.standard_filters(false)
			.follow_links(false)
			.build();
		for entry in walk {
			let entry = match entry {
				Ok(entry) => entry,
				Err(e) => {
					warn!("skipping unreadable entry: {}", e);
					continue;
				}
			};
			if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
				continue;
			}
			let rel = match entry.path().strip_prefix(&profile.site_root) {
				Ok(rel) => rel,
				Err(_) => continue,
			};
			if excludes.matches_path(rel) {
				continue;
			}
			let entry_name = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
			writer
				.start_file(entry_name, options)
				.map_err(|e| archive_failed(part_path, e))?;
			let mut source = match File::open(entry.path()) {
				Ok(source) => source,
				Err(e) => {
					// Live sites drop transient files mid-walk
					warn!("skipping {}: {}", entry.path().display(), e);
					continue;
				}
			};
			io::copy(&mut source, &mut writer)?;
		}

		if let Some(dump) = dump {
			writer
				.start_file(DB_DUMP_ENTRY, options)
				.map_err(|e| archive_failed(part_path, e))?;
			let mut source = File::open(dump)?;
			io::copy(&mut source, &mut writer)?;
		}

		writer.finish().map_err(|e| archive_failed(part_path, e))?;
		Ok(())
	}

	/// Archives in the backup directory, newest first
	pub fn list(&self, profile: &ConnectionProfile) -> Result<Vec<BackupArchive>, BackupError> {
		let backup_dir = profile.backup_dir();
		if !backup_dir.is_dir() {
			return Ok(Vec::new());
		}
		let mut backups = Vec::new();
		for entry in fs::read_dir(&backup_dir)? {
			let entry = entry?;
			let path = entry.path();
			if path.extension().map(|e| e == "zip").unwrap_or(false) && path.is_file() {
				let meta = entry.metadata()?;
				let created = meta
					.modified()
					.map(DateTime::<Utc>::from)
					.unwrap_or_else(|_| Utc::now());
				let includes_database = File::open(&path)
					.ok()
					.and_then(|f| ZipArchive::new(f).ok())
					.map(|a| a.index_for_name(DB_DUMP_ENTRY).is_some())
					.unwrap_or(false);
				backups.push(BackupArchive {
					name: entry.file_name().to_string_lossy().into_owned(),
					path,
					size: meta.len(),
					created,
					includes_database,
				});
			}
		}
		backups.sort_by(|a, b| b.created.cmp(&a.created));
		Ok(backups)
	}

	pub fn delete(&self, profile: &ConnectionProfile, name: &str) -> Result<(), BackupError> {
		let path = resolve_backup(&profile.backup_dir(), name)?;
		fs::remove_file(&path)?;
		info!("backup deleted: {}", name);
		Ok(())
	}

	pub fn delete_all(&self, profile: &ConnectionProfile) -> Result<usize, BackupError> {
		let mut deleted = 0;
		for backup in self.list(profile)? {
			fs::remove_file(&backup.path)?;
			deleted += 1;
		}
		info!("deleted {} backup archive(s)", deleted);
		Ok(deleted)
	}

	/// Extract a backup over the site root and import its bundled dump into
	/// the local database when one is present
	pub async fn restore(
		&self,
		profile: &ConnectionProfile,
		name: &str,
	) -> Result<(), RestoreError> {
		let backup_dir = profile.backup_dir();
		let path = resolve_backup(&backup_dir, name).map_err(|e| match e {
			BackupError::OutsideBackupDir { path } => RestoreError::OutsideBackupDir { path },
			BackupError::NotFound { path } => RestoreError::NotFound { path },
			BackupError::ArchiveFailed { path, message } => {
				RestoreError::ArchiveFailed { path, message }
			}
			BackupError::Io(e) => RestoreError::Io(e),
		})?;

		let file = File::open(&path)?;
		let mut archive = ZipArchive::new(file).map_err(|e| RestoreError::ArchiveFailed {
			path: path.display().to_string(),
			message: e.to_string(),
		})?;
		fs::create_dir_all(&profile.site_root)?;

		let stamp = Utc::now().format("%Y-%m-%d-%H-%M-%S");
		let staged_dump = backup_dir.join(format!("restore-db-{}.sql", stamp));
		let mut has_dump = false;

		for idx in 0..archive.len() {
			let mut entry = archive.by_index(idx).map_err(|e| RestoreError::ArchiveFailed {
				path: path.display().to_string(),
				message: e.to_string(),
			})?;
			// enclosed_name rejects absolute paths and parent-dir escapes
			let rel = entry
				.enclosed_name()
				.ok_or_else(|| RestoreError::UnsafeEntry { name: entry.name().to_string() })?;
			if entry.is_dir() {
				continue;
			}
			let dest = if entry.name() == DB_DUMP_ENTRY {
				has_dump = true;
				staged_dump.clone()
			} else {
				profile.site_root.join(&rel)
			};
			if let Some(parent) = dest.parent() {
				fs::create_dir_all(parent)?;
			}
			let mut out = File::create(&dest)?;
			io::copy(&mut entry, &mut out)?;
		}

		let result = if has_dump {
			self.database
				.import_local(profile, &staged_dump)
				.await
				.map_err(RestoreError::from)
		} else {
			Ok(())
		};
		let _ = fs::remove_file(&staged_dump);
		result?;

		info!("backup restored: {}", name);
		Ok(())
	}
}

#[async_trait]
impl BackupMaker for ArchiveBuilder {
	async fn create_backup(
		&self,
		profile: &ConnectionProfile,
	) -> Result<BackupArchive, BackupError> {
		self.create(profile).await
	}
}

fn archive_failed(path: &Path, e: zip::result::ZipError) -> BackupError {
	BackupError::ArchiveFailed { path: path.display().to_string(), message: e.to_string() }
}

/// Resolve a backup name inside the backup directory, refusing anything
/// that points outside it
fn resolve_backup(backup_dir: &Path, name: &str) -> Result<PathBuf, BackupError> {
	if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
		return Err(BackupError::OutsideBackupDir { path: name.to_string() });
	}
	let path = backup_dir.join(name);
	if !path.is_file() {
		return Err(BackupError::NotFound { path: path.display().to_string() });
	}
	// Symlinked names must not escape either
	let canonical = path.canonicalize()?;
	let canonical_dir = backup_dir.canonicalize()?;
	if !canonical.starts_with(&canonical_dir) {
		return Err(BackupError::OutsideBackupDir { path: path.display().to_string() });
	}
	Ok(path)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_resolve_rejects_traversal_names() {
		let dir = tempfile::tempdir().unwrap();
		for name in ["../evil.zip", "a/b.zip", "..", ""] {
			assert!(matches!(
				resolve_backup(dir.path(), name),
				Err(BackupError::OutsideBackupDir { .. })
			));
		}
	}

	#[test]
	fn test_resolve_missing_backup() {
		let dir = tempfile::tempdir().unwrap();
		assert!(matches!(
			resolve_backup(dir.path(), "backup-2024-01-01-00-00-00.zip"),
			Err(BackupError::NotFound { .. })
		));
	}

	#[test]
	fn test_resolve_symlink_escape() {
		let dir = tempfile::tempdir().unwrap();
		let outside = tempfile::NamedTempFile::new().unwrap();
		let link = dir.path().join("sneaky.zip");
		#[cfg(unix)]
		{
			std::os::unix::fs::symlink(outside.path(), &link).unwrap();
			assert!(matches!(
				resolve_backup(dir.path(), "sneaky.zip"),
				Err(BackupError::OutsideBackupDir { .. })
			));
		}
	}

	#[test]
	fn test_resolve_plain_name() {
		let dir = tempfile::tempdir().unwrap();
		let name = "backup-2024-01-01-00-00-00.zip";
		std::fs::write(dir.path().join(name), b"zip").unwrap();
		let resolved = resolve_backup(dir.path(), name).unwrap();
		assert_eq!(resolved, dir.path().join(name));
	}
}

// vim: ts=4
