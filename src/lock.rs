//! Profile-keyed mutual exclusion.
//!
//! The engine itself runs one operation at a time; serializing invocations
//! is the caller's duty. The CLI discharges it with a lock file per profile
//! under the state directory, created with `create_new` so two processes
//! can never both hold it. The lock is removed when the guard drops.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::exec::state_dir;
use crate::logging::debug;

pub struct ProfileLock {
	path: PathBuf,
}

impl ProfileLock {
	/// Acquire the lock for a profile in the default state directory
	pub fn acquire(profile_name: &str) -> Result<Self, SyncError> {
		Self::acquire_in(&state_dir()?, profile_name)
	}

	pub fn acquire_in(dir: &Path, profile_name: &str) -> Result<Self, SyncError> {
		let path = dir.join(format!("{}.lock", profile_name));
		match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
			Ok(mut file) => {
				let _ = writeln!(file, "{}", std::process::id());
				debug!("acquired profile lock {}", path.display());
				Ok(ProfileLock { path })
			}
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
				Err(SyncError::LockFailed {
					message: format!(
						"another operation is running for this profile (lock file: {})",
						path.display()
					),
				})
			}
			Err(e) => Err(SyncError::Io(e)),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Drop for ProfileLock {
	fn drop(&mut self) {
		if let Err(e) = fs::remove_file(&self.path) {
			debug!("could not remove lock file {}: {}", self.path.display(), e);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lock_is_exclusive_and_released_on_drop() {
		let dir = tempfile::tempdir().unwrap();
		let lock = ProfileLock::acquire_in(dir.path(), "default").unwrap();
		assert!(lock.path().exists());

		match ProfileLock::acquire_in(dir.path(), "default") {
			Err(SyncError::LockFailed { .. }) => {}
			other => panic!("expected LockFailed, got {:?}", other.map(|l| l.path().to_path_buf())),
		}

		let path = lock.path().to_path_buf();
		drop(lock);
		assert!(!path.exists());

		// Reacquirable once released
		let lock = ProfileLock::acquire_in(dir.path(), "default").unwrap();
		drop(lock);
	}

	#[test]
	fn test_different_profiles_do_not_contend() {
		let dir = tempfile::tempdir().unwrap();
		let _a = ProfileLock::acquire_in(dir.path(), "staging").unwrap();
		let _b = ProfileLock::acquire_in(dir.path(), "production").unwrap();
	}
}

// vim: ts=4
