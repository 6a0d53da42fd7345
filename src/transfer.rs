//! File transfer engine.
//!
//! One rsync invocation mirrors the whole site tree per sync, in either
//! direction. rsync owns change detection, deletion propagation and
//! compression; this module only builds the invocation, applies the
//! profile's exclusions and classifies failures for operator messaging.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::TransferError;
use crate::exec::{CommandOutput, CommandRunner, Invocation, PreparedCommand, RemoteShell, require_tool};
use crate::exclusion::ExclusionSet;
use crate::logging::info;
use crate::profile::ConnectionProfile;
use crate::sync::{Direction, FileSyncer};

pub struct FileTransferEngine {
	runner: Arc<dyn CommandRunner>,
}

impl FileTransferEngine {
	pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
		FileTransferEngine { runner }
	}

	/// Effective exclusion set: the profile's patterns plus the backup
	/// directory whenever it lives inside the site root. Backups must never
	/// travel with the site tree.
	fn exclusions(profile: &ConnectionProfile) -> ExclusionSet {
		let set = ExclusionSet::new(profile.exclude_paths.clone());
		match profile.backup_dir().strip_prefix(&profile.site_root) {
			Ok(rel) if !rel.as_os_str().is_empty() => {
				set.with_forced(&rel.to_string_lossy())
			}
			_ => set,
		}
	}

	/// Build the rsync invocation for one mirror run. Pure with respect to
	/// the filesystem apart from tool discovery.
	pub fn build_invocation(
		&self,
		profile: &ConnectionProfile,
		direction: Direction,
	) -> Result<PreparedCommand, TransferError> {
		let rsync = require_tool("rsync")?;
		let shell = RemoteShell::from_profile(profile);

		let mut invocation = Invocation::new(rsync)
			.arg("-avz")
			.arg("--delete")
			.arg("-e")
			.arg(shell.rsync_transport());
		invocation = invocation.args(Self::exclusions(profile).to_rsync_args());

		// Trailing slash on the source: mirror the tree's contents, not the
		// directory itself
		let local_src = format!("{}/", profile.site_root.display());
		let local_dst = profile.site_root.display().to_string();
		let remote_base = format!(
			"{}@{}:{}",
			profile.ssh_user,
			profile.ssh_host,
			profile.remote_path.trim_end_matches('/')
		);
		invocation = match direction {
			Direction::Pull => invocation.arg(format!("{}/", remote_base)).arg(local_dst),
			Direction::Push => invocation.arg(local_src).arg(remote_base),
		};

		Ok(shell.wrap_auth(invocation)?)
	}

	/// Classify a non-zero rsync exit. A missing remote tree root is
	/// surfaced separately so the caller can point the operator at the
	/// remote path setting instead of a generic transport failure.
	fn classify(profile: &ConnectionProfile, result: &CommandOutput) -> TransferError {
		let detail = result.output.trim().to_string();
		if detail.contains("change_dir") && detail.contains("No such file or directory") {
			TransferError::RemotePathNotFound { path: profile.remote_path.clone(), detail }
		} else {
			TransferError::CommandFailed { status: result.status, detail }
		}
	}
}

#[async_trait]
impl FileSyncer for FileTransferEngine {
	async fn sync_files(
		&self,
		profile: &ConnectionProfile,
		direction: Direction,
	) -> Result<(), TransferError> {
		let prepared = self.build_invocation(profile, direction)?;
		info!(
			"file sync ({}) between {} and {}@{}:{}",
			direction,
			profile.site_root.display(),
			profile.ssh_user,
			profile.ssh_host,
			profile.remote_path
		);
		let result = self.runner.run(&prepared.invocation).await?;
		drop(prepared);
		if result.success() {
			info!("file sync finished");
			Ok(())
		} else {
			Err(Self::classify(profile, &result))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	fn profile() -> ConnectionProfile {
		ConnectionProfile {
			remote_path: "/var/www/site".to_string(),
			site_root: PathBuf::from("/srv/site"),
			ssh_host: "example.com".to_string(),
			ssh_user: "deploy".to_string(),
			ssh_port: 2222,
			ssh_key_path: "/home/me/.ssh/id_ed25519".to_string(),
			..ConnectionProfile::default()
		}
	}

	fn engine() -> FileTransferEngine {
		FileTransferEngine::new(Arc::new(crate::exec::LocalRunner))
	}

	#[test]
	fn test_pull_invocation_shape() {
		// rsync may be absent in the test environment
		let Ok(prepared) = engine().build_invocation(&profile(), Direction::Pull) else {
			return;
		};
		let args = &prepared.invocation.args;
		assert_eq!(args[0], "-avz");
		assert!(args.contains(&"--delete".to_string()));
		let transport_idx = args.iter().position(|a| a == "-e").unwrap();
		assert!(args[transport_idx + 1].contains("-p 2222"));
		assert!(args[transport_idx + 1].contains("-i /home/me/.ssh/id_ed25519"));
		// Source precedes destination: remote contents into the local root
		let src = args.iter().position(|a| a == "deploy@example.com:/var/www/site/").unwrap();
		let dst = args.iter().position(|a| a == "/srv/site").unwrap();
		assert!(src < dst);
	}

	#[test]
	fn test_push_invocation_shape() {
		let Ok(prepared) = engine().build_invocation(&profile(), Direction::Push) else {
			return;
		};
		let args = &prepared.invocation.args;
		let src = args.iter().position(|a| a == "/srv/site/").unwrap();
		let dst = args.iter().position(|a| a == "deploy@example.com:/var/www/site").unwrap();
		assert!(src < dst);
	}

	#[test]
	fn test_exclusions_carry_backup_dir() {
		let Ok(prepared) = engine().build_invocation(&profile(), Direction::Pull) else {
			return;
		};
		let args = &prepared.invocation.args;
		assert!(args.contains(&"--exclude=wp-content/cache".to_string()));
		// Default backup dir is <site_root>/backups, always self-excluded
		assert!(args.contains(&"--exclude=backups".to_string()));
	}

	#[test]
	fn test_external_backup_dir_not_forced() {
		let mut profile = profile();
		profile.backup_dir = PathBuf::from("/var/backups/site");
		let set = FileTransferEngine::exclusions(&profile);
		assert!(!set.patterns().iter().any(|p| p.contains("/var/backups")));
	}

	#[test]
	fn test_classify_remote_path_missing() {
		let profile = profile();
		let result = CommandOutput {
			status: 23,
			output: "rsync: [sender] change_dir \"/var/www/site\" failed: No such file or directory (2)\n".to_string(),
		};
		match FileTransferEngine::classify(&profile, &result) {
			TransferError::RemotePathNotFound { path, .. } => {
				assert_eq!(path, "/var/www/site");
			}
			other => panic!("expected RemotePathNotFound, got {}", other),
		}
	}

	#[test]
	fn test_classify_generic_failure() {
		let profile = profile();
		let result = CommandOutput {
			status: 255,
			output: "ssh: connect to host example.com port 2222: Connection refused".to_string(),
		};
		match FileTransferEngine::classify(&profile, &result) {
			TransferError::CommandFailed { status, .. } => assert_eq!(status, 255),
			other => panic!("expected CommandFailed, got {}", other),
		}
	}
}

// vim: ts=4
