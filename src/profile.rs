//! Connection profile: the single explicit value passed into every core call.
//!
//! The engine holds no global state of its own; a running operation works on
//! the profile snapshot it was handed at start. Profiles are stored as TOML
//! files, one per profile name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// One relational database endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbTarget {
	pub host: String,
	pub port: u16,
	pub name: String,
	pub user: String,
	pub password: String,
}

impl Default for DbTarget {
	fn default() -> Self {
		DbTarget {
			host: String::new(),
			port: 3306,
			name: String::new(),
			user: String::new(),
			password: String::new(),
		}
	}
}

impl DbTarget {
	/// Short display form for logs; never includes the password
	pub fn describe(&self) -> String {
		format!("{}@{}:{}/{}", self.user, self.host, self.port, self.name)
	}
}

/// Active SSH authentication mode
///
/// Exactly one mode is active per profile. If both a key path and a
/// password are configured, the key takes precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
	/// Identity file passed to ssh with `-i`
	KeyFile(String),

	/// Password delivered through sshpass and a transient 0600 file
	Password(String),

	/// Neither configured: rely on the ambient ssh agent / default keys
	Agent,
}

/// Connection profile for one local/remote site pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionProfile {
	/// Public URL of the remote site (search half of the URL rewrite)
	pub remote_url: String,

	/// Public URL of the local site (replace half of the URL rewrite)
	pub local_url: String,

	/// Site root on the remote host
	pub remote_path: String,

	/// Site root on this host
	pub site_root: PathBuf,

	/// Directory holding backup archives; defaults to `<site_root>/backups`
	pub backup_dir: PathBuf,

	pub ssh_host: String,
	pub ssh_user: String,
	pub ssh_port: u16,

	/// SSH identity file; empty means unset
	pub ssh_key_path: String,

	/// SSH password; empty means unset. Ignored when a key path is set.
	pub ssh_password: String,

	/// Remote database endpoint
	pub remote_db: DbTarget,

	/// Local database endpoint
	pub local_db: DbTarget,

	/// Path fragments excluded from file transfer and archives
	pub exclude_paths: Vec<String>,

	/// Attempt a direct socket connection to the remote database before
	/// falling back to the remote-shell strategy
	pub use_direct_db: bool,

	/// Take a safety backup before a pull (pushes always back up)
	pub backup_before_pull: bool,

	/// Last attempted sync, partial or full
	pub last_sync: Option<DateTime<Utc>>,
}

impl Default for ConnectionProfile {
	fn default() -> Self {
		ConnectionProfile {
			remote_url: String::new(),
			local_url: String::new(),
			remote_path: String::new(),
			site_root: PathBuf::new(),
			backup_dir: PathBuf::new(),
			ssh_host: String::new(),
			ssh_user: String::new(),
			ssh_port: 22,
			ssh_key_path: String::new(),
			ssh_password: String::new(),
			remote_db: DbTarget::default(),
			local_db: DbTarget::default(),
			exclude_paths: vec![
				"wp-content/cache".to_string(),
				"wp-content/backup".to_string(),
				"wp-content/uploads/wc-logs".to_string(),
			],
			use_direct_db: false,
			backup_before_pull: false,
			last_sync: None,
		}
	}
}

impl ConnectionProfile {
	/// Load a profile from a TOML file
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
			path: path.display().to_string(),
			source: e,
		})?;
		toml::from_str(&text).map_err(|e| ConfigError::ParseFailed {
			path: path.display().to_string(),
			message: e.to_string(),
		})
	}

	/// Persist the profile back to its TOML file
	pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
		let text = toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed {
			path: path.display().to_string(),
			message: e.to_string(),
		})?;
		fs::write(path, text).map_err(|e| ConfigError::WriteFailed {
			path: path.display().to_string(),
			source: e,
		})
	}

	/// Active SSH authentication mode; key wins when both are set
	pub fn ssh_auth(&self) -> SshAuth {
		if !self.ssh_key_path.is_empty() {
			SshAuth::KeyFile(self.ssh_key_path.clone())
		} else if !self.ssh_password.is_empty() {
			SshAuth::Password(self.ssh_password.clone())
		} else {
			SshAuth::Agent
		}
	}

	/// Backup archive directory, with the `<site_root>/backups` default
	pub fn backup_dir(&self) -> PathBuf {
		if self.backup_dir.as_os_str().is_empty() {
			self.site_root.join("backups")
		} else {
			self.backup_dir.clone()
		}
	}

	/// Fields a file transfer cannot run without. Fails fast; no partial
	/// attempt is made with an incomplete profile.
	pub fn validate_ssh(&self) -> Result<(), ConfigError> {
		if self.ssh_host.is_empty() {
			return Err(ConfigError::MissingField { field: "ssh_host" });
		}
		if self.ssh_user.is_empty() {
			return Err(ConfigError::MissingField { field: "ssh_user" });
		}
		if self.remote_path.is_empty() {
			return Err(ConfigError::MissingField { field: "remote_path" });
		}
		if self.site_root.as_os_str().is_empty() {
			return Err(ConfigError::MissingField { field: "site_root" });
		}
		Ok(())
	}

	/// Fields a remote database transfer cannot run without
	pub fn validate_remote_db(&self) -> Result<(), ConfigError> {
		if self.remote_db.host.is_empty() {
			return Err(ConfigError::MissingField { field: "remote_db.host" });
		}
		if self.remote_db.name.is_empty() {
			return Err(ConfigError::MissingField { field: "remote_db.name" });
		}
		Ok(())
	}

	/// Everything a full sync needs
	pub fn validate_sync(&self) -> Result<(), ConfigError> {
		self.validate_ssh()?;
		self.validate_remote_db()?;
		if self.remote_url.is_empty() {
			return Err(ConfigError::MissingField { field: "remote_url" });
		}
		if self.local_url.is_empty() {
			return Err(ConfigError::MissingField { field: "local_url" });
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn filled_profile() -> ConnectionProfile {
		ConnectionProfile {
			remote_url: "https://example.com".to_string(),
			local_url: "http://localhost:8080".to_string(),
			remote_path: "/var/www/site".to_string(),
			site_root: PathBuf::from("/srv/site"),
			ssh_host: "example.com".to_string(),
			ssh_user: "deploy".to_string(),
			remote_db: DbTarget {
				host: "db.example.com".to_string(),
				name: "site".to_string(),
				user: "site".to_string(),
				..DbTarget::default()
			},
			..ConnectionProfile::default()
		}
	}

	#[test]
	fn test_default_excludes() {
		let profile = ConnectionProfile::default();
		assert!(profile.exclude_paths.iter().any(|p| p == "wp-content/cache"));
		assert_eq!(profile.ssh_port, 22);
		assert!(!profile.use_direct_db);
	}

	#[test]
	fn test_key_takes_precedence_over_password() {
		let mut profile = filled_profile();
		profile.ssh_key_path = "/home/deploy/.ssh/id_ed25519".to_string();
		profile.ssh_password = "hunter2".to_string();
		assert_eq!(profile.ssh_auth(), SshAuth::KeyFile("/home/deploy/.ssh/id_ed25519".to_string()));

		profile.ssh_key_path.clear();
		assert_eq!(profile.ssh_auth(), SshAuth::Password("hunter2".to_string()));

		profile.ssh_password.clear();
		assert_eq!(profile.ssh_auth(), SshAuth::Agent);
	}

	#[test]
	fn test_validation_fails_fast_on_missing_fields() {
		let mut profile = filled_profile();
		profile.ssh_host.clear();
		assert!(matches!(
			profile.validate_ssh(),
			Err(ConfigError::MissingField { field: "ssh_host" })
		));

		let mut profile = filled_profile();
		profile.remote_db.name.clear();
		assert!(profile.validate_remote_db().is_err());

		let mut profile = filled_profile();
		profile.local_url.clear();
		assert!(matches!(
			profile.validate_sync(),
			Err(ConfigError::MissingField { field: "local_url" })
		));
	}

	#[test]
	fn test_validate_sync_passes_when_complete() {
		let profile = filled_profile();
		assert!(profile.validate_ssh().is_ok());
		assert!(profile.validate_remote_db().is_ok());
		assert!(profile.validate_sync().is_ok());
	}

	#[test]
	fn test_backup_dir_default() {
		let profile = filled_profile();
		assert_eq!(profile.backup_dir(), PathBuf::from("/srv/site/backups"));

		let mut profile = filled_profile();
		profile.backup_dir = PathBuf::from("/var/backups/site");
		assert_eq!(profile.backup_dir(), PathBuf::from("/var/backups/site"));
	}

	#[test]
	fn test_toml_round_trip() {
		let profile = filled_profile();
		let text = toml::to_string_pretty(&profile).expect("serialize");
		let back: ConnectionProfile = toml::from_str(&text).expect("deserialize");
		assert_eq!(back.remote_url, profile.remote_url);
		assert_eq!(back.remote_db, profile.remote_db);
		assert_eq!(back.exclude_paths, profile.exclude_paths);
	}
}

// vim: ts=4
