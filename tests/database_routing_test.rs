//! Database engine routing, driven entirely through the command-runner
//! seam: no database server and no real ssh/scp/mysqldump involved.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use sitesync::database::DatabaseEngine;
use sitesync::error::{DatabaseError, ExecError};
use sitesync::exec::{CommandOutput, CommandRunner, Invocation};
use sitesync::profile::{ConnectionProfile, DbTarget};
use sitesync::sync::DatabaseSyncer;

/// Stub tool binaries on PATH so discovery resolves without the real
/// tools installed. Never executed; the runner below is a mock.
fn ensure_stub_tools() {
	static TOOLS: OnceLock<tempfile::TempDir> = OnceLock::new();
	TOOLS.get_or_init(|| {
		let dir = tempfile::tempdir().unwrap();
		for tool in ["ssh", "scp", "sshpass", "rsync", "mysqldump", "mysql"] {
			let path = dir.path().join(tool);
			fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
			#[cfg(unix)]
			{
				use std::os::unix::fs::PermissionsExt;
				fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
			}
		}
		let current = std::env::var("PATH").unwrap_or_default();
		std::env::set_var("PATH", format!("{}:{}", dir.path().display(), current));
		dir
	});
}

/// Records every invocation; always reports success. Optionally creates an
/// empty file wherever an invocation names a `--result-file=`, imitating a
/// dump tool that exits 0 without writing anything useful.
#[derive(Default)]
struct RecordingRunner {
	calls: Mutex<Vec<Invocation>>,
	touch_result_files: bool,
}

impl RecordingRunner {
	fn calls(&self) -> Vec<Invocation> {
		self.calls.lock().unwrap().clone()
	}
}

#[async_trait]
impl CommandRunner for RecordingRunner {
	async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
		self.calls.lock().unwrap().push(invocation.clone());
		if self.touch_result_files {
			for arg in &invocation.args {
				if let Some(path) = arg.strip_prefix("--result-file=") {
					let _ = fs::write(path, "");
				}
			}
		}
		Ok(CommandOutput { status: 0, output: String::new() })
	}
}

fn program_name(invocation: &Invocation) -> String {
	Path::new(&invocation.program)
		.file_name()
		.map(|n| n.to_string_lossy().into_owned())
		.unwrap_or_else(|| invocation.program.clone())
}

fn profile(site_root: &Path) -> ConnectionProfile {
	ConnectionProfile {
		remote_url: "https://example.com".to_string(),
		local_url: "http://localhost:8080".to_string(),
		remote_path: "/var/www/site".to_string(),
		site_root: site_root.to_path_buf(),
		ssh_host: "example.com".to_string(),
		ssh_user: "deploy".to_string(),
		ssh_key_path: "/home/me/.ssh/id_ed25519".to_string(),
		remote_db: DbTarget {
			host: "db.internal".to_string(),
			name: "site".to_string(),
			user: "site".to_string(),
			password: "s3cret-remote".to_string(),
			..DbTarget::default()
		},
		..ConnectionProfile::default()
	}
}

#[tokio::test]
async fn pull_without_direct_db_goes_through_remote_shell_only() {
	ensure_stub_tools();
	let site = tempfile::tempdir().unwrap();
	let profile = profile(site.path());
	assert!(!profile.use_direct_db);

	let runner = Arc::new(RecordingRunner::default());
	let engine = DatabaseEngine::new(runner.clone());

	// The mocked scp never materializes a local dump, so the pull fails
	// after the remote-shell export ran, before any import
	let err = engine.pull_database(&profile).await.unwrap_err();
	assert!(
		matches!(err, DatabaseError::ExportFailed { .. }),
		"expected the missing retrieved dump, got: {}",
		err
	);

	let calls = runner.calls();
	// Everything rides ssh or scp; no database tool runs on this host and
	// no direct socket connection is ever attempted
	for call in &calls {
		let program = program_name(call);
		assert!(
			program == "ssh" || program == "scp",
			"unexpected local program: {}",
			call.program
		);
	}
	let dump_call = calls
		.iter()
		.find(|c| c.args.iter().any(|a| a == "mysqldump"))
		.expect("remote mysqldump invocation");
	assert_eq!(program_name(dump_call), "ssh");
	assert!(dump_call.args.iter().any(|a| a.starts_with("--defaults-extra-file=")));

	// The password travels only inside the staged defaults file
	for call in &calls {
		assert!(call.args.iter().all(|a| !a.contains("s3cret-remote")));
	}

	// Both staging files are removed even on the failure path
	let cleanup = calls.last().expect("cleanup invocation");
	assert_eq!(program_name(cleanup), "ssh");
	assert!(cleanup.args.iter().any(|a| a == "rm"));
	assert!(cleanup.args.iter().any(|a| a.contains("/tmp/sitesync-cnf-")));
	assert!(cleanup.args.iter().any(|a| a.contains("/tmp/sitesync-dump-")));
}

#[tokio::test]
async fn zero_byte_native_dump_falls_through_to_row_serializer() {
	ensure_stub_tools();
	let site = tempfile::tempdir().unwrap();
	let mut profile = profile(site.path());
	// Nothing listens here; the row serializer's connection attempt fails
	profile.local_db = DbTarget {
		host: "127.0.0.1".to_string(),
		port: 3399,
		name: "site".to_string(),
		user: "site".to_string(),
		password: "s3cret-local".to_string(),
	};

	let runner = Arc::new(RecordingRunner {
		calls: Mutex::new(Vec::new()),
		touch_result_files: true,
	});
	let engine = DatabaseEngine::new(runner.clone());

	let out = site.path().join("local-dump.sql");
	let err = engine.export_local(&profile, &out).await.unwrap_err();

	// The native tool exited 0 but produced a 0-byte artifact; that must
	// not count as success, and the row serializer must be the strategy
	// whose failure is reported
	match err {
		DatabaseError::ExportFailed { detail } => {
			assert!(detail.contains("row serializer"), "detail: {}", detail)
		}
		other => panic!("expected ExportFailed, got: {}", other),
	}

	let calls = runner.calls();
	let tool_calls: Vec<_> =
		calls.iter().filter(|c| program_name(c) == "mysqldump").collect();
	assert_eq!(tool_calls.len(), 1);
	assert!(tool_calls[0].args.iter().any(|a| a.starts_with("--defaults-extra-file=")));
	assert!(tool_calls[0].args.iter().all(|a| !a.contains("s3cret-local")));

	// The undersized artifact is removed, never handed to the next strategy
	assert!(!out.exists());
}

// vim: ts=4
