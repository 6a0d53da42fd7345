use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use sitesync::backup::ArchiveBuilder;
use sitesync::database::DatabaseEngine;
use sitesync::error::SyncError;
use sitesync::exec::{state_dir, LocalRunner};
use sitesync::lock::ProfileLock;
use sitesync::logging::TracingLogSink;
use sitesync::profile::ConnectionProfile;
use sitesync::sync::{Direction, Orchestrator, SyncStatus};
use sitesync::transfer::FileTransferEngine;

fn render_json<T: serde::Serialize>(value: &T) -> Result<String, SyncError> {
	serde_json::to_string_pretty(value).map_err(|e| SyncError::Other { message: e.to_string() })
}

fn stage(outcome: Option<bool>) -> &'static str {
	match outcome {
		Some(true) => "ok",
		Some(false) => "failed",
		None => "skipped",
	}
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
	sitesync::init_tracing();

	let matches = Command::new("sitesync")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Two-way website file and database synchronizer with point-in-time backups")
		.subcommand_required(true)
		.arg(
			Arg::new("profile")
				.short('p')
				.long("profile")
				.value_name("PROFILE")
				.help("Profile name (default: \"default\")"),
		)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("PATH")
				.help("Explicit profile file instead of ~/.sitesync/<profile>.toml"),
		)
		.arg(
			Arg::new("json")
				.long("json")
				.action(ArgAction::SetTrue)
				.help("Machine-readable JSON output"),
		)
		.subcommand(
			Command::new("sync").about("Run a full sync").arg(
				Arg::new("direction")
					.short('d')
					.long("direction")
					.value_name("pull|push")
					.required(true)
					.help("pull overwrites local state, push overwrites remote state"),
			),
		)
		.subcommand(Command::new("backup").about("Create a backup archive of the local site"))
		.subcommand(
			Command::new("restore")
				.about("Restore a backup archive over the local site")
				.arg(Arg::new("name").required(true).help("Archive name from `backups list`")),
		)
		.subcommand(
			Command::new("backups")
				.about("Manage backup archives")
				.subcommand(Command::new("list").about("List backup archives, newest first"))
				.subcommand(
					Command::new("delete")
						.about("Delete one backup archive")
						.arg(Arg::new("name").required(true)),
				)
				.subcommand(Command::new("delete-all").about("Delete every backup archive")),
		)
		.get_matches();

	let profile_name = matches
		.get_one::<String>("profile")
		.map(|s| s.as_str())
		.unwrap_or("default")
		.to_string();
	let profile_file = match matches.get_one::<String>("config") {
		Some(path) => PathBuf::from(path),
		None => state_dir()?.join(format!("{}.toml", profile_name)),
	};
	let json = matches.get_flag("json");

	let mut profile = ConnectionProfile::load(&profile_file)?;

	// One operation per profile at a time; released on exit
	let _lock = ProfileLock::acquire(&profile_name)?;

	let runner = Arc::new(LocalRunner);
	let database = Arc::new(DatabaseEngine::new(runner.clone()));
	let files = Arc::new(FileTransferEngine::new(runner.clone()));
	let backup = Arc::new(ArchiveBuilder::new(database.clone()));

	if let Some(sub) = matches.subcommand_matches("sync") {
		let direction = Direction::from_str(
			sub.get_one::<String>("direction").map(|s| s.as_str()).unwrap_or("pull"),
		)?;
		let orchestrator =
			Orchestrator::new(files, database, backup, Arc::new(TracingLogSink));
		let op = orchestrator.full_sync(&profile, direction).await;

		// Bookkeeping records the attempt whether or not it succeeded
		profile.last_sync = Some(op.finished_at);
		if let Err(e) = profile.save(&profile_file) {
			eprintln!("Warning: could not record last sync time: {}", e);
		}

		if json {
			println!("{}", render_json(&op)?);
		} else {
			println!(
				"Sync ({}) {} in {:.2}s (files: {}, database: {}, url rewrite: {})",
				direction,
				op.status,
				op.elapsed_secs,
				stage(op.files),
				stage(op.database),
				stage(op.url_rewrite)
			);
		}
		if op.status != SyncStatus::Completed {
			let cause = op.message.unwrap_or_else(|| "one or more stages failed".to_string());
			return Err(format!("sync {}: {}", op.status, cause).into());
		}
	} else if matches.subcommand_matches("backup").is_some() {
		let archive = backup.create(&profile).await?;
		if json {
			println!("{}", render_json(&archive)?);
		} else {
			println!(
				"Backup created: {} ({} bytes{})",
				archive.name,
				archive.size,
				if archive.includes_database { "" } else { ", files only" }
			);
		}
	} else if let Some(sub) = matches.subcommand_matches("restore") {
		let name = sub
			.get_one::<String>("name")
			.ok_or_else(|| SyncError::Other { message: "restore: archive name required".to_string() })?;
		backup.restore(&profile, name).await?;
		println!("Backup restored: {}", name);
	} else if let Some(sub) = matches.subcommand_matches("backups") {
		if let Some(del) = sub.subcommand_matches("delete") {
			let name = del
				.get_one::<String>("name")
				.ok_or_else(|| SyncError::Other { message: "delete: archive name required".to_string() })?;
			backup.delete(&profile, name)?;
			println!("Backup deleted: {}", name);
		} else if sub.subcommand_matches("delete-all").is_some() {
			let deleted = backup.delete_all(&profile)?;
			println!("Deleted {} backup archive(s)", deleted);
		} else {
			// Bare `backups` lists
			let archives = backup.list(&profile)?;
			if json {
				println!("{}", render_json(&archives)?);
			} else if archives.is_empty() {
				println!("No backups found in {}", profile.backup_dir().display());
			} else {
				for archive in &archives {
					println!(
						"{}  {:>12}  {}  {}",
						archive.created.format("%Y-%m-%d %H:%M:%S"),
						archive.size,
						if archive.includes_database { "files+db  " } else { "files-only" },
						archive.name
					);
				}
			}
		}
	}

	Ok(())
}

// vim: ts=4
