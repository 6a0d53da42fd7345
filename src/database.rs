//! Database transfer engine.
//!
//! Exports run through an ordered strategy list: the native dump tool first,
//! then a row-by-row serializer over a live connection. Every strategy's
//! artifact is judged by the same predicate (dump file present and at least
//! [`MIN_DUMP_BYTES`] long); an invalid artifact falls through to the next
//! strategy instead of being treated as success.
//!
//! When direct socket connectivity to the remote database is disabled or
//! fails, the dump and import commands run on the remote host through the
//! remote shell, with the artifact staged in a remote temporary file that is
//! removed on success and failure alike.

use chrono::Utc;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Row, ValueRef};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::exec::{CommandRunner, CopyDirection, Invocation, RemoteShell, SecretFile, require_tool};
use crate::logging::{info, warn};
use crate::profile::{ConnectionProfile, DbTarget};
use crate::sync::DatabaseSyncer;

/// A dump smaller than this is treated as invalid rather than imported.
/// The header alone of any real dump exceeds it.
pub const MIN_DUMP_BYTES: u64 = 64;

/// Statements shorter than this are dropped during import. Filters out
/// stray non-SQL fragments (login banners, warnings) that remote shells
/// sometimes prepend to retrieved dumps.
pub const MIN_STATEMENT_LEN: usize = 8;

/// Export strategies in fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStrategy {
	/// Invoke mysqldump on this host against the target
	NativeTool,

	/// Serialize schema and rows over a live connection
	RowSerializer,
}

impl fmt::Display for DumpStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DumpStrategy::NativeTool => write!(f, "native tool"),
			DumpStrategy::RowSerializer => write!(f, "row serializer"),
		}
	}
}

pub const DUMP_STRATEGIES: [DumpStrategy; 2] =
	[DumpStrategy::NativeTool, DumpStrategy::RowSerializer];

/// Counters from one best-effort import
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportStats {
	pub executed: usize,
	pub failed: usize,
}

/// Database transfer engine. Holds the command runner seam and a cached
/// pool for the ambient local database so repeated local work shares one
/// connection state.
pub struct DatabaseEngine {
	runner: Arc<dyn CommandRunner>,
	local_pool: tokio::sync::Mutex<Option<(DbTarget, MySqlPool)>>,
}

impl DatabaseEngine {
	pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
		DatabaseEngine { runner, local_pool: tokio::sync::Mutex::new(None) }
	}

	async fn connect(target: &DbTarget) -> Result<MySqlPool, DatabaseError> {
		let host = if target.host.is_empty() { "localhost" } else { target.host.as_str() };
		let mut options = MySqlConnectOptions::new()
			.host(host)
			.port(target.port)
			.username(&target.user)
			.database(&target.name);
		if !target.password.is_empty() {
			options = options.password(&target.password);
		}
		MySqlPoolOptions::new()
			.max_connections(2)
			.connect_with(options)
			.await
			.map_err(|e| DatabaseError::ConnectionFailed { target: target.describe(), source: e })
	}

	/// The local target reuses one cached pool; any other target gets a
	/// dedicated connection
	async fn pool_for(
		&self,
		profile: &ConnectionProfile,
		target: &DbTarget,
	) -> Result<MySqlPool, DatabaseError> {
		if *target == profile.local_db {
			let mut cached = self.local_pool.lock().await;
			if let Some((cached_target, pool)) = cached.as_ref() {
				if cached_target == target {
					return Ok(pool.clone());
				}
			}
			let pool = Self::connect(target).await?;
			*cached = Some((target.clone(), pool.clone()));
			Ok(pool)
		} else {
			Self::connect(target).await
		}
	}

	/// Export `target` to `out`, walking the strategy list until one
	/// produces a valid artifact
	pub async fn export_database(
		&self,
		profile: &ConnectionProfile,
		target: &DbTarget,
		out: &Path,
	) -> Result<DumpStrategy, DatabaseError> {
		let mut last_failure = String::new();
		for strategy in DUMP_STRATEGIES {
			let attempt = match strategy {
				DumpStrategy::NativeTool => self.export_with_tool(target, out).await,
				DumpStrategy::RowSerializer => self.export_with_rows(profile, target, out).await,
			};
			match attempt {
				Ok(()) => match dump_size(out) {
					Some(size) if size >= MIN_DUMP_BYTES => {
						info!("database {} exported via {} ({} bytes)", target.name, strategy, size);
						return Ok(strategy);
					}
					Some(size) => {
						last_failure =
							format!("{} produced an undersized dump ({} bytes)", strategy, size);
						warn!("{}, trying next strategy", last_failure);
					}
					None => {
						last_failure = format!("{} produced no dump file", strategy);
						warn!("{}, trying next strategy", last_failure);
					}
				},
				Err(e) => {
					last_failure = format!("{} failed: {}", strategy, e);
					warn!("{}, trying next strategy", last_failure);
				}
			}
			// Never let the next strategy inherit a bad artifact
			let _ = fs::remove_file(out);
		}
		Err(DatabaseError::ExportFailed { detail: last_failure })
	}

	async fn export_with_tool(&self, target: &DbTarget, out: &Path) -> Result<(), DatabaseError> {
		let tool = require_tool("mysqldump")?;
		let secret = SecretFile::new(&client_defaults(target))?;
		let invocation = Invocation::new(tool)
			.arg(format!("--defaults-extra-file={}", secret.path_string()))
			.arg(format!("--result-file={}", out.display()))
			.arg(&target.name);
		let result = self.runner.run(&invocation).await?;
		drop(secret);
		if !result.success() {
			return Err(DatabaseError::ExportFailed { detail: result.output });
		}
		Ok(())
	}

	/// Row-level fallback exporter: DROP + CREATE + one INSERT per row,
	/// columns in the table's native order
	async fn export_with_rows(
		&self,
		profile: &ConnectionProfile,
		target: &DbTarget,
		out: &Path,
	) -> Result<(), DatabaseError> {
		let pool = self.pool_for(profile, target).await?;
		let mut writer = BufWriter::new(File::create(out)?);
		writeln!(writer, "-- sitesync row-level dump of `{}`", target.name)?;
		writeln!(writer, "-- host: {}  generated: {}", target.host, Utc::now().to_rfc3339())?;
		writeln!(writer)?;

		let tables = sqlx::query("SHOW TABLES").fetch_all(&pool).await?;
		for table_row in &tables {
			let table = text_value(table_row, 0)?;
			let create_row = sqlx::query(&format!("SHOW CREATE TABLE {}", quote_ident(&table)))
				.fetch_one(&pool)
				.await?;
			let create_sql = text_value(&create_row, 1)?;
			writeln!(writer, "DROP TABLE IF EXISTS {};", quote_ident(&table))?;
			writeln!(writer, "{};", create_sql)?;

			let rows = sqlx::query(&format!("SELECT * FROM {}", quote_ident(&table)))
				.fetch_all(&pool)
				.await?;
			for row in &rows {
				let mut values = Vec::with_capacity(row.len());
				for idx in 0..row.len() {
					values.push(value_literal(row, idx)?);
				}
				writeln!(writer, "INSERT INTO {} VALUES ({});", quote_ident(&table), values.join(", "))?;
			}
			writeln!(writer)?;
		}
		writer.flush()?;
		Ok(())
	}

	/// Best-effort import: statement failures are counted and logged, the
	/// import keeps going. Only an unreadable dump or a refused connection
	/// is fatal.
	pub async fn import_database(
		&self,
		profile: &ConnectionProfile,
		dump: &Path,
		target: &DbTarget,
	) -> Result<ImportStats, DatabaseError> {
		let sql = fs::read_to_string(dump).map_err(|e| DatabaseError::ImportFailed {
			detail: format!("cannot read {}: {}", dump.display(), e),
		})?;
		let pool = self.pool_for(profile, target).await?;

		let mut stats = ImportStats::default();
		for statement in split_statements(&sql) {
			match sqlx::query(&statement).execute(&pool).await {
				Ok(_) => stats.executed += 1,
				Err(e) => {
					stats.failed += 1;
					warn!("import statement failed (continuing): {}", e);
				}
			}
		}
		info!(
			"imported {} into {}: {} statements executed, {} failed",
			dump.display(),
			target.name,
			stats.executed,
			stats.failed
		);
		Ok(stats)
	}

	/// Literal find/replace across every text-typed column of every table,
	/// summing affected rows. Zero is a valid outcome.
	pub async fn search_replace(
		&self,
		profile: &ConnectionProfile,
		search: &str,
		replace: &str,
	) -> Result<u64, DatabaseError> {
		let pool = self.pool_for(profile, &profile.local_db).await?;
		let mut total = 0u64;

		let tables = sqlx::query("SHOW TABLES").fetch_all(&pool).await?;
		for table_row in &tables {
			let table = text_value(table_row, 0)?;
			let columns = sqlx::query(&format!("SHOW COLUMNS FROM {}", quote_ident(&table)))
				.fetch_all(&pool)
				.await?;
			for column_row in &columns {
				let field = text_value(column_row, 0)?;
				let column_type = text_value(column_row, 1)?.to_lowercase();
				if !column_type.contains("char") && !column_type.contains("text") {
					continue;
				}
				let statement = format!(
					"UPDATE {table} SET {col} = REPLACE({col}, ?, ?) WHERE INSTR({col}, ?) > 0",
					table = quote_ident(&table),
					col = quote_ident(&field),
				);
				let result = sqlx::query(&statement)
					.bind(search)
					.bind(replace)
					.bind(search)
					.execute(&pool)
					.await?;
				total += result.rows_affected();
			}
		}
		Ok(total)
	}

	/// Stage a 0600 defaults file on the remote host so the database
	/// password never appears in any argv, local or remote. scp carries the
	/// mode of the staged file over.
	async fn upload_defaults(
		&self,
		shell: &RemoteShell,
		db: &DbTarget,
		remote_cnf: &str,
	) -> Result<(), DatabaseError> {
		let cnf = SecretFile::new(&client_defaults(db))?;
		let copy = shell.copy(&cnf.path_string(), remote_cnf, CopyDirection::ToRemote)?;
		let result = self.runner.run(&copy.invocation).await?;
		drop(copy);
		drop(cnf);
		if !result.success() {
			return Err(DatabaseError::ExportFailed {
				detail: format!("credential upload failed: {}", result.output),
			});
		}
		Ok(())
	}

	/// Dump the remote database by running the dump tool on the remote host,
	/// retrieving the artifact and cleaning both remote staging files up on
	/// every path
	async fn export_remote_via_shell(
		&self,
		profile: &ConnectionProfile,
		out: &Path,
	) -> Result<(), DatabaseError> {
		let shell = RemoteShell::from_profile(profile);
		let stamp = Utc::now().format("%Y%m%d%H%M%S");
		let remote_cnf = format!("/tmp/sitesync-cnf-{}.cnf", stamp);
		let remote_tmp = format!("/tmp/sitesync-dump-{}.sql", stamp);
		let result = self
			.remote_dump_and_fetch(&shell, profile, &remote_cnf, &remote_tmp, out)
			.await;
		self.cleanup_remote(&shell, &[&remote_cnf, &remote_tmp]).await;
		result
	}

	async fn remote_dump_and_fetch(
		&self,
		shell: &RemoteShell,
		profile: &ConnectionProfile,
		remote_cnf: &str,
		remote_tmp: &str,
		out: &Path,
	) -> Result<(), DatabaseError> {
		let db = &profile.remote_db;
		self.upload_defaults(shell, db, remote_cnf).await?;

		// The defaults file carries host, port, user and password
		let argv = vec![
			"mysqldump".to_string(),
			format!("--defaults-extra-file={}", remote_cnf),
			format!("--result-file={}", remote_tmp),
			db.name.clone(),
		];
		let prepared = shell.command(&argv)?;
		let result = self.runner.run(&prepared.invocation).await?;
		drop(prepared);
		if !result.success() {
			return Err(DatabaseError::ExportFailed { detail: result.output });
		}

		let copy = shell.copy(remote_tmp, &out.display().to_string(), CopyDirection::FromRemote)?;
		let result = self.runner.run(&copy.invocation).await?;
		drop(copy);
		if !result.success() {
			return Err(DatabaseError::ExportFailed {
				detail: format!("dump retrieval failed: {}", result.output),
			});
		}

		match dump_size(out) {
			Some(size) if size >= MIN_DUMP_BYTES => Ok(()),
			Some(size) => Err(DatabaseError::UndersizedDump {
				path: out.display().to_string(),
				size,
			}),
			None => Err(DatabaseError::ExportFailed {
				detail: format!("retrieved dump missing: {}", out.display()),
			}),
		}
	}

	/// Upload a dump and import it by running the client on the remote host
	async fn import_remote_via_shell(
		&self,
		profile: &ConnectionProfile,
		dump: &Path,
	) -> Result<(), DatabaseError> {
		let shell = RemoteShell::from_profile(profile);
		let stamp = Utc::now().format("%Y%m%d%H%M%S");
		let remote_cnf = format!("/tmp/sitesync-cnf-{}.cnf", stamp);
		let remote_tmp = format!("/tmp/sitesync-import-{}.sql", stamp);
		let result = self
			.upload_and_import(&shell, profile, dump, &remote_cnf, &remote_tmp)
			.await;
		self.cleanup_remote(&shell, &[&remote_cnf, &remote_tmp]).await;
		result
	}

	async fn upload_and_import(
		&self,
		shell: &RemoteShell,
		profile: &ConnectionProfile,
		dump: &Path,
		remote_cnf: &str,
		remote_tmp: &str,
	) -> Result<(), DatabaseError> {
		let db = &profile.remote_db;
		self.upload_defaults(shell, db, remote_cnf).await?;

		let copy = shell.copy(&dump.display().to_string(), remote_tmp, CopyDirection::ToRemote)?;
		let result = self.runner.run(&copy.invocation).await?;
		drop(copy);
		if !result.success() {
			return Err(DatabaseError::ImportFailed {
				detail: format!("dump upload failed: {}", result.output),
			});
		}

		let argv = vec![
			"mysql".to_string(),
			format!("--defaults-extra-file={}", remote_cnf),
			db.name.clone(),
			"-e".to_string(),
			format!("source {}", remote_tmp),
		];
		let prepared = shell.command(&argv)?;
		let result = self.runner.run(&prepared.invocation).await?;
		drop(prepared);
		if !result.success() {
			return Err(DatabaseError::ImportFailed { detail: result.output });
		}
		Ok(())
	}

	async fn cleanup_remote(&self, shell: &RemoteShell, staged: &[&str]) {
		let mut argv = vec!["rm".to_string(), "-f".to_string()];
		argv.extend(staged.iter().map(|s| s.to_string()));
		match shell.command(&argv) {
			Ok(prepared) => {
				if let Err(e) = self.runner.run(&prepared.invocation).await {
					warn!("remote staging files {} not cleaned up: {}", staged.join(", "), e);
				}
			}
			Err(e) => warn!("remote staging files {} not cleaned up: {}", staged.join(", "), e),
		}
	}
}

#[async_trait]
impl DatabaseSyncer for DatabaseEngine {
	async fn pull_database(&self, profile: &ConnectionProfile) -> Result<(), DatabaseError> {
		fs::create_dir_all(profile.backup_dir())?;
		let local_dump = profile
			.backup_dir()
			.join(format!("remote-db-{}.sql", Utc::now().format("%Y-%m-%d-%H-%M-%S")));

		// Direct connection only when enabled; a failed or disabled direct
		// attempt always falls through to the remote shell, never skips
		let mut exported = false;
		if profile.use_direct_db {
			match self.export_database(profile, &profile.remote_db, &local_dump).await {
				Ok(strategy) => {
					info!("remote database exported directly via {}", strategy);
					exported = true;
				}
				Err(e) => {
					warn!("direct database export failed, falling back to remote shell: {}", e)
				}
			}
		}
		if !exported {
			self.export_remote_via_shell(profile, &local_dump).await?;
		}

		match dump_size(&local_dump) {
			Some(size) if size >= MIN_DUMP_BYTES => {
				info!("remote database exported: {} bytes", size)
			}
			Some(size) => {
				return Err(DatabaseError::UndersizedDump {
					path: local_dump.display().to_string(),
					size,
				})
			}
			None => {
				return Err(DatabaseError::ExportFailed {
					detail: format!("exported dump missing: {}", local_dump.display()),
				})
			}
		}

		self.import_database(profile, &local_dump, &profile.local_db).await?;
		Ok(())
	}

	async fn export_local(
		&self,
		profile: &ConnectionProfile,
		out: &Path,
	) -> Result<(), DatabaseError> {
		self.export_database(profile, &profile.local_db, out).await.map(|_| ())
	}

	async fn push_database(
		&self,
		profile: &ConnectionProfile,
		dump: &Path,
	) -> Result<(), DatabaseError> {
		if profile.use_direct_db {
			match self.import_database(profile, dump, &profile.remote_db).await {
				Ok(_) => return Ok(()),
				Err(e) => {
					warn!("direct database import failed, falling back to remote shell: {}", e)
				}
			}
		}
		self.import_remote_via_shell(profile, dump).await
	}

	async fn import_local(
		&self,
		profile: &ConnectionProfile,
		dump: &Path,
	) -> Result<(), DatabaseError> {
		self.import_database(profile, dump, &profile.local_db).await.map(|_| ())
	}

	async fn rewrite_urls(
		&self,
		profile: &ConnectionProfile,
		search: &str,
		replace: &str,
	) -> Result<u64, DatabaseError> {
		self.search_replace(profile, search, replace).await
	}
}

fn dump_size(path: &Path) -> Option<u64> {
	fs::metadata(path).ok().map(|m| m.len())
}

/// mysql option-file section for `--defaults-extra-file`
fn client_defaults(target: &DbTarget) -> String {
	let host = if target.host.is_empty() { "localhost" } else { target.host.as_str() };
	format!(
		"[client]\nhost={}\nport={}\nuser={}\npassword=\"{}\"\n",
		host,
		target.port,
		target.user,
		target.password.replace('\\', "\\\\").replace('"', "\\\"")
	)
}

/// Backtick-quote an identifier
fn quote_ident(name: &str) -> String {
	format!("`{}`", name.replace('`', "``"))
}

/// Escape a string value for a single-quoted SQL literal
fn escape_sql_string(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for c in value.chars() {
		match c {
			'\'' => out.push_str("\\'"),
			'\\' => out.push_str("\\\\"),
			'\n' => out.push_str("\\n"),
			'\r' => out.push_str("\\r"),
			'\0' => out.push_str("\\0"),
			'\x1a' => out.push_str("\\Z"),
			_ => out.push(c),
		}
	}
	out
}

/// Render one column value as a SQL literal, NULL as the keyword
fn value_literal(row: &MySqlRow, idx: usize) -> Result<String, DatabaseError> {
	let raw = row.try_get_raw(idx)?;
	if raw.is_null() {
		return Ok("NULL".to_string());
	}
	if let Ok(v) = row.try_get::<i64, _>(idx) {
		return Ok(v.to_string());
	}
	if let Ok(v) = row.try_get::<u64, _>(idx) {
		return Ok(v.to_string());
	}
	if let Ok(v) = row.try_get::<f64, _>(idx) {
		return Ok(v.to_string());
	}
	if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(idx) {
		return Ok(format!("'{}'", v.format("%Y-%m-%d %H:%M:%S")));
	}
	if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(idx) {
		return Ok(format!("'{}'", v.format("%Y-%m-%d")));
	}
	if let Ok(v) = row.try_get::<String, _>(idx) {
		return Ok(format!("'{}'", escape_sql_string(&v)));
	}
	let bytes: Vec<u8> = row.try_get(idx)?;
	if bytes.is_empty() {
		Ok("''".to_string())
	} else {
		Ok(format!("0x{}", hex::encode(bytes)))
	}
}

/// Decode a result column that servers report as either text or bytes
fn text_value(row: &MySqlRow, idx: usize) -> Result<String, DatabaseError> {
	if let Ok(v) = row.try_get::<String, _>(idx) {
		return Ok(v);
	}
	let bytes: Vec<u8> = row.try_get(idx)?;
	Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Split a dump into executable statements, dropping blank lines, comment
/// lines and fragments under [`MIN_STATEMENT_LEN`]
pub fn split_statements(sql: &str) -> Vec<String> {
	let mut statements = Vec::new();
	let mut current = String::new();
	for line in sql.lines() {
		let trimmed = line.trim();
		if trimmed.is_empty() || trimmed.starts_with("--") || trimmed.starts_with('#') {
			continue;
		}
		// Stray fragments never carry a terminator
		if current.is_empty() && trimmed.len() < MIN_STATEMENT_LEN && !trimmed.ends_with(';') {
			continue;
		}
		if !current.is_empty() {
			current.push('\n');
		}
		current.push_str(line);
		if trimmed.ends_with(';') {
			let statement = current.trim().trim_end_matches(';').trim().to_string();
			if statement.len() >= MIN_STATEMENT_LEN {
				statements.push(statement);
			}
			current.clear();
		}
	}
	// An unterminated tail is not a statement
	statements
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_strategy_order() {
		assert_eq!(DUMP_STRATEGIES[0], DumpStrategy::NativeTool);
		assert_eq!(DUMP_STRATEGIES[1], DumpStrategy::RowSerializer);
	}

	#[test]
	fn test_split_statements_basic() {
		let sql = "DROP TABLE IF EXISTS `a`;\nCREATE TABLE `a` (\n  id int\n);\nINSERT INTO `a` VALUES (1);\n";
		let statements = split_statements(sql);
		assert_eq!(statements.len(), 3);
		assert_eq!(statements[0], "DROP TABLE IF EXISTS `a`");
		assert!(statements[1].starts_with("CREATE TABLE `a`"));
		assert!(statements[1].contains("id int"));
	}

	#[test]
	fn test_split_statements_filters_comments_and_fragments() {
		let sql = "\
-- MySQL dump 10.13  Distrib 8.0.36
# another comment

ok
DROP TABLE IF EXISTS `wp_options`;
-- Table structure for table `wp_options`
INSERT INTO `wp_options` VALUES (1, 'siteurl');
";
		let statements = split_statements(sql);
		assert_eq!(statements.len(), 2);
		assert!(statements[0].starts_with("DROP TABLE"));
		assert!(statements[1].starts_with("INSERT INTO"));
	}

	#[test]
	fn test_split_statements_ignores_unterminated_tail() {
		let sql = "INSERT INTO `a` VALUES (1);\ngarbage without terminator";
		let statements = split_statements(sql);
		assert_eq!(statements.len(), 1);
	}

	#[test]
	fn test_escape_sql_string() {
		assert_eq!(escape_sql_string("plain"), "plain");
		assert_eq!(escape_sql_string("it's"), "it\\'s");
		assert_eq!(escape_sql_string("a\\b"), "a\\\\b");
		assert_eq!(escape_sql_string("line\nbreak"), "line\\nbreak");
	}

	#[test]
	fn test_quote_ident() {
		assert_eq!(quote_ident("wp_posts"), "`wp_posts`");
		assert_eq!(quote_ident("odd`name"), "`odd``name`");
	}

	#[test]
	fn test_client_defaults_quotes_password() {
		let target = DbTarget {
			host: "db.example.com".to_string(),
			port: 3306,
			name: "site".to_string(),
			user: "site".to_string(),
			password: "pa\"ss".to_string(),
		};
		let defaults = client_defaults(&target);
		assert!(defaults.starts_with("[client]\n"));
		assert!(defaults.contains("host=db.example.com"));
		assert!(defaults.contains("password=\"pa\\\"ss\""));
	}

	#[test]
	fn test_client_defaults_local_host_fallback() {
		let target = DbTarget::default();
		assert!(client_defaults(&target).contains("host=localhost"));
	}
}

// vim: ts=4
