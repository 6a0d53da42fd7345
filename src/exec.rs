//! External command execution.
//!
//! Every external tool is described by an [`Invocation`]: a program plus an
//! argument list. Nothing in this crate concatenates credentials or paths
//! into shell strings; the only place a shell ever sees our arguments is on
//! the far side of ssh, where each word is escaped first.

use async_trait::async_trait;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::error::ExecError;
use crate::logging::debug;
use crate::profile::{ConnectionProfile, SshAuth};

/// A structured command description: program and argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
	pub program: String,
	pub args: Vec<String>,
}

impl Invocation {
	pub fn new(program: impl Into<String>) -> Self {
		Invocation { program: program.into(), args: Vec::new() }
	}

	pub fn arg(mut self, arg: impl Into<String>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}
}

/// Captured result of one external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
	/// Exit status code; -1 when the process died on a signal
	pub status: i32,

	/// Combined stdout and stderr text
	pub output: String,
}

impl CommandOutput {
	pub fn success(&self) -> bool {
		self.status == 0
	}
}

/// Remote Execution Capability seam: runs an invocation and captures its
/// exit code and combined output. The engine only builds invocations and
/// interprets results.
#[async_trait]
pub trait CommandRunner: Send + Sync {
	async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;
}

/// Runner backed by `tokio::process`, blocking until the tool exits
pub struct LocalRunner;

#[async_trait]
impl CommandRunner for LocalRunner {
	async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
		debug!("exec: {} ({} args)", invocation.program, invocation.args.len());
		let out = tokio::process::Command::new(&invocation.program)
			.args(&invocation.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.output()
			.await
			.map_err(|e| ExecError::SpawnFailed { program: invocation.program.clone(), source: e })?;

		let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
		text.push_str(&String::from_utf8_lossy(&out.stderr));
		Ok(CommandOutput { status: out.status.code().unwrap_or(-1), output: text })
	}
}

/// Locate an external tool by probing well-known absolute paths, then PATH
pub fn find_tool(name: &str) -> Option<String> {
	let candidates = [
		format!("/usr/bin/{}", name),
		format!("/usr/local/bin/{}", name),
		format!("/opt/homebrew/bin/{}", name),
		format!("/usr/local/mysql/bin/{}", name),
	];
	for candidate in &candidates {
		if Path::new(candidate).is_file() {
			return Some(candidate.clone());
		}
	}
	if let Some(paths) = env::var_os("PATH") {
		for dir in env::split_paths(&paths) {
			if dir.join(name).is_file() {
				return Some(name.to_string());
			}
		}
	}
	None
}

/// Like [`find_tool`] but an absent tool is an error
pub fn require_tool(name: &str) -> Result<String, ExecError> {
	find_tool(name).ok_or_else(|| ExecError::ToolUnavailable { tool: name.to_string() })
}

/// Quote one word for the remote side of an ssh command line
pub fn shell_word(word: &str) -> String {
	let safe = !word.is_empty()
		&& word
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
	if safe {
		word.to_string()
	} else {
		let mut quoted = String::with_capacity(word.len() + 2);
		quoted.push('\'');
		for c in word.chars() {
			if c == '\'' {
				quoted.push_str("'\\''");
			} else {
				quoted.push(c);
			}
		}
		quoted.push('\'');
		quoted
	}
}

/// Transient credential file: created with owner-only permissions right
/// before a single use and removed on every exit path when dropped.
pub struct SecretFile {
	file: tempfile::NamedTempFile,
}

impl SecretFile {
	pub fn new(secret: &str) -> Result<Self, ExecError> {
		let mut file =
			tempfile::NamedTempFile::new().map_err(|e| ExecError::SecretFileFailed { source: e })?;
		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600))
				.map_err(|e| ExecError::SecretFileFailed { source: e })?;
		}
		file.write_all(secret.as_bytes())
			.and_then(|_| file.flush())
			.map_err(|e| ExecError::SecretFileFailed { source: e })?;
		Ok(SecretFile { file })
	}

	pub fn path(&self) -> &Path {
		self.file.path()
	}

	pub fn path_string(&self) -> String {
		self.file.path().display().to_string()
	}
}

/// An invocation plus whatever transient credential file must outlive it
pub struct PreparedCommand {
	pub invocation: Invocation,
	/// Held so the credential file survives until the command has run
	pub secret: Option<SecretFile>,
}

/// Direction of a single-file copy through the remote transfer capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
	FromRemote,
	ToRemote,
}

/// Builder for ssh and scp invocations against the profile's remote host
#[derive(Debug, Clone)]
pub struct RemoteShell {
	host: String,
	user: String,
	port: u16,
	auth: SshAuth,
}

impl RemoteShell {
	pub fn from_profile(profile: &ConnectionProfile) -> Self {
		RemoteShell {
			host: profile.ssh_host.clone(),
			user: profile.ssh_user.clone(),
			port: profile.ssh_port,
			auth: profile.ssh_auth(),
		}
	}

	fn target(&self) -> String {
		format!("{}@{}", self.user, self.host)
	}

	fn common_options(&self, port_flag: &str) -> Vec<String> {
		let mut args = vec![
			port_flag.to_string(),
			self.port.to_string(),
			"-o".to_string(),
			"StrictHostKeyChecking=no".to_string(),
			"-o".to_string(),
			"UserKnownHostsFile=/dev/null".to_string(),
		];
		if let SshAuth::KeyFile(key) = &self.auth {
			args.push("-i".to_string());
			args.push(key.clone());
		}
		args
	}

	/// Wrap an invocation in sshpass when password auth is active. The
	/// password travels through a 0600 file, never through argv.
	pub fn wrap_auth(&self, invocation: Invocation) -> Result<PreparedCommand, ExecError> {
		match &self.auth {
			SshAuth::Password(password) => {
				let sshpass = require_tool("sshpass")?;
				let secret = SecretFile::new(password)?;
				let mut args = vec!["-f".to_string(), secret.path_string(), invocation.program];
				args.extend(invocation.args);
				Ok(PreparedCommand {
					invocation: Invocation { program: sshpass, args },
					secret: Some(secret),
				})
			}
			_ => Ok(PreparedCommand { invocation, secret: None }),
		}
	}

	/// Build an ssh invocation executing `remote_argv` on the remote host.
	/// Each word is escaped for the remote shell.
	pub fn command(&self, remote_argv: &[String]) -> Result<PreparedCommand, ExecError> {
		let ssh = find_tool("ssh").unwrap_or_else(|| "ssh".to_string());
		let mut invocation = Invocation::new(ssh).args(self.common_options("-p"));
		invocation = invocation.arg(self.target());
		for word in remote_argv {
			invocation = invocation.arg(shell_word(word));
		}
		self.wrap_auth(invocation)
	}

	/// Build an scp invocation copying one file between hosts
	pub fn copy(
		&self,
		source: &str,
		dest: &str,
		direction: CopyDirection,
	) -> Result<PreparedCommand, ExecError> {
		let scp = require_tool("scp")?;
		let mut invocation = Invocation::new(scp).args(self.common_options("-P"));
		match direction {
			CopyDirection::FromRemote => {
				invocation = invocation
					.arg(format!("{}:{}", self.target(), source))
					.arg(dest);
			}
			CopyDirection::ToRemote => {
				invocation = invocation
					.arg(source)
					.arg(format!("{}:{}", self.target(), dest));
			}
		}
		self.wrap_auth(invocation)
	}

	/// ssh transport string for rsync's `-e` flag (a single rsync argument,
	/// not a locally executed shell line)
	pub fn rsync_transport(&self) -> String {
		let ssh = find_tool("ssh").unwrap_or_else(|| "ssh".to_string());
		let mut transport = format!(
			"{} -p {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
			ssh, self.port
		);
		if let SshAuth::KeyFile(key) = &self.auth {
			transport.push_str(" -i ");
			transport.push_str(key);
		}
		transport
	}

	pub fn auth(&self) -> &SshAuth {
		&self.auth
	}
}

/// State directory for profiles and locks (`~/.sitesync`)
pub fn state_dir() -> Result<PathBuf, std::io::Error> {
	let home = env::var("HOME").map_err(|_| {
		std::io::Error::new(std::io::ErrorKind::NotFound, "Could not determine HOME directory")
	})?;
	let dir = PathBuf::from(home).join(".sitesync");
	if !dir.is_dir() {
		fs::create_dir_all(&dir)?;
	}
	Ok(dir)
}


// vim: ts=4
