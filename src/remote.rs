// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote execution channel.
//!
//! Everything sitepatch knows about the remote target it learns through a
//! [`RemoteChannel`]: a way to run a shell command and collect its exit code,
//! stdout and stderr, plus single-file upload and download. The channel is
//! opened once by a [`Connector`] and then reused for as many calls as the
//! caller needs, so a batch of patches pays connection setup only once.
//!
//! # Implementations
//!
//! - [`SshChannel`] talks to the real target through the system `ssh` and
//!   `scp` binaries. Session reuse is done with OpenSSH connection
//!   multiplexing: a master connection is started on connect, every later
//!   call rides on its control socket, and the master is told to exit on drop.
//! - [`LocalShell`] runs commands through `sh -c` inside a local directory and
//!   treats transfers as file copies. It backs local WP-CLI probing, and lets
//!   a plain directory stand in for a remote site.
//!
//! # Shell Helpers
//!
//! The free functions at the bottom of this module build the handful of POSIX
//! commands the patch engine needs (existence probes, `mkdir -p`, `cp -p`,
//! mode bits). All paths are single-quoted through [`shell_quote`].

use std::{
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

/// Output of a command executed through a [`RemoteChannel`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code reported for the command, `-1` if killed by a signal.
    pub code: i32,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Construct new command output.
    pub fn new(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Command exited with code zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Turn a non-zero exit code into [`RemoteError::Command`].
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Command`] carrying the remote-reported message
    ///   if the command failed.
    pub fn check(self, command: impl Into<String>) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }

        Err(RemoteError::Command {
            command: command.into(),
            code: self.code,
            message: chomp(if self.stderr.is_empty() {
                &self.stdout
            } else {
                &self.stderr
            }),
        })
    }

    fn from_output(output: Output) -> Self {
        Self {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
            stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
        }
    }
}

/// Command execution and file transfer against a target host.
pub trait RemoteChannel {
    /// Execute shell command on target.
    ///
    /// A non-zero exit code is not an error at this level. Only failure to
    /// run the command at all is.
    fn execute(&self, command: &str) -> Result<CommandOutput>;

    /// Upload local file to target path.
    fn upload(&self, local: &Path, remote: &str) -> Result<()>;

    /// Download target file to local path, creating local parent directories.
    fn download(&self, remote: &str, local: &Path) -> Result<()>;

    /// Human readable name of the target for log output.
    fn target(&self) -> String;
}

/// Opens [`RemoteChannel`] sessions.
pub trait Connector {
    /// Channel type produced by this connector.
    type Channel: RemoteChannel;

    /// Open a new session.
    fn connect(&self) -> Result<Self::Channel>;
}

/// Connector for [`SshChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConnector {
    host: String,
}

impl SshConnector {
    /// Construct new SSH connector for a host alias.
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Connector for SshConnector {
    type Channel = SshChannel;

    fn connect(&self) -> Result<SshChannel> {
        SshChannel::connect(&self.host)
    }
}

/// Multiplexed SSH session.
#[derive(Debug)]
pub struct SshChannel {
    host: String,
    control_path: PathBuf,

    // INVARIANT: Keep control directory alive as long as the master runs.
    _control_dir: TempDir,
}

impl SshChannel {
    /// Start a master connection to target host.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Io`] if control directory cannot be created.
    /// - Return [`RemoteError::Spawn`] if `ssh` cannot be run.
    /// - Return [`RemoteError::Connect`] if the master connection fails.
    #[instrument(level = "debug")]
    pub fn connect(host: &str) -> Result<Self> {
        let control_dir = tempfile::Builder::new()
            .prefix("sitepatch-ssh-")
            .tempdir()?;
        let control_path = control_dir.path().join("master");

        debug!("start ssh master for {host}");
        let output = syscall(
            "ssh",
            [
                "-o".into(),
                "ControlMaster=yes".into(),
                "-o".into(),
                format!("ControlPath={}", control_path.display()),
                "-o".into(),
                "ControlPersist=yes".into(),
                "-o".into(),
                "BatchMode=yes".into(),
                "-f".into(),
                "-N".into(),
                host.to_string(),
            ],
        )?;

        if !output.success() {
            return Err(RemoteError::Connect {
                host: host.into(),
                message: chomp(&output.stderr),
            });
        }

        info!("ssh connection established with {host}");
        Ok(Self {
            host: host.into(),
            control_path,
            _control_dir: control_dir,
        })
    }

    fn control_opts(&self) -> [String; 2] {
        [
            "-o".into(),
            format!("ControlPath={}", self.control_path.display()),
        ]
    }
}

impl RemoteChannel for SshChannel {
    #[instrument(skip(self), level = "debug")]
    fn execute(&self, command: &str) -> Result<CommandOutput> {
        let mut args = self.control_opts().to_vec();
        args.extend([self.host.clone(), "--".into(), command.into()]);
        let output = syscall("ssh", args)?;
        if !output.success() {
            debug!("remote command exited with code {}", output.code);
        }

        Ok(output)
    }

    #[instrument(skip(self), level = "debug")]
    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let mut args = self.control_opts().to_vec();
        args.extend([
            "-q".into(),
            "-p".into(),
            local.display().to_string(),
            format!("{}:{remote}", self.host),
        ]);
        let output = syscall("scp", args)?;
        if !output.success() {
            return Err(RemoteError::Upload {
                local: local.to_path_buf(),
                remote: remote.into(),
                message: chomp(&output.stderr),
            });
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        make_local_parent(local)?;
        let mut args = self.control_opts().to_vec();
        args.extend([
            "-q".into(),
            format!("{}:{remote}", self.host),
            local.display().to_string(),
        ]);
        let output = syscall("scp", args)?;
        if !output.success() {
            return Err(RemoteError::Download {
                remote: remote.into(),
                local: local.to_path_buf(),
                message: chomp(&output.stderr),
            });
        }

        Ok(())
    }

    fn target(&self) -> String {
        self.host.clone()
    }
}

impl Drop for SshChannel {
    fn drop(&mut self) {
        let mut args = self.control_opts().to_vec();
        args.extend(["-O".into(), "exit".into(), self.host.clone()]);
        match syscall("ssh", args) {
            Ok(output) if output.success() => debug!("ssh connection closed with {}", self.host),
            Ok(output) => warn!(
                "failed to close ssh connection with {}: {}",
                self.host,
                chomp(&output.stderr)
            ),
            Err(error) => warn!("failed to close ssh connection with {}: {error}", self.host),
        }
    }
}

/// Connector for [`LocalShell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    /// Construct new local connector rooted at target directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Connector for LocalConnector {
    type Channel = LocalShell;

    fn connect(&self) -> Result<LocalShell> {
        Ok(LocalShell::new(&self.root))
    }
}

/// Shell running on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalShell {
    workdir: PathBuf,
}

impl LocalShell {
    /// Construct new local shell that runs commands inside target directory.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl RemoteChannel for LocalShell {
    #[instrument(skip(self), level = "debug")]
    fn execute(&self, command: &str) -> Result<CommandOutput> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .output()
            .map_err(|err| RemoteError::Spawn {
                program: "sh".into(),
                source: err,
            })?;

        Ok(CommandOutput::from_output(output))
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let remote = self.workdir.join(remote);
        make_local_parent(&remote)?;
        fs::copy(local, &remote).map_err(|err| RemoteError::Upload {
            local: local.to_path_buf(),
            remote: remote.display().to_string(),
            message: err.to_string(),
        })?;

        Ok(())
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        make_local_parent(local)?;
        fs::copy(self.workdir.join(remote), local).map_err(|err| RemoteError::Download {
            remote: remote.into(),
            local: local.to_path_buf(),
            message: err.to_string(),
        })?;

        Ok(())
    }

    fn target(&self) -> String {
        format!("localhost:{}", self.workdir.display())
    }
}

/// Quote string for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Check that a regular file exists on target.
///
/// # Errors
///
/// - Return [`RemoteError::Command`] if the probe itself could not run.
pub fn file_exists(channel: &impl RemoteChannel, path: &str) -> Result<bool> {
    probe(channel, "-f", path)
}

/// Check that a directory exists on target.
///
/// # Errors
///
/// - Return [`RemoteError::Command`] if the probe itself could not run.
pub fn dir_exists(channel: &impl RemoteChannel, path: &str) -> Result<bool> {
    probe(channel, "-d", path)
}

fn probe(channel: &impl RemoteChannel, flag: &str, path: &str) -> Result<bool> {
    let command = format!(
        "test {flag} {} && echo EXISTS || echo NOT_FOUND",
        shell_quote(path)
    );
    let output = channel.execute(&command)?.check(&command)?;

    Ok(output.stdout.trim() == "EXISTS")
}

/// Create directory and all missing parents on target.
///
/// # Errors
///
/// - Return [`RemoteError::Command`] if `mkdir` fails.
pub fn make_dirs(channel: &impl RemoteChannel, path: &str) -> Result<()> {
    let command = format!("mkdir -p {}", shell_quote(path));
    channel.execute(&command)?.check(command)?;

    Ok(())
}

/// Copy file on target, preserving mode and timestamps.
///
/// # Errors
///
/// - Return [`RemoteError::Command`] if `cp` fails.
pub fn copy_file(channel: &impl RemoteChannel, from: &str, to: &str) -> Result<()> {
    let command = format!("cp -p {} {}", shell_quote(from), shell_quote(to));
    channel.execute(&command)?.check(command)?;

    Ok(())
}

/// Read octal mode bits of a file on target.
///
/// Returns `None` if the mode cannot be read.
///
/// # Errors
///
/// - Return [`RemoteError`] only if the command could not be run at all.
pub fn file_mode(channel: &impl RemoteChannel, path: &str) -> Result<Option<String>> {
    let output = channel.execute(&format!("stat -c '%a' {}", shell_quote(path)))?;
    let mode = output.stdout.trim();
    if !output.success() || mode.is_empty() || !mode.chars().all(|c| c.is_ascii_digit()) {
        return Ok(None);
    }

    Ok(Some(mode.to_string()))
}

/// Set octal mode bits of a file on target.
///
/// # Errors
///
/// - Return [`RemoteError::Command`] if `chmod` fails.
pub fn set_file_mode(channel: &impl RemoteChannel, path: &str, mode: &str) -> Result<()> {
    let command = format!("chmod {mode} {}", shell_quote(path));
    channel.execute(&command)?.check(command)?;

    Ok(())
}

/// Parent directory of a remote path.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(index) => Some(&trimmed[..index]),
        None => None,
    }
}

fn make_local_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            mkdirp::mkdirp(parent)?;
        }
    }

    Ok(())
}

fn syscall(
    cmd: &'static str,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<CommandOutput> {
    let output = Command::new(cmd)
        .args(args)
        .output()
        .map_err(|err| RemoteError::Spawn {
            program: cmd.into(),
            source: err,
        })?;

    Ok(CommandOutput::from_output(output))
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: &str) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .unwrap_or(message)
        .to_string()
}

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Local program could not be started.
    #[error("failed to run {program}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// Master connection could not be established.
    #[error("cannot connect to {host}: {message}")]
    Connect { host: String, message: String },

    /// Remote command exited with a failure code.
    #[error("remote command {command:?} failed with code {code}: {message}")]
    Command {
        command: String,
        code: i32,
        message: String,
    },

    /// File upload failed.
    #[error("failed to upload {local:?} to {remote}: {message}")]
    Upload {
        local: PathBuf,
        remote: String,
        message: String,
    },

    /// File download failed.
    #[error("failed to download {remote} to {local:?}: {message}")]
    Download {
        remote: String,
        local: PathBuf,
        message: String,
    },

    /// Local file system operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;
