//! Remote processes started through the system `ssh` client.
//!
//! The factory wraps each job in a single remote command line: an optional
//! directory change, then `exec` of the program (through `env` when the job
//! carries environment variables). Every component is shell-escaped, so job
//! arguments reach the remote program verbatim.

use std::ffi::OsString;
use std::process::{Command, Stdio};

use shell_escape::unix::escape;
use tracing::debug;

use crate::job::JobDescription;

use super::{InteractiveProcess, InteractiveProcessFactory, LocalProcess, ProcessError};

/// Connection settings for [`SshProcessFactory`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Remote user to connect as.
    pub user: String,
    /// Remote host name or address.
    pub host: String,
    /// TCP port of the SSH daemon.
    pub port: u16,
    /// Private key passed with `-i`. Supports `~/` expansion.
    pub identity_file: Option<String>,
    /// Whether to force batch mode to avoid password prompts.
    pub batch_mode: bool,
}

impl SshTarget {
    /// Creates a target for `user@host` on port 22 using the `ssh` on `PATH`.
    #[must_use]
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            user: user.into(),
            host: host.into(),
            port: 22,
            identity_file: None,
            batch_mode: true,
        }
    }

    /// Ensures required values are present after trimming whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::InvalidTarget`] naming the first blank field.
    pub fn validate(&self) -> Result<(), ProcessError> {
        for (field, value) in [
            ("ssh_bin", Some(self.ssh_bin.as_str())),
            ("user", Some(self.user.as_str())),
            ("host", Some(self.host.as_str())),
            ("identity_file", self.identity_file.as_deref()),
        ] {
            if value.is_some_and(|v| v.trim().is_empty()) {
                return Err(ProcessError::InvalidTarget {
                    field: field.to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Starts jobs on a remote host via the `ssh` binary.
#[derive(Clone, Debug)]
pub struct SshProcessFactory {
    target: SshTarget,
}

impl SshProcessFactory {
    /// Creates a factory for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::InvalidTarget`] when validation fails.
    pub fn new(target: SshTarget) -> Result<Self, ProcessError> {
        target.validate()?;
        Ok(Self { target })
    }

    /// Connection settings in use.
    #[must_use]
    pub const fn target(&self) -> &SshTarget {
        &self.target
    }

    pub(crate) fn build_ssh_args(&self, description: &JobDescription) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.target.port.to_string()),
        ];

        if let Some(ref identity_file) = self.target.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.target.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            self.target.user, self.target.host
        )));
        args.push(OsString::from(render_remote_command(description)));
        args
    }
}

impl InteractiveProcessFactory for SshProcessFactory {
    fn job_id_prefix(&self) -> &str {
        "ssh"
    }

    fn create(
        &self,
        description: &JobDescription,
        job_id: &str,
    ) -> Result<Box<dyn InteractiveProcess>, ProcessError> {
        let args = self.build_ssh_args(description);
        let child = Command::new(&self.target.ssh_bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                program: self.target.ssh_bin.clone(),
                message: err.to_string(),
            })?;
        debug!(job_id, host = %self.target.host, "started ssh process");
        Ok(Box::new(LocalProcess::new(job_id, child)))
    }
}

/// Renders the remote shell command for `description`.
pub(crate) fn render_remote_command(description: &JobDescription) -> String {
    let mut words = Vec::with_capacity(description.arguments.len() + 3);
    words.push(String::from("exec"));
    if !description.environment.is_empty() {
        words.push(String::from("env"));
        for (key, value) in &description.environment {
            words.push(escape(format!("{key}={value}").into()).into_owned());
        }
    }
    words.push(escape(description.executable.as_str().into()).into_owned());
    for arg in &description.arguments {
        words.push(escape(arg.as_str().into()).into_owned());
    }
    let command = words.join(" ");

    description
        .working_directory
        .as_ref()
        .map_or_else(
            || command.clone(),
            |dir| format!("cd {} && {command}", escape(dir.as_str().into())),
        )
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// The input is returned unchanged when `HOME` is not set.
///
/// # Examples
///
/// ```
/// # use batchq::process::expand_tilde;
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
