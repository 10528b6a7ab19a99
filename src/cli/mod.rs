//! Command-line interface definitions for the `batchq` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `batchq` binary.
#[derive(Debug, Parser)]
#[command(
    name = "batchq",
    about = "Run commands through single, multi and unlimited job queues",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log filter used when `RUST_LOG` is unset (for example `info` or
    /// `batchq=debug`).
    #[arg(long, global = true, value_name = "FILTER", default_value = "warn")]
    pub(crate) log_level: String,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of `batchq`.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Submit batch jobs and wait for them to finish.
    #[command(
        name = "run",
        about = "Submit batch jobs with file-redirected output and wait for them"
    )]
    Run(RunCommand),
    /// Run one interactive job attached to this terminal.
    #[command(
        name = "exec",
        about = "Run an interactive job wired to this terminal's streams"
    )]
    Exec(ExecCommand),
}

/// Options shared by every subcommand that submits jobs.
#[derive(Args, Clone, Debug, Default)]
pub(crate) struct JobArgs {
    /// Queue to submit to: `single`, `multi` or `unlimited`.
    #[arg(long, value_name = "QUEUE")]
    pub(crate) queue: Option<String>,
    /// Human-readable job name reported in statuses.
    #[arg(long, value_name = "NAME")]
    pub(crate) name: Option<String>,
    /// Working directory of the job.
    #[arg(long, value_name = "DIR")]
    pub(crate) workdir: Option<String>,
    /// Extra environment variable for the job (repeatable).
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub(crate) env: Vec<String>,
    /// Maximum runtime in minutes; 0 means unlimited.
    #[arg(long, value_name = "MINUTES", default_value_t = 0)]
    pub(crate) max_runtime: i64,
}

/// Options selecting the SSH transport instead of local processes.
#[derive(Args, Clone, Debug)]
pub(crate) struct SshArgs {
    /// Run jobs on this host through the system `ssh` client.
    #[arg(long, value_name = "HOST")]
    pub(crate) ssh_host: Option<String>,
    /// Remote user; defaults to `$USER`, then `root`.
    #[arg(long, value_name = "USER", requires = "ssh_host")]
    pub(crate) ssh_user: Option<String>,
    /// Remote SSH port.
    #[arg(long, value_name = "PORT", default_value_t = 22, requires = "ssh_host")]
    pub(crate) ssh_port: u16,
    /// Private key passed to `ssh -i`; `~` expands to the home directory.
    #[arg(long, value_name = "PATH", requires = "ssh_host")]
    pub(crate) ssh_identity: Option<String>,
    /// Path to the `ssh` executable.
    #[arg(long, value_name = "PATH", default_value = "ssh", requires = "ssh_host")]
    pub(crate) ssh_bin: String,
}

/// Arguments for the `batchq run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    #[command(flatten)]
    pub(crate) job: JobArgs,
    #[command(flatten)]
    pub(crate) ssh: SshArgs,
    /// File fed to the job's standard input.
    #[arg(long, value_name = "PATH")]
    pub(crate) stdin: Option<String>,
    /// Standard output file; `%j` is replaced by the job id.
    #[arg(long, value_name = "TEMPLATE")]
    pub(crate) stdout: Option<String>,
    /// Standard error file; `%j` is replaced by the job id.
    #[arg(long, value_name = "TEMPLATE")]
    pub(crate) stderr: Option<String>,
    /// Number of copies of the job to submit.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub(crate) repeat: u32,
    /// Milliseconds to wait for each job; 0 waits forever. Jobs still running
    /// afterwards are cancelled.
    #[arg(long, value_name = "MILLIS", default_value_t = 0)]
    pub(crate) timeout_ms: i64,
    /// Print statuses as JSON lines.
    #[arg(long)]
    pub(crate) json: bool,
    /// Command to execute (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}

/// Arguments for the `batchq exec` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ExecCommand {
    #[command(flatten)]
    pub(crate) job: JobArgs,
    #[command(flatten)]
    pub(crate) ssh: SshArgs,
    /// Command to execute (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) command: Vec<String>,
}
