//! Binary entry point for the batchq CLI.

use std::collections::BTreeMap;
use std::env;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::thread;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use batchq::{
    FsError, InteractiveProcessFactory, JobDescription, JobQueueScheduler, JobStatus,
    LocalFileSystem, LocalProcessFactory, ProcessError, SchedulerConfig, SchedulerError,
    SshProcessFactory, SshTarget,
};

mod cli;

use cli::{Cli, Command, ExecCommand, JobArgs, RunCommand, SshArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("transport error: {0}")]
    Process(#[from] ProcessError),
    #[error("file system error: {0}")]
    Fs(#[from] FsError),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error("invalid environment entry {0:?}: expected KEY=VALUE")]
    InvalidEnv(String),
    #[error("failed to write output: {0}")]
    Output(String),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let exit_code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(log_level: &str) {
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_owned());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();
}

fn dispatch(command: Command) -> Result<i32, CliError> {
    match command {
        Command::Run(args) => run_command(args),
        Command::Exec(args) => exec_command(args),
    }
}

fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let mut description = build_description(&args.job, &args.command)?;
    description.stdin = args.stdin.map(Utf8PathBuf::from);
    description.stdout = args.stdout;
    description.stderr = args.stderr;

    let scheduler = open_scheduler(&args.ssh)?;
    let mut job_ids = Vec::new();
    for _ in 0..args.repeat {
        job_ids.push(scheduler.submit_batch_job(description.clone())?);
    }

    let mut out = io::stdout().lock();
    let mut exit_code = 0;
    let mut failed = false;
    for job_id in &job_ids {
        let mut status = scheduler.wait_until_done(job_id, args.timeout_ms)?;
        if !status.done {
            warn!(job_id = %job_id, "job did not finish in time; cancelling");
            status = scheduler.cancel_job(job_id)?;
        }
        write_status(&mut out, &status, args.json)?;

        match status.exit_code {
            Some(code) if code != 0 && exit_code == 0 => exit_code = code,
            Some(_) => {}
            None => failed = true,
        }
        failed |= status.has_error();
    }
    scheduler.close()?;

    if exit_code == 0 && failed {
        return Ok(1);
    }
    Ok(exit_code)
}

fn exec_command(args: ExecCommand) -> Result<i32, CliError> {
    let description = build_description(&args.job, &args.command)?;
    let scheduler = open_scheduler(&args.ssh)?;
    let mut streams = scheduler.submit_interactive_job(description)?;
    let job_id = streams.job_id().to_owned();

    if let Some(mut stdin) = streams.take_stdin() {
        // Detached: the terminal read may block past the job's end.
        let spawned = thread::Builder::new()
            .name(String::from("exec-stdin"))
            .spawn(move || {
                let copied = io::copy(&mut io::stdin().lock(), &mut stdin);
                debug!(?copied, "stdin closed");
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to forward stdin");
        }
    }
    let stdout = streams.take_stdout().map(|mut source| {
        thread::spawn(move || io::copy(&mut source, &mut io::stdout().lock()))
    });
    let stderr = streams.take_stderr().map(|mut source| {
        thread::spawn(move || io::copy(&mut source, &mut io::stderr().lock()))
    });

    let status = scheduler.wait_until_done(&job_id, 0)?;
    for forwarder in [stdout, stderr].into_iter().flatten() {
        if let Ok(Err(err)) = forwarder.join() {
            warn!(error = %err, "failed to forward output");
        }
    }
    scheduler.close()?;

    if let Some(ref error) = status.error {
        writeln!(io::stderr(), "job {job_id}: {error}").ok();
        return Ok(1);
    }
    Ok(status.exit_code.unwrap_or(1))
}

fn build_description(job: &JobArgs, command: &[String]) -> Result<JobDescription, CliError> {
    validate_command_args(command)?;
    let Some((executable, arguments)) = command.split_first() else {
        return Err(CliError::InvalidCommand(String::from("command is empty")));
    };

    let mut description = JobDescription::builder(executable.as_str())
        .args(arguments.iter().map(String::as_str))
        .max_runtime_minutes(job.max_runtime)
        .build();
    description.name = job.name.clone();
    description.queue_name = job.queue.clone();
    description.working_directory = job.workdir.as_deref().map(Utf8PathBuf::from);
    description.environment = parse_env(&job.env)?;
    Ok(description)
}

fn parse_env(entries: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
            _ => Err(CliError::InvalidEnv(entry.clone())),
        })
        .collect()
}

fn open_scheduler(ssh: &SshArgs) -> Result<JobQueueScheduler, CliError> {
    let config =
        SchedulerConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;

    let cwd = env::current_dir().map_err(|err| CliError::Config(err.to_string()))?;
    let root = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|path| CliError::Config(format!("non-UTF-8 working directory {}", path.display())))?;
    let fs = LocalFileSystem::open(root.clone())?;

    let factory: Arc<dyn InteractiveProcessFactory> = match ssh_target(ssh) {
        Some(target) => Arc::new(SshProcessFactory::new(target)?),
        None => Arc::new(LocalProcessFactory::new(root)),
    };
    Ok(JobQueueScheduler::new(config, factory, Arc::new(fs))?)
}

fn ssh_target(ssh: &SshArgs) -> Option<SshTarget> {
    let host = ssh.ssh_host.as_ref()?;
    let user = ssh
        .ssh_user
        .clone()
        .or_else(|| env::var("USER").ok())
        .unwrap_or_else(|| String::from("root"));
    Some(SshTarget {
        ssh_bin: ssh.ssh_bin.clone(),
        port: ssh.ssh_port,
        identity_file: ssh.ssh_identity.clone(),
        ..SshTarget::new(user, host.as_str())
    })
}

fn validate_command_args(args: &[String]) -> Result<(), CliError> {
    for arg in args {
        if arg
            .chars()
            .any(|ch| matches!(ch, '\u{0000}'..='\u{001F}' | '\u{007F}'))
        {
            return Err(CliError::InvalidCommand(String::from(concat!(
                "command arguments must not contain control characters (ASCII ",
                "0x00-0x1F or 0x7F, e.g. newline, carriage return, tab, NUL)"
            ))));
        }
    }
    Ok(())
}

fn write_status(mut target: impl Write, status: &JobStatus, json: bool) -> Result<(), CliError> {
    let line = if json {
        serde_json::to_string(status).map_err(|err| CliError::Output(err.to_string()))?
    } else {
        render_status(status)
    };
    writeln!(target, "{line}").map_err(|err| CliError::Output(err.to_string()))
}

fn render_status(status: &JobStatus) -> String {
    let exit = status
        .exit_code
        .map_or_else(|| String::from("-"), |code| code.to_string());
    let line = format!("{} {} exit={exit}", status.job_id, status.state_label());
    status
        .error
        .as_ref()
        .map_or_else(|| line.clone(), |error| format!("{line} error={error}"))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
