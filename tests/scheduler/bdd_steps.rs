//! BDD step definitions for scheduler behaviour.

use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use batchq::test_support::MockBehaviour;
use batchq::{JobDescription, JobError, SchedulerConfig, SchedulerError};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::SchedulerContext;

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

fn aap(queue: &str) -> JobDescription {
    JobDescription::builder("/bin/aap").queue(queue).build()
}

#[given("a scheduler whose jobs run for {millis:u64} ms")]
fn jobs_run_for(scheduler_context: &SchedulerContext, millis: u64) {
    scheduler_context.start(
        MockBehaviour::Exit {
            runtime: Duration::from_millis(millis),
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        },
        SchedulerConfig::default(),
    );
}

#[given("a scheduler with {slots:usize} multi slots whose jobs run for {millis:u64} ms")]
fn multi_slots(scheduler_context: &SchedulerContext, slots: usize, millis: u64) {
    scheduler_context.start(
        MockBehaviour::Exit {
            runtime: Duration::from_millis(millis),
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        },
        SchedulerConfig {
            multi_queue_slots: slots,
            ..SchedulerConfig::default()
        },
    );
}

#[given("a scheduler with a history of {size:i64} whose jobs finish at once")]
fn bounded_history(scheduler_context: &SchedulerContext, size: i64) {
    scheduler_context.start(
        MockBehaviour::Exit {
            runtime: Duration::ZERO,
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        },
        SchedulerConfig {
            history_size: size,
            ..SchedulerConfig::default()
        },
    );
}

#[given("a scheduler whose jobs hang until cancelled")]
fn jobs_hang(scheduler_context: &SchedulerContext) {
    scheduler_context.start(MockBehaviour::Hang, SchedulerConfig::default());
}

#[given("a scheduler whose jobs fail to start with \"{message}\"")]
fn jobs_fail_to_start(scheduler_context: &SchedulerContext, message: String) {
    scheduler_context.start(
        MockBehaviour::FailStart { message },
        SchedulerConfig::default(),
    );
}

#[given("a scheduler whose jobs echo their input")]
fn jobs_echo(scheduler_context: &SchedulerContext) {
    scheduler_context.start(MockBehaviour::Echo, SchedulerConfig::default());
}

#[given("a scheduler whose jobs print \"{text}\"")]
fn jobs_print(scheduler_context: &SchedulerContext, text: String) {
    scheduler_context.start(
        MockBehaviour::Exit {
            runtime: Duration::from_millis(10),
            exit_code: 0,
            stdout: format!("{text}\n").into_bytes(),
            stderr: Vec::new(),
        },
        SchedulerConfig::default(),
    );
}

fn submit_many(
    scheduler_context: &SchedulerContext,
    count: usize,
    queue: &str,
) -> Result<(), StepError> {
    let scheduler = scheduler_context.scheduler();
    for _ in 0..count {
        let job_id = scheduler.submit_batch_job(aap(queue))?;
        scheduler_context.record_submission(job_id);
    }
    Ok(())
}

#[when("I submit {count:usize} job to the \"{queue}\" queue")]
fn submit_one(
    scheduler_context: &SchedulerContext,
    count: usize,
    queue: String,
) -> Result<(), StepError> {
    submit_many(scheduler_context, count, &queue)
}

#[when("I submit {count:usize} jobs to the \"{queue}\" queue")]
fn submit_jobs(
    scheduler_context: &SchedulerContext,
    count: usize,
    queue: String,
) -> Result<(), StepError> {
    submit_many(scheduler_context, count, &queue)
}

#[when("I submit a batch job writing to \"{template}\"")]
fn submit_redirected(
    scheduler_context: &SchedulerContext,
    template: String,
) -> Result<(), StepError> {
    let description = JobDescription::builder("/bin/aap")
        .queue("unlimited")
        .stdout(template.as_str())
        .build();
    let job_id = scheduler_context.scheduler().submit_batch_job(description)?;
    scheduler_context.record_submission(job_id);
    Ok(())
}

#[when("I try to submit a batch job to the \"{queue}\" queue")]
fn try_submit_batch(scheduler_context: &SchedulerContext, queue: String) {
    let result = scheduler_context.scheduler().submit_batch_job(aap(&queue));
    scheduler_context.state().error = result.err();
}

#[when("I try to submit an interactive job to the \"{queue}\" queue")]
fn try_submit_interactive(scheduler_context: &SchedulerContext, queue: String) {
    let result = scheduler_context
        .scheduler()
        .submit_interactive_job(aap(&queue));
    scheduler_context.state().error = result.err();
}

#[when("I try to submit an interactive job writing to \"{template}\"")]
fn try_submit_redirected_interactive(scheduler_context: &SchedulerContext, template: String) {
    let description = JobDescription::builder("/bin/cat")
        .stdout(template.as_str())
        .build();
    let result = scheduler_context
        .scheduler()
        .submit_interactive_job(description);
    scheduler_context.state().error = result.err();
}

#[when("I wait up to {millis:i64} ms for every job to finish")]
fn wait_for_all(scheduler_context: &SchedulerContext, millis: i64) -> Result<(), StepError> {
    wait_all(scheduler_context, millis)
}

fn wait_all(scheduler_context: &SchedulerContext, millis: i64) -> Result<(), StepError> {
    let scheduler = scheduler_context.scheduler();
    let mut finished = Vec::new();
    for job_id in scheduler_context.job_ids() {
        finished.push(scheduler.wait_until_done(&job_id, millis)?);
    }
    let mut state = scheduler_context.state();
    state.elapsed = state.started.map(|started| started.elapsed());
    state.finished = finished;
    Ok(())
}

#[when("I wait for job {index:usize} to run")]
fn wait_for_running(scheduler_context: &SchedulerContext, index: usize) -> Result<(), StepError> {
    let scheduler = scheduler_context.scheduler();
    scheduler.wait_until_running(&scheduler_context.job_id(index), 5000)?;
    let mut snapshot = Vec::new();
    for job_id in scheduler_context.job_ids() {
        snapshot.push(scheduler.job_status(&job_id)?);
    }
    scheduler_context.state().snapshot = snapshot;
    Ok(())
}

#[when("I cancel job {index:usize}")]
fn cancel(scheduler_context: &SchedulerContext, index: usize) -> Result<(), StepError> {
    let job_id = scheduler_context.job_id(index);
    let status = scheduler_context.scheduler().cancel_job(&job_id)?;
    scheduler_context.state().cancelled = Some(status);
    Ok(())
}

#[when("I look up the unknown job \"{job_id}\"")]
fn look_up_unknown(scheduler_context: &SchedulerContext, job_id: String) {
    let result = scheduler_context.scheduler().job_status(&job_id);
    scheduler_context.state().error = result.err();
}

#[when("I run an interactive job fed with \"{text}\"")]
fn run_interactive(scheduler_context: &SchedulerContext, text: String) -> Result<(), StepError> {
    let scheduler = scheduler_context.scheduler();
    let mut streams = scheduler.submit_interactive_job(JobDescription::builder("/bin/cat").build())?;
    scheduler_context.record_submission(streams.job_id().to_owned());

    let stdin = streams
        .stdin()
        .ok_or_else(|| StepError::Assertion(String::from("stdin should be open")))?;
    stdin
        .write_all(format!("{text}\n").as_bytes())
        .map_err(|err| StepError::Assertion(format!("write stdin: {err}")))?;
    streams.close_stdin();

    let mut output = String::new();
    streams
        .stdout()
        .ok_or_else(|| StepError::Assertion(String::from("stdout should be open")))?
        .read_to_string(&mut output)
        .map_err(|err| StepError::Assertion(format!("read stdout: {err}")))?;
    scheduler_context.state().output = output;

    wait_all(scheduler_context, 2000)
}

#[when("I close the scheduler")]
fn close(scheduler_context: &SchedulerContext) -> Result<(), StepError> {
    scheduler_context.scheduler().close()?;
    Ok(())
}

#[then("every job is done with exit code {code:i32}")]
fn every_job_done(scheduler_context: &SchedulerContext, code: i32) -> Result<(), StepError> {
    let state = scheduler_context.state();
    if state.finished.len() != state.job_ids.len() {
        return Err(StepError::Assertion(format!(
            "expected {} finished jobs, got {}",
            state.job_ids.len(),
            state.finished.len()
        )));
    }
    match state
        .finished
        .iter()
        .find(|status| !status.done || status.exit_code != Some(code))
    {
        Some(status) => Err(StepError::Assertion(format!(
            "expected done with exit code {code}, got {status:?}"
        ))),
        None => Ok(()),
    }
}

#[then("job {first:usize} was already done when job {second:usize} started running")]
fn done_before_next_ran(
    scheduler_context: &SchedulerContext,
    first: usize,
    second: usize,
) -> Result<(), StepError> {
    let state = scheduler_context.state();
    let earlier = state.snapshot.get(first.saturating_sub(1));
    let later = state.snapshot.get(second.saturating_sub(1));
    match (earlier, later) {
        (Some(earlier), Some(later)) if earlier.done && (later.running || later.done) => Ok(()),
        _ => Err(StepError::Assertion(format!(
            "expected job {first} done before job {second} ran, got {:?}",
            state.snapshot
        ))),
    }
}

#[then("the jobs took at least {millis:u64} ms")]
fn took_at_least(scheduler_context: &SchedulerContext, millis: u64) -> Result<(), StepError> {
    let elapsed = scheduler_context.state().elapsed;
    match elapsed {
        Some(elapsed) if elapsed >= Duration::from_millis(millis) => Ok(()),
        _ => Err(StepError::Assertion(format!(
            "expected at least {millis} ms, took {elapsed:?}"
        ))),
    }
}

fn peak_at_most(scheduler_context: &SchedulerContext, count: usize) -> Result<(), StepError> {
    let peak = scheduler_context.factory().peak_live();
    if peak <= count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected at most {count} live processes, peak was {peak}"
        )))
    }
}

#[then("at most {count:usize} process ran at once")]
fn at_most_one(scheduler_context: &SchedulerContext, count: usize) -> Result<(), StepError> {
    peak_at_most(scheduler_context, count)
}

#[then("at most {count:usize} processes ran at once")]
fn at_most_many(scheduler_context: &SchedulerContext, count: usize) -> Result<(), StepError> {
    peak_at_most(scheduler_context, count)
}

#[then("{count:usize} processes were created")]
fn processes_created(scheduler_context: &SchedulerContext, count: usize) -> Result<(), StepError> {
    let created = scheduler_context.factory().created();
    if created.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} processes, created {created:?}"
        )))
    }
}

#[then("only job {index:usize} created a process")]
fn only_job_created(scheduler_context: &SchedulerContext, index: usize) -> Result<(), StepError> {
    let expected = vec![scheduler_context.job_id(index)];
    let created = scheduler_context.factory().created();
    if created == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected only {expected:?} to be created, got {created:?}"
        )))
    }
}

#[then("the submission fails with no such queue \"{queue}\"")]
fn fails_no_such_queue(scheduler_context: &SchedulerContext, queue: String) -> Result<(), StepError> {
    let error = scheduler_context.state().error.clone();
    match error {
        Some(SchedulerError::NoSuchQueue { ref name }) if *name == queue => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected no such queue {queue}, got {other:?}"
        ))),
    }
}

#[then("the submission fails as an invalid job description")]
fn fails_invalid_description(scheduler_context: &SchedulerContext) -> Result<(), StepError> {
    let error = scheduler_context.state().error.clone();
    match error {
        Some(SchedulerError::InvalidJobDescription(_)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected an invalid job description, got {other:?}"
        ))),
    }
}

#[then("the submission fails to start with \"{message}\"")]
fn fails_to_start(scheduler_context: &SchedulerContext, message: String) -> Result<(), StepError> {
    let error = scheduler_context.state().error.clone();
    match error {
        Some(SchedulerError::JobStart {
            source: JobError::Start { message: ref actual },
            ..
        }) if actual.contains(&message) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a start failure mentioning {message:?}, got {other:?}"
        ))),
    }
}

#[then("waiting on job {index:usize} again returns the same status within {millis:u64} ms")]
fn wait_again(
    scheduler_context: &SchedulerContext,
    index: usize,
    millis: u64,
) -> Result<(), StepError> {
    let job_id = scheduler_context.job_id(index);
    let first = scheduler_context
        .state()
        .finished
        .get(index.saturating_sub(1))
        .cloned();
    let started = Instant::now();
    let again = scheduler_context.scheduler().wait_until_done(&job_id, 2000)?;
    let waited = started.elapsed();

    if waited >= Duration::from_millis(millis) {
        return Err(StepError::Assertion(format!("second wait took {waited:?}")));
    }
    if first.as_ref() == Some(&again) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {first:?}, got {again:?}"
        )))
    }
}

#[then("the cancelled job is killed with \"{message}\"")]
fn cancelled_job_killed(
    scheduler_context: &SchedulerContext,
    message: String,
) -> Result<(), StepError> {
    let cancelled = scheduler_context.state().cancelled.clone();
    match cancelled {
        Some(ref status)
            if status.state_label() == "KILLED"
                && status.error.as_ref().map(ToString::to_string).as_deref()
                    == Some(message.as_str()) =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected a KILLED status with {message:?}, got {other:?}"
        ))),
    }
}

#[then("job {index:usize} is killed with \"{message}\"")]
fn job_killed(
    scheduler_context: &SchedulerContext,
    index: usize,
    message: String,
) -> Result<(), StepError> {
    let job_id = scheduler_context.job_id(index);
    let status = scheduler_context.scheduler().wait_until_done(&job_id, 2000)?;
    let reason = status.error.as_ref().map(ToString::to_string);
    if status.state_label() == "KILLED" && reason.as_deref() == Some(message.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected job {job_id} KILLED with {message:?}, got {status:?}"
        )))
    }
}

#[then("the cancelled job keeps its {label} state")]
fn cancelled_job_keeps_state(
    scheduler_context: &SchedulerContext,
    label: String,
) -> Result<(), StepError> {
    let (cancelled, finished) = {
        let state = scheduler_context.state();
        (state.cancelled.clone(), state.finished.first().cloned())
    };
    match (cancelled, finished) {
        (Some(cancelled), Some(finished))
            if cancelled == finished && cancelled.state_label() == label =>
        {
            Ok(())
        }
        (cancelled, finished) => Err(StepError::Assertion(format!(
            "expected cancel to return the finished {label} status {finished:?}, got {cancelled:?}"
        ))),
    }
}

#[then("no process is left running")]
fn nothing_running(scheduler_context: &SchedulerContext) -> Result<(), StepError> {
    let live = scheduler_context.factory().live();
    if live == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("{live} processes still running")))
    }
}

#[then("waiting, cancelling and status lookups fail with no such job \"{job_id}\"")]
fn unknown_job_rejected(
    scheduler_context: &SchedulerContext,
    job_id: String,
) -> Result<(), StepError> {
    let scheduler = scheduler_context.scheduler();
    let expected = Err(SchedulerError::NoSuchJob {
        job_id: job_id.clone(),
    });
    let lookup = scheduler_context.state().error.clone();
    let results = [
        ("status", lookup.map_or(Ok(()), Err)),
        ("wait until done", scheduler.wait_until_done(&job_id, 100).map(|_| ())),
        ("wait until running", scheduler.wait_until_running(&job_id, 100).map(|_| ())),
        ("cancel", scheduler.cancel_job(&job_id).map(|_| ())),
    ];
    match results.into_iter().find(|(_, result)| *result != expected) {
        Some((operation, result)) => Err(StepError::Assertion(format!(
            "{operation} returned {result:?}"
        ))),
        None => Ok(()),
    }
}

#[then(
    "a status lookup for job {first:usize}, nothing, job {second:usize} and \"{unknown}\" keeps every position"
)]
fn lookup_keeps_positions(
    scheduler_context: &SchedulerContext,
    first: usize,
    second: usize,
    unknown: String,
) -> Result<(), StepError> {
    let a = scheduler_context.job_id(first);
    let b = scheduler_context.job_id(second);
    let statuses = scheduler_context.scheduler().job_statuses(&[
        Some(a.as_str()),
        None,
        Some(b.as_str()),
        Some(unknown.as_str()),
    ])?;

    let in_place = statuses.len() == 4
        && matches!(statuses.first(), Some(Some(Ok(status))) if status.job_id == a)
        && matches!(statuses.get(1), Some(None))
        && matches!(statuses.get(2), Some(Some(Ok(status))) if status.job_id == b)
        && matches!(
            statuses.get(3),
            Some(Some(Err(SchedulerError::NoSuchJob { job_id }))) if *job_id == unknown
        );
    if in_place {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected lookup result {statuses:?}"
        )))
    }
}

#[then("job {index:usize} is forgotten")]
fn job_forgotten(scheduler_context: &SchedulerContext, index: usize) -> Result<(), StepError> {
    let job_id = scheduler_context.job_id(index);
    let scheduler = scheduler_context.scheduler();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match scheduler.job_status(&job_id) {
            Err(SchedulerError::NoSuchJob { .. }) => return Ok(()),
            Err(err) => return Err(err.into()),
            Ok(_) if Instant::now() >= deadline => {
                return Err(StepError::Assertion(format!(
                    "job {job_id} was never evicted"
                )));
            }
            Ok(_) => thread::sleep(Duration::from_millis(20)),
        }
    }
}

#[then("job {index:usize} is still known")]
fn job_known(scheduler_context: &SchedulerContext, index: usize) -> Result<(), StepError> {
    let job_id = scheduler_context.job_id(index);
    let status = scheduler_context.scheduler().job_status(&job_id)?;
    if status.done {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected job {job_id} to be done, got {status:?}"
        )))
    }
}

#[then("the interactive output is \"{text}\"")]
fn interactive_output(scheduler_context: &SchedulerContext, text: String) -> Result<(), StepError> {
    let output = scheduler_context.state().output.clone();
    if output == format!("{text}\n") {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {text:?} echoed, got {output:?}"
        )))
    }
}

#[then("the file \"{name}\" contains \"{text}\"")]
fn file_contains(
    scheduler_context: &SchedulerContext,
    name: String,
    text: String,
) -> Result<(), StepError> {
    let path = scheduler_context.fs.root().join(&name);
    let written = std::fs::read_to_string(&path)
        .map_err(|err| StepError::Assertion(format!("read {path}: {err}")))?;
    if written == format!("{text}\n") {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {text:?} in {path}, got {written:?}"
        )))
    }
}

#[then("looking up job {index:usize} fails because the scheduler is closed")]
fn lookup_after_close(scheduler_context: &SchedulerContext, index: usize) -> Result<(), StepError> {
    let job_id = scheduler_context.job_id(index);
    let scheduler = scheduler_context.scheduler();
    match (scheduler.job_status(&job_id), scheduler.close()) {
        (Err(SchedulerError::Closed), Ok(())) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected a closed scheduler, got {other:?}"
        ))),
    }
}
