//! BDD scenarios for the job queue scheduler.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SchedulerContext, scheduler_context};

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Unlimited job finishes within the timeout"
)]
fn scenario_unlimited_job_finishes_within_the_timeout(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Single queue runs jobs one after another"
)]
fn scenario_single_queue_runs_jobs_one_after_another(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Multi queue never exceeds its slots"
)]
fn scenario_multi_queue_never_exceeds_its_slots(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Unknown queue is rejected for batch jobs"
)]
fn scenario_unknown_queue_is_rejected_for_batch_jobs(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Unknown queue is rejected for interactive jobs"
)]
fn scenario_unknown_queue_is_rejected_for_interactive_jobs(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Interactive job with redirected output is rejected"
)]
fn scenario_interactive_job_with_redirected_output_is_rejected(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Waiting on a finished job returns at once"
)]
fn scenario_waiting_on_a_finished_job_returns_at_once(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Cancelling a pending job never starts it"
)]
fn scenario_cancelling_a_pending_job_never_starts_it(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Cancelling a running job kills it"
)]
fn scenario_cancelling_a_running_job_kills_it(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Cancelling a job that failed to start changes nothing"
)]
fn scenario_cancelling_a_job_that_failed_to_start_changes_nothing(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Unknown job ids are rejected"
)]
fn scenario_unknown_job_ids_are_rejected(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Status lookups keep their positions"
)]
fn scenario_status_lookups_keep_their_positions(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "History forgets the oldest finished job"
)]
fn scenario_history_forgets_the_oldest_finished_job(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Interactive job echoes its input"
)]
fn scenario_interactive_job_echoes_its_input(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Interactive start failures are reported"
)]
fn scenario_interactive_start_failures_are_reported(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Batch output lands in the file system"
)]
fn scenario_batch_output_lands_in_the_file_system(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}

#[scenario(
    path = "tests/features/scheduler.feature",
    name = "Closing cancels every job and rejects further calls"
)]
fn scenario_closing_cancels_every_job_and_rejects_further_calls(scheduler_context: SchedulerContext) {
    drop(scheduler_context);
}
