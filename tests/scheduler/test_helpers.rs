//! Shared fixtures for scheduler BDD scenarios.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use batchq::test_support::{MockBehaviour, MockProcessFactory};
use batchq::{JobQueueScheduler, JobStatus, LocalFileSystem, SchedulerConfig, SchedulerError};
use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;

/// Mutable scenario state shared by every step.
#[derive(Debug, Default)]
pub struct ScenarioState {
    pub factory: Option<MockProcessFactory>,
    pub scheduler: Option<Arc<JobQueueScheduler>>,
    pub job_ids: Vec<String>,
    pub finished: Vec<JobStatus>,
    pub started: Option<Instant>,
    pub elapsed: Option<Duration>,
    pub snapshot: Vec<JobStatus>,
    pub cancelled: Option<JobStatus>,
    pub error: Option<SchedulerError>,
    pub output: String,
}

#[derive(Clone, Debug)]
pub struct SchedulerContext {
    pub fs: Arc<LocalFileSystem>,
    state: Arc<Mutex<ScenarioState>>,
    _tmp: Arc<TempDir>,
}

impl SchedulerContext {
    pub fn state(&self) -> MutexGuard<'_, ScenarioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a scheduler backed by a mock factory scripted with `behaviour`.
    pub fn start(&self, behaviour: MockBehaviour, config: SchedulerConfig) {
        let factory = MockProcessFactory::new(behaviour);
        let scheduler = JobQueueScheduler::new(
            SchedulerConfig {
                polling_delay_ms: 100,
                ..config
            },
            Arc::new(factory.clone()),
            self.fs.clone(),
        )
        .unwrap_or_else(|err| panic!("scheduler should start: {err}"));
        let mut state = self.state();
        state.factory = Some(factory);
        state.scheduler = Some(Arc::new(scheduler));
    }

    pub fn scheduler(&self) -> Arc<JobQueueScheduler> {
        self.state()
            .scheduler
            .clone()
            .unwrap_or_else(|| panic!("test setup requires a scheduler"))
    }

    pub fn factory(&self) -> MockProcessFactory {
        self.state()
            .factory
            .clone()
            .unwrap_or_else(|| panic!("test setup requires a process factory"))
    }

    /// Id of the `index`-th submitted job, counting from 1.
    pub fn job_id(&self, index: usize) -> String {
        self.state()
            .job_ids
            .get(index.saturating_sub(1))
            .cloned()
            .unwrap_or_else(|| panic!("job {index} was never submitted"))
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.state().job_ids.clone()
    }

    pub fn record_submission(&self, job_id: String) {
        let mut state = self.state();
        state.started.get_or_insert_with(Instant::now);
        state.job_ids.push(job_id);
    }
}

#[fixture]
pub fn scheduler_context() -> SchedulerContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let fs = LocalFileSystem::open(root).unwrap_or_else(|err| panic!("open fs: {err}"));
    SchedulerContext {
        fs: Arc::new(fs),
        state: Arc::new(Mutex::new(ScenarioState::default())),
        _tmp: Arc::new(tmp),
    }
}
