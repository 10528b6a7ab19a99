//! Test support utilities shared across unit and integration tests.

use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::job::JobDescription;
use crate::process::{InteractiveProcess, InteractiveProcessFactory, ProcessError, Streams};

/// Scripted behaviour of processes created by [`MockProcessFactory`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MockBehaviour {
    /// Finishes after `runtime`, producing the given output.
    Exit {
        /// Simulated runtime.
        runtime: Duration,
        /// Exit code reported once done.
        exit_code: i32,
        /// Bytes readable from stdout.
        stdout: Vec<u8>,
        /// Bytes readable from stderr.
        stderr: Vec<u8>,
    },
    /// Copies stdin to stdout and finishes once stdin is closed.
    Echo,
    /// Runs until destroyed.
    Hang,
    /// Refuses to start.
    FailStart {
        /// Message reported as the spawn failure.
        message: String,
    },
}

#[derive(Debug, Default)]
struct MockStats {
    created: Mutex<Vec<String>>,
    live: AtomicUsize,
    peak: AtomicUsize,
    destroyed: AtomicUsize,
}

/// Process factory that simulates jobs without spawning anything.
///
/// Records every job id it was asked to start and the peak number of
/// simultaneously live processes.
#[derive(Clone, Debug)]
pub struct MockProcessFactory {
    behaviour: MockBehaviour,
    stats: Arc<MockStats>,
}

impl MockProcessFactory {
    /// Creates a factory whose processes follow `behaviour`.
    #[must_use]
    pub fn new(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Creates a factory whose processes exit with code 0 after `runtime`.
    #[must_use]
    pub fn sleeping(runtime: Duration) -> Self {
        Self::new(MockBehaviour::Exit {
            runtime,
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    /// Job ids passed to [`InteractiveProcessFactory::create`], in call order.
    #[must_use]
    pub fn created(&self) -> Vec<String> {
        self.stats
            .created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of processes alive at the same time.
    #[must_use]
    pub fn peak_live(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Number of processes currently alive.
    #[must_use]
    pub fn live(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    /// Number of processes terminated through `destroy`.
    #[must_use]
    pub fn destroyed(&self) -> usize {
        self.stats.destroyed.load(Ordering::SeqCst)
    }
}

impl InteractiveProcessFactory for MockProcessFactory {
    fn job_id_prefix(&self) -> &str {
        "mock"
    }

    fn create(
        &self,
        description: &JobDescription,
        job_id: &str,
    ) -> Result<Box<dyn InteractiveProcess>, ProcessError> {
        self.stats
            .created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job_id.to_owned());

        if let MockBehaviour::FailStart { ref message } = self.behaviour {
            return Err(ProcessError::Spawn {
                program: description.executable.clone(),
                message: message.clone(),
            });
        }

        let live = self.stats.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(MockProcess::start(
            job_id,
            &self.behaviour,
            Arc::clone(&self.stats),
        )))
    }
}

#[derive(Debug)]
enum Completion {
    After(Instant, Duration),
    StdinClosed(Arc<AtomicBool>),
    Never,
}

#[derive(Debug)]
struct MockProcess {
    completion: Completion,
    exit_code: i32,
    streams: Option<Streams>,
    hang_writer: Option<PipeWriter>,
    stats: Arc<MockStats>,
    done: bool,
    destroyed: bool,
}

impl MockProcess {
    fn start(job_id: &str, behaviour: &MockBehaviour, stats: Arc<MockStats>) -> Self {
        let mut hang_writer = None;
        let (completion, exit_code, streams) = match behaviour {
            MockBehaviour::Exit {
                runtime,
                exit_code,
                stdout,
                stderr,
            } => (
                Completion::After(Instant::now(), *runtime),
                *exit_code,
                Streams::new(
                    job_id,
                    Box::new(io::sink()),
                    Box::new(Cursor::new(stdout.clone())),
                    Box::new(Cursor::new(stderr.clone())),
                ),
            ),
            MockBehaviour::Echo => {
                let closed = Arc::new(AtomicBool::new(false));
                let (writer, reader) = pipe();
                (
                    Completion::StdinClosed(Arc::clone(&closed)),
                    0,
                    Streams::new(
                        job_id,
                        Box::new(writer.notify_on_close(closed)),
                        Box::new(reader),
                        Box::new(io::empty()),
                    ),
                )
            }
            MockBehaviour::Hang | MockBehaviour::FailStart { .. } => {
                let (writer, reader) = pipe();
                hang_writer = Some(writer);
                (
                    Completion::Never,
                    0,
                    Streams::new(
                        job_id,
                        Box::new(io::sink()),
                        Box::new(reader),
                        Box::new(io::empty()),
                    ),
                )
            }
        };
        Self {
            completion,
            exit_code,
            streams: Some(streams),
            hang_writer,
            stats,
            done: false,
            destroyed: false,
        }
    }

    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.hang_writer = None;
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl InteractiveProcess for MockProcess {
    fn is_done(&mut self) -> bool {
        let finished = match self.completion {
            Completion::After(started, runtime) => started.elapsed() >= runtime,
            Completion::StdinClosed(ref closed) => closed.load(Ordering::SeqCst),
            Completion::Never => false,
        };
        if finished {
            self.finish();
        }
        self.done
    }

    fn exit_status(&mut self) -> Option<i32> {
        (self.done && !self.destroyed).then_some(self.exit_code)
    }

    fn destroy(&mut self) {
        if !self.done {
            self.destroyed = true;
            self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
            self.finish();
        }
    }

    fn take_streams(&mut self) -> Option<Streams> {
        self.streams.take()
    }
}

/// Creates an in-memory pipe; the reader sees end of input once the writer
/// is dropped.
#[must_use]
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel();
    (
        PipeWriter { tx, closed: None },
        PipeReader {
            rx,
            buffer: Vec::new(),
            position: 0,
        },
    )
}

/// Writing half of [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
    closed: Option<Arc<AtomicBool>>,
}

impl PipeWriter {
    /// Sets `flag` when this writer is dropped.
    #[must_use]
    pub fn notify_on_close(mut self, flag: Arc<AtomicBool>) -> Self {
        self.closed = Some(flag);
        self
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        if let Some(ref flag) = self.closed {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Reading half of [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    buffer: Vec<u8>,
    position: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.position >= self.buffer.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buffer = chunk;
                    self.position = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let available = self.buffer.get(self.position..).unwrap_or_default();
        let count = available.len().min(buf.len());
        let (head, _) = buf.split_at_mut(count);
        head.copy_from_slice(available.get(..count).unwrap_or_default());
        self.position += count;
        Ok(count)
    }
}
