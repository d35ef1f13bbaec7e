use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use stepdag::engine::CancelSignal;
use stepdag::errors::StepExecutionError;
use stepdag::exec::{RunFuture, StepOutput, StepRequest, StepRunner};
use stepdag::fs::mock::MockFileSystem;
use stepdag::step_id::StepId;
use tracing::debug;

/// Something the fake runner observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started(StepId),
    Finished(StepId),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<StepRequest>,
    events: Vec<RunEvent>,
    failing: HashSet<String>,
    block_until_cancel: HashSet<String>,
    reported: HashMap<String, String>,
    delay: Duration,
    outputs_fs: Option<MockFileSystem>,
}

/// A fake step runner that:
/// - records every request and start/finish order
/// - fails the steps it was told to fail
/// - optionally writes each declared output into a mock filesystem
/// - tracks the maximum number of concurrently running steps
#[derive(Clone, Default)]
pub struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `id` with a non-zero exit status.
    pub fn fail_on(self, id: &str) -> Self {
        self.lock().failing.insert(id.to_string());
        self
    }

    /// Keep `id` running until the run is cancelled.
    pub fn block_until_cancel(self, id: &str) -> Self {
        self.lock().block_until_cancel.insert(id.to_string());
        self
    }

    /// Report `checksum` as the output checksum of `id`.
    pub fn report_checksum(self, id: &str, checksum: &str) -> Self {
        self.lock()
            .reported
            .insert(id.to_string(), checksum.to_string());
        self
    }

    /// Sleep this long inside every step.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    /// Write every declared output (content = step fingerprint) into `fs`.
    pub fn writing_outputs_to(self, fs: MockFileSystem) -> Self {
        self.lock().outputs_fs = Some(fs);
        self
    }

    /// Steps in the order they were started.
    pub fn executed(&self) -> Vec<StepId> {
        self.lock().calls.iter().map(|r| r.id.clone()).collect()
    }

    pub fn calls(&self) -> Vec<StepRequest> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|r| r.id.as_str() == id)
            .count()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.lock().events.clone()
    }

    pub fn has_started(&self, id: &str) -> bool {
        self.lock()
            .events
            .iter()
            .any(|e| matches!(e, RunEvent::Started(s) if s.as_str() == id))
    }

    /// Highest number of steps that were running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Poll until `id` has started (for cancellation tests).
    pub async fn wait_started(&self, id: &str) {
        while !self.has_started(id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StepRunner for FakeRunner {
    fn run(&self, request: StepRequest, cancel: CancelSignal) -> RunFuture {
        let this = self.clone();

        Box::pin(async move {
            let id = request.id.clone();
            let key = id.as_str().to_string();

            let (delay, fails, blocks, reported, outputs_fs) = {
                let mut state = this.lock();
                state.calls.push(request.clone());
                state.events.push(RunEvent::Started(id.clone()));
                (
                    state.delay,
                    state.failing.contains(&key),
                    state.block_until_cancel.contains(&key),
                    state.reported.get(&key).cloned(),
                    state.outputs_fs.clone(),
                )
            };

            let now = this.active.fetch_add(1, Ordering::SeqCst) + 1;
            this.max_active.fetch_max(now, Ordering::SeqCst);
            debug!(step = %id, active = now, "fake runner started step");

            let result = if blocks {
                cancel.cancelled().await;
                Err(StepExecutionError::Cancelled)
            } else {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if fails {
                    Err(StepExecutionError::ExitStatus(1))
                } else {
                    if let Some(fs) = outputs_fs {
                        for path in &request.outputs {
                            fs.add_file(path, request.fingerprint.as_str());
                        }
                    }
                    Ok(StepOutput { checksum: reported })
                }
            };

            this.active.fetch_sub(1, Ordering::SeqCst);
            this.lock().events.push(RunEvent::Finished(id));
            result
        })
    }
}
