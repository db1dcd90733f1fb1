//! The test session state machine.
//!
//! One [`SpeedTest`] owns the two-stage lifecycle: download with endpoint
//! fallback, a short settling pause, then upload against the fixed endpoint.
//! The engine drives a [`TransferChannel`] and reduces its raw event stream
//! to observer-facing [`TestEvent`]s; all transport mechanics stay behind
//! the channel boundary.

use crate::channel::{TransferChannel, TransferEvent};
use crate::config::Config;
use crate::estimator::{average_mbps, SpeedEstimator};
use crate::event::{ProgressCallback, Stage, TestEvent, TestReport};
use crate::selector::{EndpointSelector, FailureKind};
use crate::{Error, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Observable lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    /// No test active; a run may be started.
    Idle,
    /// A test is in flight, currently in the given stage.
    Running(Stage),
    /// The last run finished successfully.
    Complete,
    /// The last run failed.
    Error,
}

/// Mutable record of one end-to-end run. Created fresh per `run()` call and
/// discarded afterwards; never reused across runs.
struct Session {
    stage_started_at: Instant,
    stage_ended_at: Option<Instant>,
    transfer_size_bytes: u64,
    bytes_transferred: u64,
    estimator: SpeedEstimator,
}

impl Session {
    fn new(config: &Config) -> Self {
        Self {
            stage_started_at: Instant::now(),
            stage_ended_at: None,
            transfer_size_bytes: 0,
            bytes_transferred: 0,
            estimator: SpeedEstimator::new(config.smoothing_factor, config.min_sample_interval),
        }
    }

    /// Resets the per-stage counters. `expected_bytes` is zero when the
    /// total is discovered from the transfer itself.
    fn begin_stage(&mut self, expected_bytes: u64) {
        self.stage_started_at = Instant::now();
        self.stage_ended_at = None;
        self.transfer_size_bytes = expected_bytes;
        self.bytes_transferred = 0;
        self.estimator.reset();
    }

    fn end_stage(&mut self) {
        self.stage_ended_at = Some(Instant::now());
    }

    fn stage_elapsed(&self) -> Duration {
        match self.stage_ended_at {
            Some(end) => end.duration_since(self.stage_started_at),
            None => self.stage_started_at.elapsed(),
        }
    }
}

enum AttemptOutcome {
    Success,
    Failed(FailureKind),
}

/// Two-stage network speed test engine.
///
/// Measures download throughput against an ordered ladder of candidate
/// endpoints (falling back immediately on failure) followed by upload
/// throughput against a single fixed endpoint, reporting progress through a
/// [`ProgressCallback`].
///
/// # Examples
///
/// ```no_run
/// use speedprobe::{Config, HttpChannel, SpeedTest};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let channel = Arc::new(HttpChannel::new()?);
/// let test = SpeedTest::new(Config::new(), channel)?;
///
/// let report = test.run().await?;
/// println!(
///     "down {:.2} Mbps / up {:.2} Mbps",
///     report.download_mbps, report.upload_mbps
/// );
/// # Ok(())
/// # }
/// ```
pub struct SpeedTest {
    config: Config,
    channel: Arc<dyn TransferChannel>,
    callback: Option<Arc<dyn ProgressCallback>>,
    state: Mutex<TestState>,
    cancel: Mutex<CancellationToken>,
}

impl SpeedTest {
    /// Creates an engine over the given transfer channel.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the endpoint lists or timing
    /// knobs are unusable.
    pub fn new(config: Config, channel: Arc<dyn TransferChannel>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            channel,
            callback: None,
            state: Mutex::new(TestState::Idle),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Attaches an observer callback. Events are delivered inline from the
    /// engine's task, in the documented per-stage order.
    pub fn with_callback<C: ProgressCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TestState {
        *self.state.lock()
    }

    /// Runs a full download-then-upload test.
    ///
    /// Valid whenever no test is in flight; a concurrent call while one is
    /// running fails with [`Error::TestInProgress`] and leaves the active
    /// run untouched. Each call operates on a fresh session record.
    pub async fn run(&self) -> Result<TestReport> {
        // The state write and the token swap happen under one lock so a
        // concurrent reset either sees the old run (and cancels its token)
        // or the new one; it can never cancel a token this run no longer
        // holds.
        let cancel = {
            let mut state = self.state.lock();
            if matches!(*state, TestState::Running(_)) {
                warn!("start requested while a test is already running");
                return Err(Error::TestInProgress);
            }
            *state = TestState::Running(Stage::Download);
            let mut token = self.cancel.lock();
            *token = CancellationToken::new();
            token.clone()
        };

        match self.run_inner(&cancel).await {
            Ok(report) => {
                self.transition(&cancel, TestState::Complete)?;
                Ok(report)
            }
            // Reset already moved the state to Idle and announced it; the
            // aborted run must stay silent.
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                self.transition(&cancel, TestState::Error)?;
                self.emit(
                    &cancel,
                    TestEvent::Error {
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    /// Cancels any active transfer and returns the engine to idle.
    ///
    /// Emits a single `ready` event; a late event from the cancelled
    /// channel is ignored, so nothing follows `ready`. Resetting an
    /// already-idle engine is a no-op.
    pub fn reset(&self) {
        // Idle is written and the token cancelled under the state lock, so
        // an active run's transition() sees both or neither and can never
        // overwrite Idle with a stale running state.
        let was_idle = {
            let mut state = self.state.lock();
            let was_idle = *state == TestState::Idle;
            *state = TestState::Idle;
            self.cancel.lock().cancel();
            was_idle
        };
        if !was_idle {
            info!("test reset to idle");
            self.notify(TestEvent::Ready);
        }
    }

    /// Commits a state transition on behalf of the run holding `cancel`.
    ///
    /// Checked against the token under the state lock: once a reset has
    /// cancelled the run, the engine stays idle and the run bails out.
    fn transition(&self, cancel: &CancellationToken, next: TestState) -> Result<()> {
        let mut state = self.state.lock();
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        *state = next;
        Ok(())
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<TestReport> {
        let run_started = Instant::now();
        let mut session = Session::new(&self.config);

        // --- download stage ---
        self.emit(
            cancel,
            TestEvent::StageStarted {
                stage: Stage::Download,
                status_text: "Testing Download...".to_string(),
                expected_size_label: None,
            },
        );

        let mut selector = EndpointSelector::new(&self.config.download_urls);
        let mut download_ok = false;
        while let Some((attempt, url)) = selector.next_endpoint() {
            if attempt > 0 {
                self.emit(
                    cancel,
                    TestEvent::StageStarted {
                        stage: Stage::Download,
                        status_text: format!("Trying server {}...", attempt + 1),
                        expected_size_label: None,
                    },
                );
            }
            info!("download attempt {} against {}", attempt + 1, url);
            session.begin_stage(0);

            match self.download_attempt(cancel, &mut session, &url).await? {
                AttemptOutcome::Success => {
                    download_ok = true;
                    break;
                }
                AttemptOutcome::Failed(kind) => {
                    debug!("endpoint {} failed: {:?}", url, kind);
                    selector.record_failure(kind);
                }
            }
        }
        if !download_ok {
            return Err(selector.exhaustion_error());
        }

        let download_mbps = average_mbps(session.transfer_size_bytes, session.stage_elapsed())?;
        info!("download complete: {:.2} Mbps", download_mbps);
        self.emit(
            cancel,
            TestEvent::StageResult {
                stage: Stage::Download,
                speed_mbps: download_mbps,
            },
        );

        // Settling pause so the observer registers the download result
        // before upload progress starts repainting.
        if !self.config.stage_pause.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = time::sleep(self.config.stage_pause) => {}
            }
        }

        // --- upload stage ---
        self.transition(cancel, TestState::Running(Stage::Upload))?;
        session.begin_stage(self.config.upload_bytes);
        self.emit(
            cancel,
            TestEvent::StageStarted {
                stage: Stage::Upload,
                status_text: "Testing Upload...".to_string(),
                expected_size_label: Some(format!(
                    "{} MB",
                    self.config.upload_bytes / (1024 * 1024)
                )),
            },
        );

        let upload_mbps = self.run_upload(cancel, &mut session).await?;
        info!("upload complete: {:.2} Mbps", upload_mbps);
        self.emit(
            cancel,
            TestEvent::StageResult {
                stage: Stage::Upload,
                speed_mbps: upload_mbps,
            },
        );

        let total_elapsed = run_started.elapsed();
        self.emit(
            cancel,
            TestEvent::Complete {
                total_elapsed_seconds: total_elapsed.as_secs_f64(),
            },
        );

        Ok(TestReport {
            download_mbps,
            upload_mbps,
            total_elapsed,
        })
    }

    /// Drives a single download attempt to its terminal event.
    async fn download_attempt(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
        url: &str,
    ) -> Result<AttemptOutcome> {
        let mut handle = self
            .channel
            .open_download(url, self.config.attempt_timeout);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    handle.cancel();
                    return Err(Error::Cancelled);
                }
                event = handle.recv() => match event {
                    Some(TransferEvent::Progress { loaded, total }) => {
                        self.on_download_progress(cancel, session, loaded, total);
                    }
                    Some(TransferEvent::Completed { status: 200, bytes }) => {
                        // Some endpoints omit Content-Length; the total is
                        // then only known from the final byte count.
                        if session.transfer_size_bytes == 0 && bytes > 0 {
                            session.transfer_size_bytes = bytes;
                        }
                        session.bytes_transferred = session.bytes_transferred.max(bytes);
                        session.end_stage();
                        return Ok(AttemptOutcome::Success);
                    }
                    Some(TransferEvent::Completed { status, .. }) => {
                        return Ok(AttemptOutcome::Failed(FailureKind::classify(Some(status))));
                    }
                    Some(TransferEvent::Failed { status, message }) => {
                        debug!("transfer failed: {}", message);
                        return Ok(AttemptOutcome::Failed(FailureKind::classify(status)));
                    }
                    Some(TransferEvent::TimedOut) => {
                        return Ok(AttemptOutcome::Failed(FailureKind::Timeout));
                    }
                    None => {
                        return Ok(AttemptOutcome::Failed(FailureKind::NetworkLike));
                    }
                }
            }
        }
    }

    fn on_download_progress(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
        loaded: u64,
        total: Option<u64>,
    ) {
        // Samples are observed in order; a stale lower count is dropped
        // so bytes_transferred stays monotone within the stage.
        if loaded < session.bytes_transferred {
            return;
        }
        session.bytes_transferred = loaded;
        if session.transfer_size_bytes == 0 {
            if let Some(total) = total.filter(|&t| t > 0) {
                session.transfer_size_bytes = total;
            }
        }

        let elapsed = session.stage_started_at.elapsed();
        let percent = (session.transfer_size_bytes > 0)
            .then(|| (loaded as f64 / session.transfer_size_bytes as f64) * 100.0);
        self.emit(
            cancel,
            TestEvent::Progress {
                percent,
                loaded_bytes: Some(loaded),
                total_bytes: (session.transfer_size_bytes > 0)
                    .then_some(session.transfer_size_bytes),
                elapsed_seconds: elapsed.as_secs_f64(),
            },
        );

        let first_sample = !session.estimator.has_samples();
        let smoothed = session.estimator.record(elapsed, loaded);
        if !first_sample {
            self.emit(
                cancel,
                TestEvent::SpeedUpdate {
                    smoothed_speed_mbps: smoothed,
                },
            );
        }
    }

    /// Drives the upload transfer, polling elapsed time while waiting.
    ///
    /// The channel cannot observe upload bytes in flight, so progress
    /// events carry elapsed time only and the byte counter stays put until
    /// completion.
    async fn run_upload(
        &self,
        cancel: &CancellationToken,
        session: &mut Session,
    ) -> Result<f64> {
        let mut handle = self
            .channel
            .open_upload(&self.config.upload_url, self.config.upload_bytes);
        let mut poll = time::interval(self.config.upload_poll_interval);
        poll.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    handle.cancel();
                    return Err(Error::Cancelled);
                }
                _ = poll.tick() => {
                    self.emit(
                        cancel,
                        TestEvent::Progress {
                            percent: None,
                            loaded_bytes: None,
                            total_bytes: Some(self.config.upload_bytes),
                            elapsed_seconds: session.stage_started_at.elapsed().as_secs_f64(),
                        },
                    );
                }
                event = handle.recv() => match event {
                    Some(TransferEvent::Completed { status, .. }) if (200..300).contains(&status) => {
                        session.bytes_transferred = self.config.upload_bytes;
                        session.end_stage();
                        return average_mbps(self.config.upload_bytes, session.stage_elapsed());
                    }
                    Some(TransferEvent::Completed { status, .. }) => {
                        return Err(Error::Upload(format!(
                            "upload endpoint answered with status {status}"
                        )));
                    }
                    Some(TransferEvent::Failed { message, .. }) => {
                        return Err(Error::Upload(message));
                    }
                    Some(TransferEvent::TimedOut) => {
                        return Err(Error::Upload("the upload timed out".to_string()));
                    }
                    Some(TransferEvent::Progress { .. }) => {
                        // Uploads report no byte progress; tolerate a
                        // richer channel but keep the documented behavior.
                    }
                    None => {
                        return Err(Error::Upload(
                            "the transfer channel closed unexpectedly".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Emits an event unless the run was cancelled; a reset run must not
    /// produce anything after `ready`.
    fn emit(&self, cancel: &CancellationToken, event: TestEvent) {
        if cancel.is_cancelled() {
            return;
        }
        self.notify(event);
    }

    fn notify(&self, event: TestEvent) {
        if let Some(callback) = &self.callback {
            callback.on_event(event);
        }
    }
}
