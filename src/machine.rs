//! Device-side protocol state machine
//!
//! Reacts to snapshots of the session record: starts the recorder on
//! `WAKE_UP`, stamps playback start, and on `PLAYBACK_STOPPED` stops the
//! capture, analyzes it and writes the verdict. Snapshots may be redelivered;
//! a flag equal to the last one acted upon is ignored.

use crate::analysis::decision::Outcome;
use crate::analysis::{self, Analysis, AnalysisSettings, render};
use crate::audio::{Recorder, RecorderError};
use crate::channel::SessionChannel;
use crate::protocol::{Snapshot, State, StateWrite};
use crate::session::{Session, Verdict};
use crate::transport::ChannelError;
use std::path::{Path, PathBuf};
use thiserror::Error;

const RECORDING_FILE: &str = "recording.wav";
const SPECTROGRAM_FILE: &str = "spectrogram.png";

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("session channel error: {0}")]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone)]
pub struct MachineSettings {
    /// Where the capture file is written
    pub recordings_dir: PathBuf,
    /// When set, the recording and a spectrogram image are kept here
    pub artifacts_dir: Option<PathBuf>,
    pub analysis: AnalysisSettings,
}

type Clock = Box<dyn FnMut() -> i64 + Send>;

fn now_ms() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}

pub struct ProtocolStateMachine<R: Recorder, C: SessionChannel> {
    recorder: R,
    channel: C,
    settings: MachineSettings,
    session: Session,
    // the only gate for starting and stopping the recorder
    capture: Option<R::Capture>,
    last_flag: Option<State>,
    clock: Clock,
}

impl<R, C> ProtocolStateMachine<R, C>
where
    R: Recorder + Clone + Send + 'static,
    R::Capture: Send + 'static,
    C: SessionChannel,
{
    pub fn new(recorder: R, channel: C, settings: MachineSettings) -> Self {
        Self {
            recorder,
            channel,
            settings,
            session: Session::default(),
            capture: None,
            last_flag: None,
            clock: Box::new(now_ms),
        }
    }

    /// Replace the wall clock (milliseconds since the epoch)
    pub fn with_clock(mut self, clock: impl FnMut() -> i64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Subscribe and handle snapshots until the subscription ends.
    ///
    /// A failing step aborts the current attempt only; the machine keeps
    /// listening for the next one.
    pub async fn run(&mut self) -> Result<(), MachineError> {
        let mut snapshots = self.channel.subscribe().await?;
        tracing::info!("waiting for session updates");

        while let Some(snapshot) = snapshots.recv().await {
            if let Err(e) = self.handle(snapshot).await {
                tracing::error!(error = %e, state = %snapshot.state, "session aborted");
                self.teardown().await;
            }
        }

        tracing::info!("session updates ended");
        self.teardown().await;
        Ok(())
    }

    pub async fn handle(&mut self, snapshot: Snapshot) -> Result<(), MachineError> {
        self.session.challenge_slope = snapshot.slope;

        if self.last_flag == Some(snapshot.state) {
            tracing::debug!(state = %snapshot.state, "ignoring redelivered flag");
            return Ok(());
        }
        self.last_flag = Some(snapshot.state);
        tracing::info!(state = %snapshot.state, slope = snapshot.slope, "flag");

        match snapshot.state {
            State::Idle
            | State::RecordingStarted
            | State::PerformingAnalysis
            | State::MetricsUploaded => Ok(()),
            State::WakeUp => self.on_wake_up().await,
            State::PlaybackStarted => {
                self.on_playback_started();
                Ok(())
            }
            State::PlaybackStopped => self.on_playback_stopped().await,
            State::AuthSuccess | State::AuthFailure => {
                self.teardown().await;
                Ok(())
            }
        }
    }

    async fn on_wake_up(&mut self) -> Result<(), MachineError> {
        if self.capture.is_some() {
            tracing::warn!("wake-up while a capture is active, ignoring");
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.settings.recordings_dir)
            .await
            .map_err(RecorderError::from)?;
        let path = self.settings.recordings_dir.join(RECORDING_FILE);

        let capture = self.start_capture(path.clone()).await?;
        self.capture = Some(capture);
        self.session.t1 = Some((self.clock)());
        self.session.recording_path = Some(path);

        self.channel
            .write(StateWrite::flag(State::RecordingStarted))
            .await?;
        Ok(())
    }

    fn on_playback_started(&mut self) {
        let t2 = (self.clock)();
        self.session.t2 = Some(t2);
        match self.session.latency_ms() {
            Some(latency) => tracing::info!(latency_ms = latency, "playback started"),
            None => tracing::warn!("playback started before recording"),
        }
    }

    async fn on_playback_stopped(&mut self) -> Result<(), MachineError> {
        self.channel
            .write(StateWrite::flag(State::PerformingAnalysis))
            .await?;

        let write = match self.stop_and_analyze().await {
            Some(analysis) => {
                let report = &analysis.report;
                self.session.measured_slope = Some(report.regression.slope);
                self.session.r2 = Some(report.regression.r2);
                self.session.verdict = report.outcome.into();

                let state = match report.outcome {
                    Outcome::Success => State::AuthSuccess,
                    Outcome::Failure => State::AuthFailure,
                };
                StateWrite::flag(state).with_metrics(report.regression.slope, report.regression.r2)
            }
            None => {
                self.session.verdict = Verdict::Failure;
                StateWrite::flag(State::AuthFailure)
            }
        };

        tracing::info!(
            verdict = ?self.session.verdict,
            measured_slope = ?self.session.measured_slope,
            r2 = ?self.session.r2,
            challenge_slope = self.session.challenge_slope,
            "authentication finished"
        );

        let result = self.channel.write(write).await;
        self.teardown().await;
        result.map_err(MachineError::from)
    }

    /// Stop the capture and run the analysis; `None` means fail closed
    async fn stop_and_analyze(&mut self) -> Option<Analysis> {
        if self.session.t1.is_none() {
            tracing::warn!("playback stopped without a recording");
            return None;
        }
        let capture = self.capture.take()?;
        if let Err(e) = self.stop_capture(capture).await {
            tracing::error!(error = %e, "failed to stop recording");
            return None;
        }

        let Some(latency_ms) = self.session.latency_ms() else {
            tracing::warn!("playback start was never seen");
            return None;
        };
        let path = self.session.recording_path.clone()?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to read recording");
                return None;
            }
        };

        let challenge_slope = self.session.challenge_slope;
        let settings = self.settings.analysis;
        let analysis = match tokio::task::spawn_blocking(move || {
            analysis::analyze(&bytes, latency_ms, challenge_slope, &settings)
        })
        .await
        {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "analysis rejected the recording");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "analysis task failed");
                return None;
            }
        };

        if let Some(dir) = self.settings.artifacts_dir.clone() {
            save_artifacts(&dir, &path, &analysis).await;
        }

        Some(analysis)
    }

    // Recorder calls block until the device answers, so they run off the
    // async workers on a clone of the recorder.
    async fn start_capture(&self, path: PathBuf) -> Result<R::Capture, RecorderError> {
        let mut recorder = self.recorder.clone();
        tokio::task::spawn_blocking(move || recorder.start(&path))
            .await
            .map_err(|e| RecorderError::Thread(e.to_string()))?
    }

    async fn stop_capture(&self, capture: R::Capture) -> Result<(), RecorderError> {
        let mut recorder = self.recorder.clone();
        tokio::task::spawn_blocking(move || recorder.stop(capture))
            .await
            .map_err(|e| RecorderError::Thread(e.to_string()))?
    }

    /// Drop the attempt: stop any capture and start from a fresh session
    async fn teardown(&mut self) {
        if let Some(capture) = self.capture.take()
            && let Err(e) = self.stop_capture(capture).await
        {
            tracing::warn!(error = %e, "failed to stop abandoned capture");
        }
        self.session = Session::default();
    }
}

/// Keep the recording and its spectrogram; failures are only logged
async fn save_artifacts(dir: &Path, recording: &Path, analysis: &Analysis) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        tracing::warn!(dir = %dir.display(), error = %e, "cannot create artifacts directory");
        return;
    }

    if let Err(e) = tokio::fs::copy(recording, dir.join(RECORDING_FILE)).await {
        tracing::warn!(error = %e, "failed to keep recording");
    }

    let png = dir.join(SPECTROGRAM_FILE);
    let grid = analysis.spectrogram.clone();
    let target = png.clone();
    match tokio::task::spawn_blocking(move || render::save_png(&grid, &target)).await {
        Ok(Ok(())) => tracing::info!(path = %png.display(), "saved spectrogram"),
        Ok(Err(e)) => tracing::warn!(error = %e, "failed to render spectrogram"),
        Err(e) => tracing::warn!(error = %e, "spectrogram task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chirp::{self, Chirp};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Counters {
        starts: usize,
        stops: usize,
    }

    /// Writes a canned WAV file when stopped
    #[derive(Clone)]
    struct FakeRecorder {
        counters: Arc<Mutex<Counters>>,
        fixture: Vec<u8>,
        fail_start: bool,
        fail_stop: bool,
    }

    impl Recorder for FakeRecorder {
        type Capture = PathBuf;

        fn start(&mut self, output: &Path) -> Result<PathBuf, RecorderError> {
            self.counters.lock().unwrap().starts += 1;
            if self.fail_start {
                return Err(RecorderError::NoDevice(String::new()));
            }
            Ok(output.to_path_buf())
        }

        fn stop(&mut self, capture: PathBuf) -> Result<(), RecorderError> {
            self.counters.lock().unwrap().stops += 1;
            if self.fail_stop {
                return Err(RecorderError::Thread("capture thread panicked".to_string()));
            }
            std::fs::write(capture, &self.fixture)?;
            Ok(())
        }
    }

    /// Replays scripted snapshots and records every write
    struct FakeChannel {
        script: Vec<Snapshot>,
        writes: Arc<Mutex<Vec<StateWrite>>>,
    }

    #[async_trait]
    impl SessionChannel for FakeChannel {
        async fn subscribe(&mut self) -> Result<mpsc::UnboundedReceiver<Snapshot>, ChannelError> {
            let (tx, rx) = mpsc::unbounded_channel();
            for snapshot in self.script.drain(..) {
                let _ = tx.send(snapshot);
            }
            Ok(rx)
        }

        async fn write(&mut self, write: StateWrite) -> Result<(), ChannelError> {
            self.writes.lock().unwrap().push(write);
            Ok(())
        }
    }

    struct Harness {
        counters: Arc<Mutex<Counters>>,
        writes: Arc<Mutex<Vec<StateWrite>>>,
        machine: ProtocolStateMachine<FakeRecorder, FakeChannel>,
        _dir: tempfile::TempDir,
        artifacts: PathBuf,
    }

    fn chirp_wav() -> Vec<u8> {
        let chirp = Chirp {
            start_hz: 1_000.0,
            end_hz: 3_000.0,
            duration_secs: 2.0,
            sample_rate: 8_000,
            amplitude: 0.8,
        };
        chirp::encode_wav(&chirp.synthesize(), chirp.sample_rate).unwrap()
    }

    fn harness(states: &[State], fixture: Vec<u8>, fail_start: bool, keep_artifacts: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("artifacts");
        let counters = Arc::new(Mutex::new(Counters::default()));
        let writes = Arc::new(Mutex::new(Vec::new()));

        let recorder = FakeRecorder {
            counters: counters.clone(),
            fixture,
            fail_start,
            fail_stop: false,
        };
        let channel = FakeChannel {
            script: states
                .iter()
                .map(|&state| Snapshot {
                    state,
                    slope: 1_000.0,
                })
                .collect(),
            writes: writes.clone(),
        };
        let settings = MachineSettings {
            recordings_dir: dir.path().join("recordings"),
            artifacts_dir: keep_artifacts.then(|| artifacts.clone()),
            analysis: AnalysisSettings::default(),
        };

        let machine = ProtocolStateMachine::new(recorder, channel, settings).with_clock(|| 1_000);
        Harness {
            counters,
            writes,
            machine,
            _dir: dir,
            artifacts,
        }
    }

    fn written_states(writes: &Arc<Mutex<Vec<StateWrite>>>) -> Vec<State> {
        writes.lock().unwrap().iter().map(|w| w.state).collect()
    }

    #[tokio::test]
    async fn test_redelivered_flags_are_handled_once() {
        let mut h = harness(
            &[
                State::Idle,
                State::WakeUp,
                State::RecordingStarted,
                State::RecordingStarted,
                State::PlaybackStarted,
                State::PlaybackStopped,
                State::PlaybackStopped,
            ],
            chirp_wav(),
            false,
            false,
        );
        h.machine.run().await.unwrap();

        let counters = h.counters.lock().unwrap();
        assert_eq!(counters.starts, 1);
        assert_eq!(counters.stops, 1);
        assert_eq!(
            written_states(&h.writes),
            vec![
                State::RecordingStarted,
                State::PerformingAnalysis,
                State::AuthSuccess
            ]
        );

        let writes = h.writes.lock().unwrap();
        let with_metrics: Vec<_> = writes.iter().filter(|w| w.calculated_slope.is_some()).collect();
        assert_eq!(with_metrics.len(), 1);
        let slope = with_metrics[0].calculated_slope.unwrap();
        assert!((slope - 1_000.0).abs() < 50.0, "slope {slope}");
        assert!(with_metrics[0].r2.unwrap() > 0.95);
    }

    #[tokio::test]
    async fn test_playback_stopped_without_wake_up_fails_closed() {
        let mut h = harness(
            &[State::Idle, State::PlaybackStopped],
            chirp_wav(),
            false,
            false,
        );
        h.machine.run().await.unwrap();

        assert_eq!(h.counters.lock().unwrap().stops, 0);
        assert_eq!(
            written_states(&h.writes),
            vec![State::PerformingAnalysis, State::AuthFailure]
        );
        assert_eq!(h.writes.lock().unwrap()[1].calculated_slope, None);
    }

    #[tokio::test]
    async fn test_recorder_start_failure_writes_nothing() {
        let mut h = harness(&[State::WakeUp], chirp_wav(), true, false);
        h.machine.run().await.unwrap();

        assert_eq!(h.counters.lock().unwrap().starts, 1);
        assert!(h.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_noise_is_rejected() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(99);
        let noise: Vec<i16> = (0..16_000).map(|_| rng.gen_range(-8_000..8_000)).collect();
        let mut h = harness(
            &[State::WakeUp, State::PlaybackStarted, State::PlaybackStopped],
            chirp::encode_wav(&noise, 8_000).unwrap(),
            false,
            false,
        );
        h.machine.run().await.unwrap();

        let writes = h.writes.lock().unwrap();
        let verdict = writes.last().unwrap();
        assert_eq!(verdict.state, State::AuthFailure);
        assert!(verdict.r2.unwrap() < 0.95);
    }

    #[tokio::test]
    async fn test_missing_playback_start_fails_closed() {
        let mut h = harness(&[State::WakeUp, State::PlaybackStopped], chirp_wav(), false, false);
        h.machine.run().await.unwrap();

        assert_eq!(h.counters.lock().unwrap().stops, 1);
        assert_eq!(
            written_states(&h.writes).last(),
            Some(&State::AuthFailure)
        );
    }

    #[tokio::test]
    async fn test_negative_latency_fails_closed() {
        let h = harness(
            &[State::WakeUp, State::PlaybackStarted, State::PlaybackStopped],
            chirp_wav(),
            false,
            false,
        );
        let mut stamps = vec![2_000, 1_000].into_iter();
        let mut machine = h.machine.with_clock(move || stamps.next().unwrap_or(0));
        machine.run().await.unwrap();

        let writes = h.writes.lock().unwrap();
        assert_eq!(writes.last().unwrap().state, State::AuthFailure);
        assert_eq!(writes.last().unwrap().calculated_slope, None);
    }

    #[tokio::test]
    async fn test_machine_rearms_after_verdict() {
        let attempt = [State::WakeUp, State::PlaybackStarted, State::PlaybackStopped];
        let mut states = vec![State::Idle];
        states.extend(attempt);
        states.push(State::AuthSuccess);
        states.extend(attempt);

        let mut h = harness(&states, chirp_wav(), false, false);
        h.machine.run().await.unwrap();

        let counters = h.counters.lock().unwrap();
        assert_eq!((counters.starts, counters.stops), (2, 2));
        let verdicts = written_states(&h.writes)
            .into_iter()
            .filter(|s| s.is_terminal())
            .count();
        assert_eq!(verdicts, 2);
        assert_eq!(h.machine.session, Session::default());
    }

    #[tokio::test]
    async fn test_debug_artifacts_are_saved() {
        let mut h = harness(
            &[State::WakeUp, State::PlaybackStarted, State::PlaybackStopped],
            chirp_wav(),
            false,
            true,
        );
        h.machine.run().await.unwrap();

        assert!(h.artifacts.join(SPECTROGRAM_FILE).exists());
        assert!(h.artifacts.join(RECORDING_FILE).exists());
        assert_eq!(
            written_states(&h.writes).last(),
            Some(&State::AuthSuccess)
        );
    }

    #[tokio::test]
    async fn test_stop_failure_fails_closed() {
        let mut h = harness(
            &[State::WakeUp, State::PlaybackStarted, State::PlaybackStopped],
            chirp_wav(),
            false,
            false,
        );
        h.machine.recorder.fail_stop = true;
        h.machine.run().await.unwrap();

        assert_eq!(h.counters.lock().unwrap().stops, 1);
        assert_eq!(
            written_states(&h.writes),
            vec![
                State::RecordingStarted,
                State::PerformingAnalysis,
                State::AuthFailure
            ]
        );
        let writes = h.writes.lock().unwrap();
        assert_eq!(writes[2].calculated_slope, None);
        assert_eq!(writes[2].r2, None);
    }

    #[tokio::test]
    async fn test_unreadable_recording_fails_closed() {
        let mut h = harness(
            &[State::WakeUp, State::PlaybackStarted, State::PlaybackStopped],
            vec![0u8; 20],
            false,
            false,
        );
        h.machine.run().await.unwrap();

        assert_eq!(
            written_states(&h.writes),
            vec![
                State::RecordingStarted,
                State::PerformingAnalysis,
                State::AuthFailure
            ]
        );
        let writes = h.writes.lock().unwrap();
        assert_eq!(writes[2].calculated_slope, None);
        assert_eq!(writes[2].r2, None);
    }
}
