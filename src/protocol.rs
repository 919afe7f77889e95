use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol state carried in the session record's `flag` field
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    Idle,
    WakeUp,
    RecordingStarted,
    PlaybackStarted,
    PlaybackStopped,
    PerformingAnalysis,
    MetricsUploaded,
    AuthSuccess,
    AuthFailure,
}

impl State {
    pub const ALL: [State; 9] = [
        State::Idle,
        State::WakeUp,
        State::RecordingStarted,
        State::PlaybackStarted,
        State::PlaybackStopped,
        State::PerformingAnalysis,
        State::MetricsUploaded,
        State::AuthSuccess,
        State::AuthFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Idle => "IDLE",
            State::WakeUp => "WAKE_UP",
            State::RecordingStarted => "RECORDING_STARTED",
            State::PlaybackStarted => "PLAYBACK_STARTED",
            State::PlaybackStopped => "PLAYBACK_STOPPED",
            State::PerformingAnalysis => "PERFORMING_ANALYSIS",
            State::MetricsUploaded => "METRICS_UPLOADED",
            State::AuthSuccess => "AUTH_SUCCESS",
            State::AuthFailure => "AUTH_FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::AuthSuccess | State::AuthFailure)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer value of every state on the wire.
///
/// Both peers must agree on these, so they can be overridden from the
/// `[flags]` table of the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagCodes {
    pub idle: i64,
    pub wake_up: i64,
    pub recording_started: i64,
    pub playback_started: i64,
    pub playback_stopped: i64,
    pub performing_analysis: i64,
    pub metrics_uploaded: i64,
    pub auth_success: i64,
    pub auth_failure: i64,
}

impl Default for FlagCodes {
    fn default() -> Self {
        Self {
            idle: 0,
            wake_up: 1,
            recording_started: 2,
            playback_started: 3,
            playback_stopped: 4,
            performing_analysis: 5,
            metrics_uploaded: 6,
            auth_success: 7,
            auth_failure: 8,
        }
    }
}

impl FlagCodes {
    pub fn code(&self, state: State) -> i64 {
        match state {
            State::Idle => self.idle,
            State::WakeUp => self.wake_up,
            State::RecordingStarted => self.recording_started,
            State::PlaybackStarted => self.playback_started,
            State::PlaybackStopped => self.playback_stopped,
            State::PerformingAnalysis => self.performing_analysis,
            State::MetricsUploaded => self.metrics_uploaded,
            State::AuthSuccess => self.auth_success,
            State::AuthFailure => self.auth_failure,
        }
    }

    pub fn state(&self, code: i64) -> Option<State> {
        State::ALL.into_iter().find(|&s| self.code(s) == code)
    }

    /// Reject mappings where two states share a code
    pub fn validate(&self) -> Result<(), String> {
        for (i, a) in State::ALL.iter().enumerate() {
            for b in &State::ALL[i + 1..] {
                if self.code(*a) == self.code(*b) {
                    return Err(format!(
                        "flag code {} is assigned to both {} and {}",
                        self.code(*a),
                        a,
                        b
                    ));
                }
            }
        }
        Ok(())
    }

    /// Decode a wire record; `None` when the flag is not a known code
    pub fn decode(&self, record: &SessionRecord) -> Option<Snapshot> {
        self.state(record.flag).map(|state| Snapshot {
            state,
            slope: record.slope,
        })
    }

    pub fn encode(&self, write: &StateWrite) -> RecordUpdate {
        RecordUpdate {
            flag: Some(self.code(write.state)),
            slope: None,
            calculated_slope: write.calculated_slope,
            r2: write.r2,
        }
    }
}

/// The shared session document
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SessionRecord {
    pub flag: i64,
    #[serde(default)]
    pub slope: f64,
    #[serde(
        rename = "calculatedSlope",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub calculated_slope: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r2: Option<f64>,
}

impl SessionRecord {
    /// Merge every field present in `update`
    pub fn apply(&mut self, update: &RecordUpdate) {
        if let Some(flag) = update.flag {
            self.flag = flag;
        }
        if let Some(slope) = update.slope {
            self.slope = slope;
        }
        if let Some(calculated_slope) = update.calculated_slope {
            self.calculated_slope = Some(calculated_slope);
        }
        if let Some(r2) = update.r2 {
            self.r2 = Some(r2);
        }
    }
}

/// Partial write to the session document
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f64>,
    #[serde(
        rename = "calculatedSlope",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub calculated_slope: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r2: Option<f64>,
}

/// Decoded view of the record handed to the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub state: State,
    pub slope: f64,
}

/// A state write from the device, optionally carrying analysis metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateWrite {
    pub state: State,
    pub calculated_slope: Option<f64>,
    pub r2: Option<f64>,
}

impl StateWrite {
    pub fn flag(state: State) -> Self {
        Self {
            state,
            calculated_slope: None,
            r2: None,
        }
    }

    pub fn with_metrics(mut self, slope: f64, r2: f64) -> Self {
        self.calculated_slope = Some(slope);
        self.r2 = Some(r2);
        self
    }
}

/// Messages sent from clients to the mailbox
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Receive a snapshot now and after every write
    Subscribe { id: Uuid },
    /// Read the current record
    Get { id: Uuid },
    /// Merge fields into the record
    Update { id: Uuid, update: RecordUpdate },
}

impl ClientMessage {
    pub fn new_subscribe() -> Self {
        ClientMessage::Subscribe { id: Uuid::new_v4() }
    }

    pub fn new_get() -> Self {
        ClientMessage::Get { id: Uuid::new_v4() }
    }

    pub fn new_update(update: RecordUpdate) -> Self {
        ClientMessage::Update {
            id: Uuid::new_v4(),
            update,
        }
    }
}

/// Messages sent from the mailbox to clients
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Subscribed { id: Uuid },
    Record { id: Uuid, record: SessionRecord },
    Updated { id: Uuid },
    Error { id: Uuid, error: String },
    /// Broadcast to subscribers after every write
    Snapshot { record: SessionRecord, ts: u64 },
}

impl ServerMessage {
    pub fn new_snapshot(record: SessionRecord, ts: u64) -> Self {
        ServerMessage::Snapshot { record, ts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_codes_map_every_state_back() {
        let codes = FlagCodes::default();
        assert!(codes.validate().is_ok());
        for state in State::ALL {
            assert_eq!(codes.state(codes.code(state)), Some(state));
        }
        assert_eq!(codes.state(42), None);
    }

    #[test]
    fn test_duplicate_codes_rejected() {
        let codes = FlagCodes {
            auth_failure: 7,
            ..FlagCodes::default()
        };
        let err = codes.validate().unwrap_err();
        assert!(err.contains("AUTH_SUCCESS"));
        assert!(err.contains("AUTH_FAILURE"));
    }

    #[test]
    fn test_apply_merges_present_fields_only() {
        let mut record = SessionRecord {
            flag: 1,
            slope: 1000.0,
            ..Default::default()
        };
        record.apply(&RecordUpdate {
            flag: Some(7),
            calculated_slope: Some(998.0),
            r2: Some(0.99),
            ..Default::default()
        });
        assert_eq!(record.flag, 7);
        assert_eq!(record.slope, 1000.0);
        assert_eq!(record.calculated_slope, Some(998.0));
        assert_eq!(record.r2, Some(0.99));
    }

    #[test]
    fn test_record_uses_wire_field_names() {
        let record = SessionRecord {
            flag: 7,
            slope: 1000.0,
            calculated_slope: Some(990.5),
            r2: Some(0.97),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["calculatedSlope"], 990.5);
        assert_eq!(json["flag"], 7);

        let minimal: SessionRecord = serde_json::from_str(r#"{"flag":3}"#).unwrap();
        assert_eq!(minimal.slope, 0.0);
        assert_eq!(minimal.r2, None);
    }

    #[test]
    fn test_encode_verdict_with_metrics() {
        let codes = FlagCodes::default();
        let update = codes.encode(&StateWrite::flag(State::AuthSuccess).with_metrics(1001.0, 0.98));
        assert_eq!(update.flag, Some(7));
        assert_eq!(update.slope, None);
        assert_eq!(update.calculated_slope, Some(1001.0));
    }
}
