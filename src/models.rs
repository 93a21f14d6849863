//! Records persisted by the moderation subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::CensorError;

/// Longest accepted gap between captured frames: one day.
pub const MAX_INTERVAL_SECS: i64 = 86_400;

/// Stop reason recorded when a stream was terminated for a moderation violation.
pub const STOP_REASON_CENSOR: &str = "censor";

/// Which detection scenes the provider screens for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Scenes {
    pub politician: bool,
    pub pulp: bool,
    pub ads: bool,
    pub terror: bool,
}

impl Scenes {
    /// Provider scene identifiers for every enabled scene.
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.pulp, "pulp"),
            (self.terror, "terror"),
            (self.politician, "politician"),
            (self.ads, "ads"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

/// The global moderation policy. Exactly one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ModerationConfig {
    pub enabled: bool,
    /// Seconds between captured frames.
    #[serde(rename = "interval")]
    pub interval_secs: i64,
    #[sqlx(flatten)]
    pub scenes: Scenes,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 20,
            scenes: Scenes {
                pulp: true,
                ..Scenes::default()
            },
        }
    }
}

impl ModerationConfig {
    /// Rejects an interval outside `1..=MAX_INTERVAL_SECS`.
    pub fn validate(&self) -> Result<(), CensorError> {
        if !(1..=MAX_INTERVAL_SECS).contains(&self.interval_secs) {
            return Err(CensorError::precondition(format!(
                "interval must be between 1 and {MAX_INTERVAL_SECS} seconds"
            )));
        }
        Ok(())
    }

    /// The capture interval in the provider's unit.
    pub fn interval_msecs(&self) -> Result<i64, CensorError> {
        self.validate()?;
        self.interval_secs
            .checked_mul(1000)
            .ok_or_else(|| CensorError::precondition("interval overflows milliseconds"))
    }
}

/// The provider job created for a stream, with the policy it was created under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct StreamModerationJob {
    pub stream_id: String,
    pub job_id: String,
    pub interval_secs: i64,
    #[sqlx(flatten)]
    pub scenes: Scenes,
    pub created_at: DateTime<Utc>,
    /// Set once the provider confirmed the job was closed.
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ReviewState {
    Unreviewed = 0,
    Reviewed = 1,
}

/// A reviewer's verdict. A descending sort puts confirmed violations first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ReviewAnswer {
    /// False positive.
    Pass = 1,
    /// Confirmed violation.
    Block = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum MediaKind {
    Image = 0,
    Audio = 1,
}

/// A flagged frame or audio segment awaiting (or past) human review.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct ReviewItem {
    pub id: i64,
    pub stream_id: String,
    pub job_id: String,
    pub kind: MediaKind,
    /// Media locator inside the provider's bucket.
    pub url: String,
    /// The provider's overall suggestion (`review`, `block`, ...).
    pub suggestion: String,
    /// Per-scene verdicts as returned by the provider.
    #[sqlx(json)]
    pub scenes: serde_json::Value,
    pub audio_text: Option<String>,
    /// Provider timestamp of the frame, or start of the audio segment.
    pub captured_at: i64,
    /// End of the audio segment.
    pub captured_until: Option<i64>,
    pub review_state: ReviewState,
    /// Only meaningful once `review_state` is `Reviewed`.
    pub review_answer: Option<ReviewAnswer>,
    pub reviewer_id: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Field updates applied by a batch review transition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReviewUpdate {
    pub state: ReviewState,
    pub answer: Option<ReviewAnswer>,
    pub reviewer_id: Option<String>,
}

impl ReviewUpdate {
    pub fn reviewed(answer: ReviewAnswer, reviewer_id: Option<String>) -> Self {
        Self {
            state: ReviewState::Reviewed,
            answer: Some(answer),
            reviewer_id,
        }
    }
}

/// Review-state filter shared by both review queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFilter {
    #[default]
    Any,
    Unreviewed,
    Reviewed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum StreamStatus {
    Pending = 0,
    Live = 1,
    Stopped = 2,
}

/// What the stream-lifecycle manager tells us about a stream when it starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamDescriptor {
    pub title: String,
    pub anchor_id: String,
    pub push_url: String,
    pub rtmp_play_url: String,
    pub flv_play_url: String,
    pub hls_play_url: String,
}

/// A tracked live stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct LiveStream {
    pub stream_id: String,
    pub title: String,
    pub anchor_id: String,
    pub status: StreamStatus,
    pub stop_reason: String,
    pub push_url: String,
    pub rtmp_play_url: String,
    pub flv_play_url: String,
    pub hls_play_url: String,
    pub start_at: Option<DateTime<Utc>>,
    pub stop_at: Option<DateTime<Utc>>,
    pub unreview_censor_count: i64,
    /// Unix seconds of the most recent ingested item, 0 if none.
    pub last_censor_time: i64,
}

/// Per-stream view served by the review queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamCensorSummary {
    pub stream_id: String,
    pub title: String,
    pub anchor_id: String,
    pub status: StreamStatus,
    pub stop_reason: String,
    /// Items still awaiting review.
    pub count: i64,
    pub violation_count: i64,
    pub ai_count: i64,
    pub push_url: String,
    pub rtmp_play_url: String,
    pub flv_play_url: String,
    pub hls_play_url: String,
    /// Milliseconds since the epoch, 0 when unset.
    pub start_at: i64,
    pub stop_at: i64,
    pub time: i64,
}

impl StreamCensorSummary {
    pub fn new(stream: LiveStream, violation_count: i64, ai_count: i64) -> Self {
        Self {
            start_at: stream.start_at.map_or(0, |t| t.timestamp_millis()),
            stop_at: stream.stop_at.map_or(0, |t| t.timestamp_millis()),
            time: stream.last_censor_time * 1000,
            count: stream.unreview_censor_count,
            violation_count,
            ai_count,
            stream_id: stream.stream_id,
            title: stream.title,
            anchor_id: stream.anchor_id,
            status: stream.status,
            stop_reason: stream.stop_reason,
            push_url: stream.push_url,
            rtmp_play_url: stream.rtmp_play_url,
            flv_play_url: stream.flv_play_url,
            hls_play_url: stream.hls_play_url,
        }
    }
}
