//! Shot records produced by a storyboard and filled in by later tasks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{EntityId, Timestamp};

/// Generation status of a shot's assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShotStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ShotStatus {
    pub const ALL: [ShotStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ShotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShotStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| CoreError::Validation(format!("Unknown shot status '{s}'")))
    }
}

/// One shot of a project's storyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub id: EntityId,
    pub project_id: EntityId,
    pub order: u32,
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub transition: String,
    pub status: ShotStatus,
    /// Signed URL of the keyframe image, once generated.
    pub image_url: Option<String>,
    /// Signed URL of the narration audio, once generated.
    pub audio_url: Option<String>,
    /// Signed URL of the video clip, once generated.
    pub video_url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Input for creating a shot from a parsed storyboard entry.
#[derive(Debug, Clone, PartialEq)]
pub struct NewShot {
    pub order: u32,
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub transition: String,
}

impl NewShot {
    pub fn into_shot(self, id: EntityId, project_id: EntityId, now: Timestamp) -> Shot {
        Shot {
            id,
            project_id,
            order: self.order,
            title: self.title,
            description: self.description,
            prompt: self.prompt,
            transition: self.transition,
            status: ShotStatus::Pending,
            image_url: None,
            audio_url: None,
            video_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Which asset of a shot an update writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotAsset {
    Image,
    Audio,
    Video,
}

impl Shot {
    /// Record a generated asset URL. An image or a video marks the shot
    /// completed; audio leaves the status alone.
    pub fn set_asset(&mut self, asset: ShotAsset, url: String, now: Timestamp) {
        match asset {
            ShotAsset::Image => {
                self.image_url = Some(url);
                self.status = ShotStatus::Completed;
            }
            ShotAsset::Audio => self.audio_url = Some(url),
            ShotAsset::Video => {
                self.video_url = Some(url);
                self.status = ShotStatus::Completed;
            }
        }
        self.updated_at = now;
    }
}
