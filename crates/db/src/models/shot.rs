//! Row mapping for the `shots` table.

use sqlx::FromRow;
use storyreel_core::shot::Shot;
use storyreel_core::types::{EntityId, Timestamp};

use crate::error::StoreError;

/// A row from the `shots` table.
#[derive(Debug, Clone, FromRow)]
pub struct ShotRow {
    pub id: EntityId,
    pub project_id: EntityId,
    pub shot_order: i32,
    pub title: String,
    pub description: String,
    pub prompt: String,
    pub transition: String,
    pub status: String,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub video_url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<ShotRow> for Shot {
    type Error = StoreError;

    fn try_from(row: ShotRow) -> Result<Self, Self::Error> {
        Ok(Shot {
            id: row.id,
            project_id: row.project_id,
            order: row.shot_order.max(0) as u32,
            title: row.title,
            description: row.description,
            prompt: row.prompt,
            transition: row.transition,
            status: row.status.parse()?,
            image_url: row.image_url,
            audio_url: row.audio_url,
            video_url: row.video_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
