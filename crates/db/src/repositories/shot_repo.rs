//! Repository for the `shots` table.

use sqlx::{PgConnection, PgPool};
use storyreel_core::shot::{Shot, ShotAsset, ShotStatus};
use storyreel_core::types::EntityId;

use crate::error::StoreError;
use crate::models::shot::ShotRow;

/// Column list for `shots` queries.
const COLUMNS: &str = "\
    id, project_id, shot_order, title, description, prompt, transition, status, \
    image_url, audio_url, video_url, created_at, updated_at";

/// Provides CRUD operations for shots.
pub struct ShotRepo;

impl ShotRepo {
    pub async fn insert(conn: &mut PgConnection, shot: &Shot) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO shots (id, project_id, shot_order, title, description, prompt, \
             transition, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(shot.id)
        .bind(shot.project_id)
        .bind(shot.order as i32)
        .bind(&shot.title)
        .bind(&shot.description)
        .bind(&shot.prompt)
        .bind(&shot.transition)
        .bind(shot.status.as_str())
        .bind(shot.created_at)
        .bind(shot.updated_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(pool: &PgPool, id: EntityId) -> Result<Option<Shot>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM shots WHERE id = $1");
        sqlx::query_as::<_, ShotRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Shot::try_from)
            .transpose()
    }

    pub async fn list_by_project(pool: &PgPool, project_id: EntityId) -> Result<Vec<Shot>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM shots WHERE project_id = $1 ORDER BY shot_order, created_at"
        );
        sqlx::query_as::<_, ShotRow>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(Shot::try_from)
            .collect()
    }

    /// Set one asset URL. Image and video also mark the shot completed.
    pub async fn set_asset(
        pool: &PgPool,
        id: EntityId,
        asset: ShotAsset,
        url: &str,
    ) -> Result<Option<Shot>, StoreError> {
        let (column, status) = match asset {
            ShotAsset::Image => ("image_url", Some(ShotStatus::Completed)),
            ShotAsset::Audio => ("audio_url", None),
            ShotAsset::Video => ("video_url", Some(ShotStatus::Completed)),
        };
        let query = format!(
            "UPDATE shots SET {column} = $2, status = COALESCE($3, status), updated_at = NOW() \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ShotRow>(&query)
            .bind(id)
            .bind(url)
            .bind(status.map(ShotStatus::as_str))
            .fetch_optional(pool)
            .await?
            .map(Shot::try_from)
            .transpose()
    }
}
