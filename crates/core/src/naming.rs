//! Object-storage key layout and content types for generated assets.

use crate::types::EntityId;

pub const CONTENT_TYPE_PNG: &str = "image/png";
pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";
pub const CONTENT_TYPE_WEBP: &str = "image/webp";
pub const CONTENT_TYPE_MP3: &str = "audio/mpeg";
pub const CONTENT_TYPE_WAV: &str = "audio/wav";
pub const CONTENT_TYPE_MP4: &str = "video/mp4";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_OCTET: &str = "application/octet-stream";

/// `shots/{id}/image.png`
pub fn shot_image_key(shot_id: EntityId) -> String {
    format!("shots/{shot_id}/image.png")
}

/// `shots/{id}/audio.mp3`
pub fn shot_audio_key(shot_id: EntityId) -> String {
    format!("shots/{shot_id}/audio.mp3")
}

/// `shots/{id}/video.mp4`
pub fn shot_video_key(shot_id: EntityId) -> String {
    format!("shots/{shot_id}/video.mp4")
}

/// Content type derived from the key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => CONTENT_TYPE_PNG,
        "jpg" | "jpeg" => CONTENT_TYPE_JPEG,
        "webp" => CONTENT_TYPE_WEBP,
        "mp3" => CONTENT_TYPE_MP3,
        "wav" => CONTENT_TYPE_WAV,
        "mp4" => CONTENT_TYPE_MP4,
        "json" => CONTENT_TYPE_JSON,
        _ => CONTENT_TYPE_OCTET,
    }
}
