use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Protocol-neutral description of one incoming audio object.
///
/// `source_ref` is opaque to the vault; only the fetcher that produced the
/// descriptor knows how to turn it back into bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub unique_media_id: String,
    pub source_ref: String,
    #[serde(default)]
    pub performer: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub duration: Option<u64>,
}

const DEFAULT_EXTENSION: &str = "mp3";

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    match mime.trim().to_ascii_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/ogg" | "audio/opus" => Some("ogg"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => Some("m4a"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        _ => None,
    }
}

impl MediaDescriptor {
    /// Extension of the original file name, else one implied by the mime type,
    /// else `mp3`.
    pub fn extension(&self) -> String {
        let from_name = self
            .file_name
            .as_deref()
            .and_then(|name| Path::new(name.trim()).extension())
            .and_then(|ext| ext.to_str())
            .map(str::trim)
            .filter(|ext| !ext.is_empty());
        if let Some(ext) = from_name {
            return ext.to_string();
        }

        self.mime_type
            .as_deref()
            .and_then(extension_for_mime)
            .unwrap_or(DEFAULT_EXTENSION)
            .to_string()
    }

    /// Ordered name parts fed to the filename allocator.
    pub fn name_parts(&self) -> [Option<&str>; 2] {
        [self.performer.as_deref(), self.title.as_deref()]
    }
}

/// One archived object. Built in one step and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    pub owner_id: i64,
    pub unique_media_id: String,
    pub performer: Option<String>,
    pub title: Option<String>,
    pub original_filename: Option<String>,
    pub mime_type: Option<String>,
    pub assigned_filename: String,
    pub created_at: DateTime<Utc>,
}

impl MediaRecord {
    pub fn new(
        owner_id: i64,
        descriptor: &MediaDescriptor,
        assigned_filename: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id,
            unique_media_id: descriptor.unique_media_id.clone(),
            performer: descriptor.performer.clone(),
            title: descriptor.title.clone(),
            original_filename: descriptor.file_name.clone(),
            mime_type: descriptor.mime_type.clone(),
            assigned_filename: assigned_filename.into(),
            created_at,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_descriptor(unique_media_id: &str) -> MediaDescriptor {
    MediaDescriptor {
        unique_media_id: unique_media_id.to_string(),
        source_ref: format!("ref-{unique_media_id}"),
        performer: Some("Bob".to_string()),
        title: Some("Song".to_string()),
        file_name: Some("bob_song.mp3".to_string()),
        mime_type: Some("audio/mpeg".to_string()),
        file_size: Some(11),
        duration: Some(180),
    }
}
