//! Core domain model and the unexpected-HDR mismatch filter.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "hdrwatch-core";

/// Literal dynamic-range value reported by the media services for HDR video.
pub const HDR_DYNAMIC_RANGE: &str = "HDR";

/// Quality profile identifier as assigned by Radarr/Sonarr.
pub type QualityProfileId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Radarr,
    Sonarr,
}

impl ServiceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Radarr => "radarr",
            ServiceKind::Sonarr => "sonarr",
        }
    }

    /// Human noun for the media a service manages, used in log lines.
    pub fn media_noun(self) -> &'static str {
        match self {
            ServiceKind::Radarr => "movie",
            ServiceKind::Sonarr => "episode",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed import reported by a service's history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub service: ServiceKind,
    /// Movie id (Radarr) or episode id (Sonarr) used to resolve the full record.
    pub media_id: i64,
    pub date: Option<DateTime<Utc>>,
    pub source_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    #[serde(default)]
    pub video_dynamic_range: Option<String>,
}

/// File descriptor embedded in a movie or episode record once a file has been imported.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    #[serde(default)]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub media_info: Option<MediaInfo>,
}

impl MediaFile {
    pub fn dynamic_range(&self) -> Option<&str> {
        self.media_info
            .as_ref()
            .and_then(|info| info.video_dynamic_range.as_deref())
    }

    pub fn is_hdr(&self) -> bool {
        self.dynamic_range() == Some(HDR_DYNAMIC_RANGE)
    }
}

/// Full metadata for a movie or an episode, normalized across services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub service: ServiceKind,
    pub id: i64,
    pub title: String,
    pub quality_profile_id: QualityProfileId,
    pub file: Option<MediaFile>,
}

impl MediaRecord {
    /// True when the record sits on the SDR-expected profile but its file is HDR.
    ///
    /// Records without a file descriptor are never flagged.
    pub fn is_unexpected_hdr(&self, expected_profile_id: QualityProfileId) -> bool {
        self.quality_profile_id == expected_profile_id
            && self.file.as_ref().is_some_and(MediaFile::is_hdr)
    }
}

/// A record that was imported in HDR despite an SDR-expected quality profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlaggedItem {
    pub service: ServiceKind,
    pub media_id: i64,
    pub title: String,
    pub relative_path: String,
}

impl FlaggedItem {
    fn from_record(record: &MediaRecord) -> Self {
        let relative_path = record
            .file
            .as_ref()
            .and_then(|file| file.relative_path.clone())
            .unwrap_or_else(|| record.title.clone());
        Self {
            service: record.service,
            media_id: record.id,
            title: record.title.clone(),
            relative_path,
        }
    }
}

pub fn filter_unexpected_hdr(
    records: &[MediaRecord],
    expected_profile_id: QualityProfileId,
) -> Vec<FlaggedItem> {
    records
        .iter()
        .filter(|record| record.is_unexpected_hdr(expected_profile_id))
        .map(FlaggedItem::from_record)
        .collect()
}
