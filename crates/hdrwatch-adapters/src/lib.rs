//! Media-service adapter contracts + Radarr/Sonarr implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use hdrwatch_core::{HistoryEvent, MediaFile, MediaRecord, QualityProfileId, ServiceKind};
use hdrwatch_storage::{format_checkpoint, FetchError, HttpFetcher};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

mod notify;

pub use notify::{
    notification_message, Notifier, NotifyError, NtfyNotifier, NOTIFICATION_TAG,
    NOTIFICATION_TITLE,
};

pub const CRATE_NAME: &str = "hdrwatch-adapters";

/// History event type for a completed import from the download folder.
pub const IMPORT_EVENT_TYPE: &str = "downloadFolderImported";

const API_KEY_HEADER: &str = "X-Api-Key";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{service}: {source}")]
    Fetch {
        service: ServiceKind,
        #[source]
        source: FetchError,
    },
    #[error("{service}: api key is not a valid header value")]
    InvalidApiKey {
        service: ServiceKind,
        #[source]
        source: InvalidHeaderValue,
    },
    #[error("{service}: {noun} {id} has no quality profile")]
    MissingQualityProfile {
        service: ServiceKind,
        noun: &'static str,
        id: i64,
    },
}

/// Connection details for one Radarr/Sonarr instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub api_key: String,
    /// Quality profile whose items are expected to be SDR.
    pub expected_profile_id: QualityProfileId,
}

impl ServiceEndpoint {
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v3{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// One media-management service as seen by the check cycle.
#[async_trait]
pub trait MediaService: Send + Sync {
    fn kind(&self) -> ServiceKind;

    fn expected_profile_id(&self) -> QualityProfileId;

    /// Import events recorded at or after `since`, in upstream order.
    async fn fetch_history(&self, since: DateTime<Utc>) -> Result<Vec<HistoryEvent>, AdapterError>;

    async fn fetch_record(&self, media_id: i64) -> Result<MediaRecord, AdapterError>;

    /// Resolves every event concurrently; the first failed lookup fails the whole call.
    async fn resolve_details(
        &self,
        events: &[HistoryEvent],
    ) -> Result<Vec<MediaRecord>, AdapterError> {
        try_join_all(events.iter().map(|event| self.fetch_record(event.media_id))).await
    }
}

/// Shared HTTP plumbing for the `/api/v3` surface both services expose.
#[derive(Debug, Clone)]
struct ArrApi {
    kind: ServiceKind,
    endpoint: ServiceEndpoint,
    http: HttpFetcher,
    headers: HeaderMap,
}

impl ArrApi {
    fn new(
        kind: ServiceKind,
        endpoint: ServiceEndpoint,
        http: HttpFetcher,
    ) -> Result<Self, AdapterError> {
        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(&endpoint.api_key)
            .map_err(|source| AdapterError::InvalidApiKey { service: kind, source })?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);
        Ok(Self {
            kind,
            endpoint,
            http,
            headers,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, AdapterError> {
        self.http
            .get_json(&self.endpoint.api_url(path), query, self.headers.clone())
            .await
            .map_err(|source| AdapterError::Fetch {
                service: self.kind,
                source,
            })
    }

    async fn history_since<R>(&self, since: DateTime<Utc>) -> Result<Vec<R>, AdapterError>
    where
        R: serde::de::DeserializeOwned,
    {
        let date = format_checkpoint(since);
        let records: Vec<R> = self
            .get(
                "/history/since",
                &[("date", date.as_str()), ("eventType", IMPORT_EVENT_TYPE)],
            )
            .await?;
        debug!(service = %self.kind, since = %date, events = records.len(), "history fetched");
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovieHistoryResource {
    movie_id: i64,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
    #[serde(default)]
    source_title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovieResource {
    id: i64,
    #[serde(default)]
    title: String,
    quality_profile_id: QualityProfileId,
    #[serde(default)]
    movie_file: Option<MediaFile>,
}

#[derive(Debug, Clone)]
pub struct RadarrAdapter {
    api: ArrApi,
}

impl RadarrAdapter {
    pub fn new(endpoint: ServiceEndpoint, http: HttpFetcher) -> Result<Self, AdapterError> {
        Ok(Self {
            api: ArrApi::new(ServiceKind::Radarr, endpoint, http)?,
        })
    }
}

#[async_trait]
impl MediaService for RadarrAdapter {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Radarr
    }

    fn expected_profile_id(&self) -> QualityProfileId {
        self.api.endpoint.expected_profile_id
    }

    async fn fetch_history(&self, since: DateTime<Utc>) -> Result<Vec<HistoryEvent>, AdapterError> {
        let records: Vec<MovieHistoryResource> = self.api.history_since(since).await?;
        Ok(records
            .into_iter()
            .map(|r| HistoryEvent {
                service: ServiceKind::Radarr,
                media_id: r.movie_id,
                date: r.date,
                source_title: r.source_title,
            })
            .collect())
    }

    async fn fetch_record(&self, media_id: i64) -> Result<MediaRecord, AdapterError> {
        let movie: MovieResource = self.api.get(&format!("/movie/{media_id}"), &[]).await?;
        Ok(MediaRecord {
            service: ServiceKind::Radarr,
            id: movie.id,
            title: movie.title,
            quality_profile_id: movie.quality_profile_id,
            file: movie.movie_file,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeHistoryResource {
    episode_id: i64,
    #[serde(default)]
    date: Option<DateTime<Utc>>,
    #[serde(default)]
    source_title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesSummary {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    quality_profile_id: Option<QualityProfileId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EpisodeResource {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    quality_profile_id: Option<QualityProfileId>,
    #[serde(default)]
    episode_file: Option<MediaFile>,
    #[serde(default)]
    series: Option<SeriesSummary>,
}

impl EpisodeResource {
    /// The episode's own profile, falling back to the embedded series profile.
    fn effective_profile(&self) -> Option<QualityProfileId> {
        self.quality_profile_id
            .or_else(|| self.series.as_ref().and_then(|s| s.quality_profile_id))
    }

    fn display_title(&self) -> String {
        match self.series.as_ref().and_then(|s| s.title.as_deref()) {
            Some(series) if !self.title.is_empty() => format!("{series} - {}", self.title),
            Some(series) => series.to_string(),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SonarrAdapter {
    api: ArrApi,
}

impl SonarrAdapter {
    pub fn new(endpoint: ServiceEndpoint, http: HttpFetcher) -> Result<Self, AdapterError> {
        Ok(Self {
            api: ArrApi::new(ServiceKind::Sonarr, endpoint, http)?,
        })
    }
}

#[async_trait]
impl MediaService for SonarrAdapter {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Sonarr
    }

    fn expected_profile_id(&self) -> QualityProfileId {
        self.api.endpoint.expected_profile_id
    }

    async fn fetch_history(&self, since: DateTime<Utc>) -> Result<Vec<HistoryEvent>, AdapterError> {
        let records: Vec<EpisodeHistoryResource> = self.api.history_since(since).await?;
        Ok(records
            .into_iter()
            .map(|r| HistoryEvent {
                service: ServiceKind::Sonarr,
                media_id: r.episode_id,
                date: r.date,
                source_title: r.source_title,
            })
            .collect())
    }

    async fn fetch_record(&self, media_id: i64) -> Result<MediaRecord, AdapterError> {
        let episode: EpisodeResource = self.api.get(&format!("/episode/{media_id}"), &[]).await?;
        let quality_profile_id =
            episode
                .effective_profile()
                .ok_or(AdapterError::MissingQualityProfile {
                    service: ServiceKind::Sonarr,
                    noun: ServiceKind::Sonarr.media_noun(),
                    id: episode.id,
                })?;
        Ok(MediaRecord {
            service: ServiceKind::Sonarr,
            id: episode.id,
            title: episode.display_title(),
            quality_profile_id,
            file: episode.episode_file,
        })
    }
}
