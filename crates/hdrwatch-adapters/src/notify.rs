use async_trait::async_trait;
use hdrwatch_core::FlaggedItem;
use hdrwatch_storage::{FetchError, HttpFetcher};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION};
use thiserror::Error;
use tracing::info;

pub const NOTIFICATION_TITLE: &str = "Unexpected HDR Media Detected";
pub const NOTIFICATION_TAG: &str = "warning";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(#[from] FetchError),
    #[error("notification auth token is not a valid header value")]
    InvalidToken(#[source] InvalidHeaderValue),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, item: &FlaggedItem) -> Result<(), NotifyError>;
}

pub fn notification_message(item: &FlaggedItem) -> String {
    format!(
        "The following media was downloaded in HDR but is expected to be SDR: {}.",
        item.relative_path
    )
}

/// Posts alerts to an ntfy topic URL.
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    http: HttpFetcher,
    url: String,
    headers: HeaderMap,
}

impl NtfyNotifier {
    pub fn new(
        http: HttpFetcher,
        url: impl Into<String>,
        auth_token: Option<&str>,
    ) -> Result<Self, NotifyError> {
        let mut headers = HeaderMap::new();
        headers.insert("Title", HeaderValue::from_static(NOTIFICATION_TITLE));
        headers.insert("Tags", HeaderValue::from_static(NOTIFICATION_TAG));
        headers.insert("Markdown", HeaderValue::from_static("yes"));
        if let Some(token) = auth_token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(NotifyError::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(Self {
            http,
            url: url.into(),
            headers,
        })
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn notify(&self, item: &FlaggedItem) -> Result<(), NotifyError> {
        self.http
            .post_text(&self.url, notification_message(item), self.headers.clone())
            .await?;
        info!(service = %item.service, path = %item.relative_path, "notification sent");
        Ok(())
    }
}
