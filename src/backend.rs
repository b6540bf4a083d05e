//! REST backend seam.
//!
//! The store talks to the server only through [`NotificationBackend`]. The
//! `http` feature provides [`HttpBackend`] over blocking `reqwest`.

use crate::error::Result;
use crate::types::{NotificationId, NotificationRecord};
use chrono::{DateTime, Utc};

/// Server-side notification API.
///
/// Implementations block; callers run them off the UI path (poller thread,
/// receipts worker).
pub trait NotificationBackend: Send + Sync {
    /// `GET /notifications`, optionally only records newer than `since`.
    fn fetch_notifications(&self, since: Option<DateTime<Utc>>) -> Result<Vec<NotificationRecord>>;

    /// `PATCH /notifications/:id/read`
    fn mark_read(&self, id: &NotificationId) -> Result<()>;

    /// `PATCH /notifications/read-all`
    fn mark_all_read(&self) -> Result<()>;
}

/// Supplies the bearer token for backend and channel requests.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

impl<F> TokenProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

#[cfg(feature = "http")]
pub use http::HttpBackend;

#[cfg(feature = "http")]
mod http {
    use super::{NotificationBackend, TokenProvider};
    use crate::config::SyncConfig;
    use crate::decode::decode_poll_response;
    use crate::error::{Result, SyncError};
    use crate::types::{NotificationId, NotificationRecord};
    use chrono::{DateTime, SecondsFormat, Utc};
    use reqwest::blocking::{Client, RequestBuilder};
    use std::sync::Arc;
    use tracing::debug;
    use url::Url;

    /// [`NotificationBackend`] over HTTP/JSON.
    pub struct HttpBackend {
        client: Client,
        base: Url,
        token: Option<Arc<dyn TokenProvider>>,
    }

    impl HttpBackend {
        pub fn new(config: &SyncConfig) -> Result<Self> {
            let base = Url::parse(&config.base_url)?;
            if base.cannot_be_a_base() {
                return Err(SyncError::UnsupportedScheme(base.scheme().to_string()));
            }
            let client = Client::builder()
                .timeout(config.request_timeout())
                .build()?;
            Ok(Self {
                client,
                base,
                token: None,
            })
        }

        pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
            self.token = Some(provider);
            self
        }

        /// `{base}/{segments...}`, keeping any path prefix of the base.
        pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
            let mut url = self.base.clone();
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(segments);
            }
            url
        }

        fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
            match self.token.as_ref().and_then(|provider| provider.token()) {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        }

        fn patch(&self, segments: &[&str]) -> Result<()> {
            let url = self.endpoint(segments);
            debug!(%url, "PATCH");
            let response = self.authorized(self.client.patch(url.clone())).send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(SyncError::Status {
                    endpoint: url.path().to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(())
        }
    }

    impl NotificationBackend for HttpBackend {
        fn fetch_notifications(
            &self,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<NotificationRecord>> {
            let mut url = self.endpoint(&["notifications"]);
            if let Some(since) = since {
                url.query_pairs_mut()
                    .append_pair("since", &since.to_rfc3339_opts(SecondsFormat::Millis, true));
            }
            debug!(%url, "GET");

            let response = self.authorized(self.client.get(url.clone())).send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(SyncError::Status {
                    endpoint: url.path().to_string(),
                    status: status.as_u16(),
                });
            }

            let body: serde_json::Value = response.json()?;
            decode_poll_response(&body, Utc::now())
        }

        fn mark_read(&self, id: &NotificationId) -> Result<()> {
            self.patch(&["notifications", id.as_str(), "read"])
        }

        fn mark_all_read(&self) -> Result<()> {
            self.patch(&["notifications", "read-all"])
        }
    }

}
