//! HTTP client for the share API's download-link endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::item::ResolutionParams;

use super::{LinkResolver, ResolveError, ResolvedLink};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_LINK_PATH: &str = "/api/download-link";

/// Wire shape of the share API's answer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkResponse {
    ok: bool,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Resolver backed by the share API's download-link endpoint.
///
/// Posts the resolution parameters as JSON and interprets the
/// `{ok, link, errorMessage}` answer.
#[derive(Debug, Clone)]
pub struct ShareApiResolver {
    http: reqwest::Client,
    endpoint: String,
}

impl ShareApiResolver {
    /// Creates a resolver for the given API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn new(api_base: &str) -> Result<Self, ResolveError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{DOWNLOAD_LINK_PATH}", api_base.trim_end_matches('/')),
        })
    }

    /// Returns the endpoint this resolver posts to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LinkResolver for ShareApiResolver {
    #[tracing::instrument(skip(self, params), fields(file_id = %params.file_id, share_id = %params.share_id))]
    async fn resolve(&self, params: &ResolutionParams) -> Result<ResolvedLink, ResolveError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(params)
            .send()
            .await?
            .error_for_status()?;

        let payload: LinkResponse = response.json().await?;

        if !payload.ok {
            return Err(ResolveError::rejected(payload.error_message));
        }

        let Some(link) = payload.link else {
            return Err(ResolveError::invalid_response("ok response without a link"));
        };

        if Url::parse(&link).is_err() {
            return Err(ResolveError::invalid_response(&format!(
                "link is not a valid URL: {link}"
            )));
        }

        tracing::debug!(file_id = %params.file_id, "resolved download link");
        Ok(ResolvedLink::new(link))
    }
}
