use crate::models::{BatchUpdate, BatchUpdateResponse, FetchResponse};
use crate::storage::{load_string_from_storage, TOKEN_KEY};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    Network,
    Http,
    Parse,
}

#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    fn network(e: reqwest::Error) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            message: e.to_string(),
        }
    }

    fn parse(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            message: e.to_string(),
        }
    }

    fn unauthorized() -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            message: "Unauthorized".to_string(),
        }
    }

    fn http(status: reqwest::StatusCode, body: String, ctx: &str) -> Self {
        Self {
            kind: ApiErrorKind::Http,
            message: format!("{ctx} ({status}): {body}"),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Key-value content service for one site.
#[derive(Clone, Debug)]
pub struct ApiClient {
    pub(crate) base_url: String,
    pub(crate) site_id: String,
    pub(crate) token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            site_id: site_id.into(),
            token: None,
        }
    }

    /// Client with the bearer token left in local storage by the sign-in flow.
    pub fn load_from_storage(base_url: impl Into<String>, site_id: impl Into<String>) -> Self {
        let mut client = Self::new(base_url, site_id);
        client.token = load_string_from_storage(TOKEN_KEY).filter(|t| !t.trim().is_empty());
        client
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn content_url(&self) -> String {
        format!("{}/sites/{}/content", self.base_url, self.site_id)
    }

    pub(crate) fn page_content_url(&self, page: &str) -> String {
        format!("{}?page={}", self.content_url(), urlencoding::encode(page))
    }

    fn with_auth_headers(
        mut req: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn request_api<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        ctx: &str,
    ) -> ApiResult<T> {
        let req = Self::with_auth_headers(req, self.token.as_deref());
        let res = req.send().await.map_err(ApiError::network)?;

        if res.status().is_success() {
            res.json().await.map_err(ApiError::parse)
        } else if res.status().as_u16() == 401 {
            Err(ApiError::unauthorized())
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::http(status, body, ctx))
        }
    }

    /// All stored content for `page`, flattened to storage keys.
    pub async fn fetch_content(&self, page: &str) -> ApiResult<FetchResponse> {
        let client = reqwest::Client::new();
        let req = client.get(self.page_content_url(page));
        let data: FetchResponse = self.request_api(req, "Fetch content failed").await?;
        tracing::debug!(
            page = %page,
            elements = data.elements.len(),
            groups = data.groups.len(),
            "fetched content"
        );
        Ok(data)
    }

    /// Write a batch of changes; `None` values delete their key.
    pub async fn patch_content(&self, update: &BatchUpdate) -> ApiResult<BatchUpdateResponse> {
        let client = reqwest::Client::new();
        let req = client.post(self.content_url()).json(update);
        self.request_api(req, "Save content failed").await
    }
}
