//! Thin reqwest wrapper: base URL, bearer session token, status mapping.

use bytes::Bytes;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url, multipart::Form};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use devlog_api_types::ErrorBody;

use crate::application::repos::RepoError;
use crate::config::ApiSettings;
use crate::infra::error::InfraError;

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, InfraError> {
        let base = settings
            .base_url
            .join("/")
            .map_err(|err| InfraError::configuration(format!("invalid api base url: {err}")))?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http(err.to_string()))?;
        Ok(Self {
            client,
            base,
            token: settings.session_token.clone(),
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("devlog/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn url(&self, path: &str) -> Result<Url, RepoError> {
        self.base
            .join(path)
            .map_err(|err| RepoError::transient(format!("invalid request path `{path}`: {err}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RepoError> {
        let mut url = self.url(path)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        let body = self.send(self.request(Method::GET, url)).await?;
        decode(&body)
    }

    pub async fn send_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, RepoError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.request(method, self.url(path)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        let body = self.send(request).await?;
        decode(&body)
    }

    /// Send a request whose response body is irrelevant.
    pub async fn send_unit<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<(), RepoError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.request(method, self.url(path)?);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await.map(|_| ())
    }

    pub async fn send_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
    ) -> Result<T, RepoError> {
        let request = self.request(Method::POST, self.url(path)?).multipart(form);
        let body = self.send(request).await?;
        decode(&body)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Bytes, RepoError> {
        let response = request.send().await.map_err(RepoError::transient)?;
        read_body(response).await
    }
}

async fn read_body(response: Response) -> Result<Bytes, RepoError> {
    let status = response.status();
    let url = response.url().path().to_string();
    let bytes = response.bytes().await.map_err(RepoError::transient)?;
    if status.is_success() {
        return Ok(bytes);
    }
    debug!(%status, path = %url, "API request failed");
    Err(status_error(status, &bytes))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RepoError> {
    serde_json::from_slice(bytes)
        .map_err(|err| RepoError::transient(format!("failed to parse response body: {err}")))
}

/// Map a non-success status to the collaborator error taxonomy.
pub fn status_error(status: StatusCode, body: &[u8]) -> RepoError {
    let message = || {
        serde_json::from_slice::<ErrorBody>(body)
            .ok()
            .map(|body| body.error)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            })
    };
    match status {
        StatusCode::UNAUTHORIZED => RepoError::Unauthenticated,
        StatusCode::FORBIDDEN => RepoError::Forbidden,
        StatusCode::NOT_FOUND => RepoError::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            RepoError::rejected(message())
        }
        _ => RepoError::transient(format!("status {status}: {}", message())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn statuses_map_onto_repo_errors() {
        assert_eq!(status_error(StatusCode::UNAUTHORIZED, b""), RepoError::Unauthenticated);
        assert_eq!(status_error(StatusCode::FORBIDDEN, b""), RepoError::Forbidden);
        assert_eq!(status_error(StatusCode::NOT_FOUND, b""), RepoError::NotFound);
        assert_eq!(
            status_error(StatusCode::CONFLICT, br#"{"error":"already reported"}"#),
            RepoError::rejected("already reported")
        );
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, br#"{"message":"title required"}"#),
            RepoError::rejected("title required")
        );
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, b"<html>"),
            RepoError::Transient(message) if message.contains("Bad Gateway")
        ));
    }

    #[test]
    fn rejected_without_body_uses_reason_phrase() {
        assert_eq!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, b""),
            RepoError::rejected("Unprocessable Entity")
        );
    }

    #[test]
    fn base_url_drops_any_path() {
        let client = ApiClient::new(&ApiSettings {
            base_url: Url::parse("http://localhost:3000/app/").expect("url"),
            session_token: None,
            timeout: Duration::from_secs(5),
        })
        .expect("client");
        assert_eq!(
            client.url("api/posts").expect("join").as_str(),
            "http://localhost:3000/api/posts"
        );
    }
}
