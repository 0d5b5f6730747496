//! Authenticated access to the Exoscale v2 API.

pub(crate) mod operation;
pub(crate) mod resources;
pub(crate) mod sign;

use std::time::Duration;

use reqwest::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::de::DeserializeOwned;
use url::Url;

use crate::{account::Profile, cancel::CancelToken, cli::error::ExoError};

pub(crate) use operation::{AsyncResult, Operation, OperationState};

/// Deadline for operations known to take minutes.
pub(crate) const LONG_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub(crate) fn http_client() -> Result<reqwest::Client, ExoError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        "Accept",
        reqwest::header::HeaderValue::from_static("application/json"),
    );

    let client = reqwest::Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .default_headers(headers)
        .build()?;

    Ok(client)
}

/// The API URL for `zone`.
///
/// Provider endpoints (`https://<env>.exoscale.com/v2`) become
/// `https://<env>-<zone>.exoscale.com/v2`; anything else is used verbatim.
pub(crate) fn zoned_endpoint(endpoint: &str, environment: &str, zone: &str) -> Result<Url, ExoError> {
    let mut url = Url::parse(endpoint)?;

    let zoned_host = url
        .host_str()
        .and_then(|host| host.strip_prefix(&format!("{environment}.")))
        .map(|domain| format!("{environment}-{zone}.{domain}"));
    if let Some(host) = zoned_host {
        url.set_host(Some(&host))?;
    }

    Ok(url)
}

#[derive(Clone)]
pub(crate) struct ApiClient {
    http: reqwest::Client,
    endpoint: Url,
    zone: String,
    key: String,
    secret: String,
    timeout: Duration,
    poll_interval: Duration,
    cancel: CancelToken,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("zone", &self.zone)
            .field("key", &self.key)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub(crate) fn new(
        http: reqwest::Client,
        profile: &Profile,
        zone: &str,
        poll_interval: Duration,
        cancel: CancelToken,
    ) -> Result<Self, ExoError> {
        Ok(Self {
            http,
            endpoint: zoned_endpoint(profile.endpoint(), profile.environment(), zone)?,
            zone: zone.to_string(),
            key: profile.key.clone(),
            secret: profile.secret()?.to_string(),
            timeout: profile.client_timeout(),
            poll_interval,
            cancel,
        })
    }

    pub(crate) fn zone(&self) -> &str {
        &self.zone
    }

    pub(crate) fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// A client whose requests may each run up to `timeout`.
    pub(crate) fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, ExoError> {
        self.send(Method::GET, path, query, None).await
    }

    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        path: &[&str],
        body: &serde_json::Value,
    ) -> Result<T, ExoError> {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    pub(crate) async fn put<T: DeserializeOwned>(
        &self,
        path: &[&str],
        body: Option<&serde_json::Value>,
    ) -> Result<T, ExoError> {
        self.send(Method::PUT, path, &[], body).await
    }

    pub(crate) async fn delete<T: DeserializeOwned>(&self, path: &[&str]) -> Result<T, ExoError> {
        self.send(Method::DELETE, path, &[], None).await
    }

    #[tracing::instrument(skip_all, fields(%method, zone = %self.zone))]
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &[&str],
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<T, ExoError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| ExoError::Config(format!("invalid API endpoint {}", self.endpoint)))?
            .pop_if_empty()
            .extend(path);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let body = body.map(serde_json::to_string).transpose()?.unwrap_or_default();
        let expires = chrono::Utc::now().timestamp() + sign::SIGNATURE_VALIDITY_SECS;
        let authorization = sign::authorization(
            &self.key,
            &self.secret,
            &sign::SignedParts {
                method: method.as_str(),
                path: url.path(),
                body: &body,
                query,
                expires,
            },
        )?;

        tracing::debug!(url = %url, "API request");
        if !body.is_empty() {
            tracing::trace!(%body, "API request body");
        }

        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(AUTHORIZATION, authorization)
            .timeout(self.timeout);
        if !body.is_empty() {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        };

        let (status, text) = tokio::select! {
            res = exchange => res.map_err(|e| self.transport_error(e))?,
            () = self.cancel.cancelled() => return Err(ExoError::Cancelled),
        };

        tracing::debug!(%status, "API response");
        tracing::trace!(body = %text, "API response body");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ExoError::NotFound(
                server_message(&text).unwrap_or_else(|| format!("{} {}", method, url.path())),
            ));
        }
        if !status.is_success() {
            return Err(ExoError::Api {
                status: status.as_u16(),
                message: server_message(&text).unwrap_or(text),
            });
        }

        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }

    fn transport_error(&self, err: reqwest::Error) -> ExoError {
        if err.is_timeout() {
            ExoError::Timeout(self.timeout)
        } else {
            ExoError::Http(err)
        }
    }
}

fn server_message(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(ToString::to_string)
}
