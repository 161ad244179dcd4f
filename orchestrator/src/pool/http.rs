//! Pooled HTTP clients for the collaborator REST endpoints

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::errors::OrchestratorError;
use crate::pool::{ApiFamily, ClientFactory};

/// HTTP client bound to one API family's base URL
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
    family: ApiFamily,
    token: Option<SecretString>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, OrchestratorError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid path {}: {}", path, e)))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, OrchestratorError> {
        let url = self.url(path)?;
        debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = &self.token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} {} failed: {} - {}", method, path, status, body);
            return Err(OrchestratorError::collaborator(
                self.family.as_str(),
                format!("{} {}: {} {}", method, path, status, body),
            ));
        }
        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, OrchestratorError> {
        let response = self.send::<()>(Method::GET, path, None).await?;
        Ok(response.json().await?)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, OrchestratorError> {
        let response = self.send(Method::POST, path, Some(body)).await?;
        Ok(response.json().await?)
    }

    /// POST whose response body is ignored
    pub async fn post_empty<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), OrchestratorError> {
        self.send(Method::POST, path, Some(body)).await?;
        Ok(())
    }

    /// PUT whose response body is ignored
    pub async fn put_empty<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), OrchestratorError> {
        self.send(Method::PUT, path, Some(body)).await?;
        Ok(())
    }
}

/// Builds [`ApiClient`]s from a per-family endpoint table
pub struct HttpClientFactory {
    endpoints: HashMap<ApiFamily, Url>,
    request_timeout: Duration,
    token: Option<SecretString>,
}

impl HttpClientFactory {
    pub fn new(endpoints: HashMap<ApiFamily, Url>, request_timeout: Duration) -> Self {
        Self {
            endpoints,
            request_timeout,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<SecretString>) -> Self {
        self.token = token;
        self
    }
}

#[async_trait]
impl ClientFactory for HttpClientFactory {
    type Client = ApiClient;

    async fn create(&self, family: ApiFamily) -> Result<ApiClient, OrchestratorError> {
        let base_url = self.endpoints.get(&family).cloned().ok_or_else(|| {
            OrchestratorError::ConfigError(format!("no endpoint configured for API family {}", family))
        })?;
        let client = Client::builder().timeout(self.request_timeout).build()?;
        Ok(ApiClient {
            client,
            base_url,
            family,
            token: self.token.clone(),
        })
    }

    async fn validate(&self, _family: ApiFamily, client: &ApiClient) -> bool {
        match client.send::<()>(Method::GET, "healthz", None).await {
            Ok(_) => true,
            Err(e) => {
                debug!("client validation failed: {}", e);
                false
            }
        }
    }
}
