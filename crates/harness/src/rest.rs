//! Thin REST client for the backend under test

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::HarnessResult;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RestError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RestError::Http(e) if e.is_timeout())
    }
}

/// HTTP methods an action route may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Status and raw body of a backend response
#[derive(Debug, Clone)]
pub struct RestResponse {
    pub status: u16,
    pub text: String,
}

impl RestResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.text)
    }

    /// Parsed body, or `Null` when the body is empty or not JSON
    pub fn json_or_null(&self) -> Value {
        self.json().unwrap_or(Value::Null)
    }
}

/// Backend client carrying the base URL and the opaque bearer token
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RestClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> HarnessResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get(&self, path: &str, query: &[(String, String)]) -> Result<RestResponse, RestError> {
        debug!("GET {} {:?}", path, query);
        let response = self.request(reqwest::Method::GET, path).query(query).send().await?;
        Self::read(response).await
    }

    pub async fn send_json(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<RestResponse, RestError> {
        debug!("{:?} {}", method, path);
        let mut builder = self.request(method.into(), path);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        Self::read(builder.send().await?).await
    }

    pub async fn post_multipart(
        &self,
        method: HttpMethod,
        path: &str,
        field: &str,
        file: &Path,
    ) -> Result<RestResponse, RestError> {
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        debug!("{:?} {} (multipart {}={})", method, path, field, file_name);
        let form = Form::new().part(field.to_string(), Part::bytes(bytes).file_name(file_name));
        let response = self.request(method.into(), path).multipart(form).send().await?;
        Self::read(response).await
    }

    async fn read(response: reqwest::Response) -> Result<RestResponse, RestError> {
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok(RestResponse { status, text })
    }
}
