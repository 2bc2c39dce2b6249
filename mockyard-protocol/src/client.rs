use std::path::Path;

use reqwest::{Method, RequestBuilder, Response, StatusCode, Url, multipart};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    errors::ClientError,
    protocol::{
        ConfigInfo, DeleteResponse, ErrorBody, HealthResponse, InstanceStatus, PortArg,
        StartRequest, StartResponse, StopRequest, StopResponse, UPLOAD_FIELD, UploadResponse,
    },
};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Default address of a locally running daemon
pub const DEFAULT_DAEMON_URL: &str = "http://127.0.0.1:3500";

/// HTTP client for the mockyard daemon API
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        Ok(Self {
            base_url,
            http: reqwest::Client::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.send_json(self.request(Method::GET, "/api/health")).await
    }

    pub async fn start(&self, port: u16, config_file: &str) -> Result<StartResponse> {
        let body = StartRequest {
            port: PortArg::from(port),
            config_file: config_file.to_string(),
        };
        self.send_json(self.request(Method::POST, "/api/mock/start").json(&body))
            .await
    }

    pub async fn stop(&self, port: u16) -> Result<StopResponse> {
        let body = StopRequest {
            port: PortArg::from(port),
        };
        self.send_json(self.request(Method::POST, "/api/mock/stop").json(&body))
            .await
    }

    pub async fn status(&self) -> Result<Vec<InstanceStatus>> {
        self.send_json(self.request(Method::GET, "/api/mock/status"))
            .await
    }

    pub async fn list_configs(&self) -> Result<Vec<ConfigInfo>> {
        self.send_json(self.request(Method::GET, "/api/mock/configs"))
            .await
    }

    /// Upload a configuration file from disk under its own file name
    pub async fn upload(&self, path: &Path) -> Result<UploadResponse> {
        let content = read_file(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config.json".to_string());
        self.upload_bytes(&file_name, content).await
    }

    pub async fn upload_bytes(&self, file_name: &str, content: Vec<u8>) -> Result<UploadResponse> {
        let part = multipart::Part::bytes(content)
            .file_name(file_name.to_string())
            .mime_str("application/json")
            .map_err(ClientError::Build)?;
        let form = multipart::Form::new().part(UPLOAD_FIELD, part);
        self.send_json(
            self.request(Method::POST, "/api/mock/upload")
                .multipart(form),
        )
        .await
    }

    pub async fn delete_config(&self, name: &str) -> Result<DeleteResponse> {
        let url = self.config_url(name, None)?;
        self.send_json(self.request_url(Method::DELETE, url)).await
    }

    pub async fn download_config(&self, name: &str) -> Result<serde_json::Value> {
        let url = self.config_url(name, Some("download"))?;
        self.send_json(self.request_url(Method::GET, url)).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        self.http.request(method, url)
    }

    fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        debug!("{} {}", method, url);
        self.http.request(method, url)
    }

    /// URL of a stored configuration, with `name` percent-encoded as a
    /// single path segment
    fn config_url(&self, name: &str, action: Option<&str>) -> Result<Url> {
        let invalid = |reason: String| ClientError::InvalidUrl {
            url: self.base_url.clone(),
            reason,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| invalid("url cannot have a path".to_string()))?;
            segments
                .pop_if_empty()
                .extend(["api", "mock", "configs", name]);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(|e| ClientError::Connect {
            url: self.base_url.clone(),
            source: e,
        })?;
        let response = check_status(response).await?;
        let path = response.url().path().to_string();
        response
            .json::<T>()
            .await
            .map_err(|source| ClientError::Decode { path, source })
    }
}

/// Turn a non-2xx response into `ClientError::Api`, using the daemon's error
/// body when it sent one.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let fallback = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    let message = match response.json::<ErrorBody>().await {
        Ok(body) => match body.detail {
            Some(detail) => format!("{} ({})", body.error, detail),
            None => body.error,
        },
        Err(_) => fallback,
    };

    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

fn normalize_base_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ClientError::InvalidUrl {
            url: url.to_string(),
            reason: "expected an http:// or https:// url".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| ClientError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

/// `true` when the error means the daemon answered with 404
pub fn is_not_found(err: &ClientError) -> bool {
    err.status() == Some(StatusCode::NOT_FOUND.as_u16())
}
