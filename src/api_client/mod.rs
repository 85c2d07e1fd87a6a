//! API Client: the HTTP surface used to talk to the control plane.
//!
//! Requests carry a `Token` authorization header derived from the
//! license key, hit a versioned base path, and tolerate a
//! self-signed/invalid certificate on the control plane the way the
//! original agent did.

use std::path::Path;
use std::time::Duration;

use reqwest::{multipart, Client, Response};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;

use crate::error::ApiError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOADED_FILE_FIELD: &str = "uploaded_file";

/// Thin wrapper around a configured [`reqwest::Client`] plus the control
/// plane's endpoint and license token.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    endpoint: String,
    license_key: String,
}

impl ApiClient {
    /// Builds a client with a 30s timeout, keep-alive, and (per the
    /// original agent) certificate verification disabled, since control
    /// planes are commonly reached via a self-signed on-prem endpoint.
    /// An optional upstream proxy is wired in when the config enables it.
    pub fn new(endpoint: impl Into<String>, license_key: impl Into<String>, proxy_url: Option<&str>) -> Result<Self, ApiError> {
        Self::with_timeout(endpoint, license_key, proxy_url, REQUEST_TIMEOUT)
    }

    /// Like [`ApiClient::new`], but with an explicit request timeout.
    /// Used for the shorter-timeout license check against a not-yet-applied
    /// candidate config (§5), so a dead candidate endpoint can't stall the
    /// command dispatcher for a full 30s.
    pub fn with_timeout(
        endpoint: impl Into<String>,
        license_key: impl Into<String>,
        proxy_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let endpoint = endpoint.into();

        let mut builder = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("agent-watchdog/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = proxy_url {
            let proxy = reqwest::Proxy::all(proxy).map_err(|source| ApiError::Transport {
                url: proxy.to_string(),
                source,
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|source| ApiError::Transport {
            url: endpoint.clone(),
            source,
        })?;

        Ok(Self {
            client,
            endpoint,
            license_key: license_key.into(),
        })
    }

    /// Resolves `path` against the configured endpoint. Paths beginning
    /// with `/api/` are passed through untouched (they already address a
    /// specific API version); everything else is rooted under
    /// `/api/v1`.
    fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("/api/") {
            format!("{}{}", self.endpoint.trim_end_matches('/'), path)
        } else {
            format!(
                "{}/api/v1{}",
                self.endpoint.trim_end_matches('/'),
                if path.starts_with('/') { path.to_string() } else { format!("/{path}") }
            )
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Token {}", self.license_key))
    }

    /// GETs `path` and decodes the JSON body as `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.resolve_url(path);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| ApiError::Transport { url: url.clone(), source })?;
        let response = check_status("GET", &url, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|source| ApiError::Decode { url, source })
    }

    /// POSTs a JSON body to `path`, discarding any response body beyond
    /// status validation.
    pub async fn put_json<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let url = self.resolve_url(path);
        let response = self
            .authorize(self.client.put(&url))
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Transport { url: url.clone(), source })?;
        check_status("PUT", &url, response).await?;
        Ok(())
    }

    /// Streams the body at `path` to `dest_path`, returning the number of
    /// bytes written.
    pub async fn download(&self, path: &str, dest_path: &Path) -> Result<u64, ApiError> {
        let url = self.resolve_url(path);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| ApiError::Transport { url: url.clone(), source })?;
        let mut response = check_status("GET", &url, response).await?;

        let mut file = tokio::fs::File::create(dest_path)
            .await
            .map_err(|source| ApiError::Io { url: url.clone(), source })?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|source| ApiError::Decode { url: url.clone(), source })?
        {
            file.write_all(&chunk)
                .await
                .map_err(|source| ApiError::Io { url: url.clone(), source })?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|source| ApiError::Io { url: url.clone(), source })?;

        Ok(written)
    }

    /// Uploads `file_path` as multipart form data to `path` under the
    /// `uploaded_file` field name the control plane expects.
    pub async fn upload(&self, path: &str, file_path: &Path) -> Result<(), ApiError> {
        let url = self.resolve_url(path);
        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|source| ApiError::Io { url: url.clone(), source })?;
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let part = multipart::Part::bytes(bytes).file_name(file_name);
        let form = multipart::Form::new().part(UPLOADED_FILE_FIELD, part);

        let response = self
            .authorize(self.client.put(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|source| ApiError::Transport { url: url.clone(), source })?;
        check_status("PUT", &url, response).await?;
        Ok(())
    }
}

async fn check_status(method: &str, url: &str, response: Response) -> Result<Response, ApiError> {
    if response.status().as_u16() == 200 {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::RemoteStatus {
        method: method.to_string(),
        url: url.to_string(),
        status,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Echo {
        ok: bool,
    }

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build().unwrap(),
            endpoint: server.uri(),
            license_key: "test-license".into(),
        }
    }

    #[tokio::test]
    async fn get_decodes_json_and_sends_token_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/commands"))
            .and(header("Authorization", "Token test-license"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let echo: Echo = client.get("/commands").await.unwrap();
        assert!(echo.ok);
    }

    #[tokio::test]
    async fn non_success_status_surfaces_remote_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/commands"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.get::<Echo>("/commands").await.unwrap_err();
        match err {
            ApiError::RemoteStatus { status, body, .. } => {
                assert_eq!(status, 503);
                assert_eq!(body, "unavailable");
            }
            other => panic!("expected RemoteStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn download_writes_full_body_to_disk() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/updates/agent.msi"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"binary-payload".to_vec()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("agent.msi");
        let written = client.download("/updates/agent.msi", &dest).await.unwrap();

        assert_eq!(written, 14);
        assert_eq!(std::fs::read(&dest).unwrap(), b"binary-payload");
    }

    #[test]
    fn api_prefixed_paths_bypass_v1_rooting() {
        let client = ApiClient {
            client: Client::new(),
            endpoint: "https://control.example.com".into(),
            license_key: "k".into(),
        };
        assert_eq!(
            client.resolve_url("/api/v2/special"),
            "https://control.example.com/api/v2/special"
        );
        assert_eq!(
            client.resolve_url("/commands"),
            "https://control.example.com/api/v1/commands"
        );
    }
}
