use super::{BomSubmission, ClientError, Project, TrackingClient, UploadToken};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-Api-Key";

/// [`TrackingClient`] over the Dependency-Track v1 REST API.
#[derive(Debug, Clone)]
pub struct DependencyTrack {
    client: Client,
    base_url: Url,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: UploadToken,
}

#[derive(Deserialize)]
struct ProcessingResponse {
    processing: bool,
}

impl DependencyTrack {
    /// `timeout` bounds every single request, not a whole upload.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ClientError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Other(format!("invalid base URL {:?}: {}", base_url, e)))?;
        // relative joins drop the last path segment unless it ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut api_key = HeaderValue::from_str(api_key)
            .map_err(|_| ClientError::Other("API key is not a valid header value".to_string()))?;
        api_key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, api_key);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(DependencyTrack { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Other(format!("invalid endpoint {:?}: {}", path, e)))
    }

    fn token_endpoint(&self, token: &UploadToken) -> Result<Url, ClientError> {
        let mut url = self.endpoint("api/v1/bom/token")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::Other("base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .push(&token.0);
        Ok(url)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<T>().await?)
}

#[async_trait]
impl TrackingClient for DependencyTrack {
    async fn lookup_project(&self, name: &str, version: &str) -> Result<Project, ClientError> {
        let response = self
            .client
            .get(self.endpoint("api/v1/project/lookup")?)
            .query(&[("name", name), ("version", version)])
            .send()
            .await?;
        read_json(response).await
    }

    async fn create_project(&self, name: &str, version: &str) -> Result<Project, ClientError> {
        let response = self
            .client
            .put(self.endpoint("api/v1/project")?)
            .json(&json!({"name": name, "version": version, "active": true}))
            .send()
            .await?;
        read_json(response).await
    }

    async fn update_project(&self, project: &Project) -> Result<Project, ClientError> {
        let response = self
            .client
            .post(self.endpoint("api/v1/project")?)
            .json(project)
            .send()
            .await?;
        read_json(response).await
    }

    async fn submit_bom(&self, submission: &BomSubmission) -> Result<UploadToken, ClientError> {
        let response = self
            .client
            .put(self.endpoint("api/v1/bom")?)
            .json(submission)
            .send()
            .await?;
        Ok(read_json::<TokenResponse>(response).await?.token)
    }

    async fn is_processing(&self, token: &UploadToken) -> Result<bool, ClientError> {
        let response = self.client.get(self.token_endpoint(token)?).send().await?;
        Ok(read_json::<ProcessingResponse>(response).await?.processing)
    }
}
