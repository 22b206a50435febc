mod client;
#[cfg(test)]
pub(crate) mod memory;

pub use client::DependencyTrack;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found")]
    NotFound,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("unexpected response status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

/// The operations the uploader needs from the component-tracking service.
///
/// Implementations must be safe to share between concurrent uploads: the poll
/// loop calls [`TrackingClient::is_processing`] from a spawned task.
#[async_trait]
pub trait TrackingClient: Send + Sync {
    /// Fails with [`ClientError::NotFound`] when no such project version exists.
    async fn lookup_project(&self, name: &str, version: &str) -> Result<Project, ClientError>;

    async fn create_project(&self, name: &str, version: &str) -> Result<Project, ClientError>;

    async fn update_project(&self, project: &Project) -> Result<Project, ClientError>;

    async fn submit_bom(&self, submission: &BomSubmission) -> Result<UploadToken, ClientError>;

    async fn is_processing(&self, token: &UploadToken) -> Result<bool, ClientError>;
}

/// A project version as tracked by Dependency-Track.
///
/// Only the fields the uploader reads are modelled; everything else the server
/// returns is kept in `extra` so that an update sends it back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Epoch milliseconds of the last BOM import, absent for a project that
    /// never received one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_bom_import: Option<i64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// Body of a BOM upload request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BomSubmission {
    /// UUID of the target project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub project_name: String,
    pub project_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_version: Option<String>,
    pub auto_create: bool,
    pub is_latest: bool,
    /// Base64 encoded BOM document.
    pub bom: String,
}

/// Correlation handle for the asynchronous server-side processing of one
/// uploaded BOM.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadToken(pub String);

impl Display for UploadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
