mod poll;

use crate::cancel::Cancellation;
use crate::dependencytrack::{BomSubmission, ClientError, Project, Tag, TrackingClient};
use crate::error::Error;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use itertools::Itertools;
use poll::{PollOutcome, wait_until_processed};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Where a BOM goes, resolved once per report.
///
/// An empty `parent_name` means the project has no parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectIdentity {
    pub name: String,
    pub version: String,
    pub parent_name: String,
    pub parent_version: String,
}

impl Display for ProjectIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Publishes BOMs and tags to the tracking service.
pub struct Publisher<C: ?Sized> {
    client: Arc<C>,
    upload_timeout: Duration,
    check_interval: Duration,
}

impl<C> Publisher<C>
where
    C: TrackingClient + ?Sized + 'static,
{
    pub fn new(client: Arc<C>, upload_timeout: Duration, check_interval: Duration) -> Self {
        Publisher {
            client,
            upload_timeout,
            check_interval,
        }
    }

    /// Whether a BOM updated at `incoming` (epoch millis) should be flagged as
    /// the latest for this exact project version.
    ///
    /// A version the service does not know yet is trivially the latest. A known
    /// one is superseded only by a strictly newer timestamp than its last BOM
    /// import, so a tie keeps the current BOM.
    pub async fn is_latest(&self, name: &str, version: &str, incoming: i64) -> bool {
        match self.client.lookup_project(name, version).await {
            Err(err) => {
                info!(project = name, version, error = %err, "No existing project version, treating BOM as latest");
                true
            }
            Ok(project) => {
                let last_bom_import = project.last_bom_import.unwrap_or(0);
                let latest = last_bom_import < incoming;
                info!(
                    project = name,
                    version, last_bom_import, incoming, latest, "Compared BOM timestamps"
                );
                latest
            }
        }
    }

    /// Uploads `bom` and waits until the service has processed it.
    ///
    /// The project version is created first when missing. Nothing is retried:
    /// the first failure, the timeout or the cancellation is returned as is.
    /// Cancellation also abandons a pending lookup, create or submit request.
    pub async fn upload_bom(
        &self,
        identity: &ProjectIdentity,
        bom: &[u8],
        is_latest: bool,
        cancellation: Cancellation,
    ) -> Result<(), Error> {
        let mut cancelled = cancellation.clone();
        let cancelled_error = || Error::Cancelled {
            project: identity.to_string(),
        };

        let project = tokio::select! {
            biased;
            _ = cancelled.cancelled() => return Err(cancelled_error()),
            project = self.ensure_project(identity) => project?,
        };

        let parent_name = Some(identity.parent_name.clone()).filter(|name| !name.is_empty());
        let parent_version = parent_name
            .as_ref()
            .and(Some(identity.parent_version.clone()))
            .filter(|version| !version.is_empty());
        let submission = BomSubmission {
            project: project.uuid,
            project_name: identity.name.clone(),
            project_version: identity.version.clone(),
            parent_name,
            parent_version,
            auto_create: true,
            is_latest,
            bom: STANDARD.encode(bom),
        };

        info!(project = %identity.name, version = %identity.version, is_latest, "Uploading BOM");
        let token = tokio::select! {
            biased;
            _ = cancelled.cancelled() => return Err(cancelled_error()),
            token = self.client.submit_bom(&submission) => token.map_err(|source| Error::Submit {
                project: identity.to_string(),
                source,
            })?,
        };

        info!(project = %identity.name, version = %identity.version, %token, "Polling completion of BOM upload");
        let outcome = wait_until_processed(
            self.client.clone(),
            token.clone(),
            self.check_interval,
            self.upload_timeout,
            cancellation,
        )
        .await;
        match outcome {
            PollOutcome::Completed => {
                info!(project = %identity.name, version = %identity.version, %token, "BOM upload completed");
                Ok(())
            }
            PollOutcome::Failed(source) => Err(Error::Poll {
                project: identity.to_string(),
                token: token.to_string(),
                source,
            }),
            PollOutcome::TimedOut => Err(Error::Timeout {
                project: identity.to_string(),
                token: token.to_string(),
                timeout: self.upload_timeout,
            }),
            PollOutcome::Cancelled => Err(cancelled_error()),
            PollOutcome::Crashed(source) => Err(Error::PollTask {
                project: identity.to_string(),
                token: token.to_string(),
                source,
            }),
        }
    }

    /// Appends `tags` to the project's tags and saves the project. Existing
    /// tags are kept and duplicates are not filtered out.
    pub async fn add_tags(&self, name: &str, version: &str, tags: &[String]) -> Result<(), Error> {
        let label = format!("{}:{}", name, version);
        info!(project = name, version, tags = %tags.iter().join(","), "Adding tags to project");

        let mut project = self
            .client
            .lookup_project(name, version)
            .await
            .map_err(|source| Error::Lookup {
                project: label.clone(),
                source,
            })?;
        project
            .tags
            .extend(tags.iter().map(|tag| Tag { name: tag.clone() }));
        self.client
            .update_project(&project)
            .await
            .map_err(|source| Error::Update {
                project: label,
                source,
            })?;
        Ok(())
    }

    async fn ensure_project(&self, identity: &ProjectIdentity) -> Result<Project, Error> {
        let (name, version) = (identity.name.as_str(), identity.version.as_str());
        match self.client.lookup_project(name, version).await {
            Ok(project) => return Ok(project),
            Err(ClientError::NotFound) => {}
            Err(source) => {
                return Err(Error::Lookup {
                    project: identity.to_string(),
                    source,
                });
            }
        }

        info!(project = name, version, "Creating project");
        if let Err(source) = self.client.create_project(name, version).await {
            // someone else may have created it in the meantime
            warn!(project = name, version, error = %source, "Project creation failed, looking it up again");
            return self
                .client
                .lookup_project(name, version)
                .await
                .map_err(|_| Error::Create {
                    project: identity.to_string(),
                    source,
                });
        }
        self.client
            .lookup_project(name, version)
            .await
            .map_err(|source| Error::Lookup {
                project: identity.to_string(),
                source,
            })
    }
}
