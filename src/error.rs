use crate::dependencytrack::ClientError;
use crate::template::TemplateError;
use std::time::Duration;
use thiserror::Error;

/// Everything that can end a run early.
///
/// `NotSbomReport` is the only variant that is not a failure: the run
/// coordinator turns it into [`crate::RunOutcome::Skipped`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("not an SBOM report: {0}")]
    NotSbomReport(String),

    #[error("invalid report: {0}")]
    InvalidReport(String),

    #[error("unsupported operation: only verb \"update\" is supported, got {0:?}")]
    UnsupportedOperation(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("failed to set up the Dependency-Track client: {0}")]
    Client(#[source] ClientError),

    #[error("failed to look up project {project}: {source}")]
    Lookup {
        project: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to create project {project}: {source}")]
    Create {
        project: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to update project {project}: {source}")]
    Update {
        project: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to submit BOM for project {project}: {source}")]
    Submit {
        project: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to check BOM processing for project {project} (token {token}): {source}")]
    Poll {
        project: String,
        token: String,
        #[source]
        source: ClientError,
    },

    #[error("BOM processing for project {project} (token {token}) did not finish within {timeout:?}")]
    Timeout {
        project: String,
        token: String,
        timeout: Duration,
    },

    #[error("BOM processing check for project {project} (token {token}) stopped unexpectedly: {source}")]
    PollTask {
        project: String,
        token: String,
        #[source]
        source: tokio::task::JoinError,
    },

    #[error("BOM upload for project {project} was cancelled")]
    Cancelled { project: String },
}

impl Error {
    /// `true` for failures caused by the tracking service or the transport to it.
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self,
            Error::Lookup { .. }
                | Error::Create { .. }
                | Error::Update { .. }
                | Error::Submit { .. }
                | Error::Poll { .. }
        )
    }
}
