use crate::cancel::Cancellation;
use crate::config::Config;
use crate::dependencytrack::{DependencyTrack, TrackingClient};
use crate::error::Error;
use crate::publisher::{ProjectIdentity, Publisher};
use crate::sbomreport::SbomReport;
use crate::template::{Template, TemplateError};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Uploaded {
        project: String,
        version: String,
        is_latest: bool,
    },
    /// The input was not an SBOM report, nothing was sent.
    Skipped { reason: String },
}

/// Runs reports end to end: parse, resolve the project, upload, tag.
pub struct Uploader<C: ?Sized> {
    publisher: Publisher<C>,
    templates: Templates,
}

struct Templates {
    project_name: Template,
    project_version: Template,
    project_tags: Vec<Template>,
    parent_name: Template,
    parent_version: Template,
}

impl Templates {
    fn parse(config: &Config) -> Result<Self, TemplateError> {
        Ok(Templates {
            project_name: Template::parse(&config.project_name)?,
            project_version: Template::parse(&config.project_version)?,
            project_tags: config
                .project_tags
                .iter()
                .map(|tag| Template::parse(tag))
                .collect::<Result<_, _>>()?,
            parent_name: Template::parse(&config.parent_name)?,
            parent_version: Template::parse(&config.parent_version)?,
        })
    }

    fn resolve(&self, data: &Value) -> Result<(ProjectIdentity, Vec<String>), TemplateError> {
        let name = self.project_name.render(data)?;
        if name.is_empty() {
            return Err(TemplateError::EmptyValue {
                field: "project name",
            });
        }
        let version = self.project_version.render(data)?;
        if version.is_empty() {
            return Err(TemplateError::EmptyValue {
                field: "project version",
            });
        }
        let mut tags = vec![];
        for tag in &self.project_tags {
            let tag = tag.render(data)?;
            if !tag.is_empty() {
                tags.push(tag);
            }
        }
        let identity = ProjectIdentity {
            name,
            version,
            parent_name: self.parent_name.render(data)?,
            parent_version: self.parent_version.render(data)?,
        };
        Ok((identity, tags))
    }
}

impl Uploader<DependencyTrack> {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let client = DependencyTrack::new(&config.base_url, &config.api_key, config.client_timeout)
            .map_err(Error::Client)?;
        Uploader::new(Arc::new(client), config)
    }
}

impl<C> Uploader<C>
where
    C: TrackingClient + ?Sized + 'static,
{
    /// Fails when one of the configured templates does not parse.
    pub fn new(client: Arc<C>, config: &Config) -> Result<Self, Error> {
        Ok(Uploader {
            publisher: Publisher::new(
                client,
                config.upload_timeout,
                config.upload_check_interval,
            ),
            templates: Templates::parse(config)?,
        })
    }

    /// Processes one webhook payload.
    ///
    /// Anything that is not an SBOM report is skipped. Otherwise every failure
    /// aborts the run as a whole: there is no partial success and no retry.
    pub async fn run(&self, input: &[u8], cancellation: Cancellation) -> Result<RunOutcome, Error> {
        let sbom = match SbomReport::parse(input) {
            Ok(sbom) => sbom,
            Err(Error::NotSbomReport(reason)) => {
                warn!(%reason, "SKIP: not an SBOM report");
                return Ok(RunOutcome::Skipped { reason });
            }
            Err(err) => return Err(err),
        };
        if !sbom.is_verb_update() {
            return Err(Error::UnsupportedOperation(sbom.verb().to_string()));
        }

        let (identity, tags) = self.templates.resolve(&sbom.to_mapping())?;

        let is_latest = match sbom.update_timestamp_millis() {
            Some(incoming) => {
                self.publisher
                    .is_latest(&identity.name, &identity.version, incoming)
                    .await
            }
            None => {
                info!(
                    project = %identity.name,
                    version = %identity.version,
                    update_timestamp = ?sbom.update_timestamp(),
                    "No epoch update timestamp, treating BOM as latest"
                );
                true
            }
        };

        self.publisher
            .upload_bom(&identity, sbom.bom(), is_latest, cancellation)
            .await?;

        if !tags.is_empty() {
            self.publisher
                .add_tags(&identity.name, &identity.version, &tags)
                .await?;
        }

        Ok(RunOutcome::Uploaded {
            project: identity.name,
            version: identity.version,
            is_latest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencytrack::memory::MemoryTracker;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use json_diff_ng::compare_strs;
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> Config {
        Config {
            base_url: "http://dtrack.invalid".to_string(),
            api_key: "secret".to_string(),
            client_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(30),
            upload_check_interval: Duration::from_secs(1),
            project_name: "{{ .sbomReport.report.artifact.repository }}".to_string(),
            project_version: "{{ .sbomReport.report.artifact.tag }}".to_string(),
            project_tags: vec![],
            parent_name: String::new(),
            parent_version: String::new(),
        }
    }

    fn components() -> Value {
        json!({
            "bomFormat": "CycloneDX",
            "specVersion": "1.5",
            "components": [
                {"bom-ref": "pkg:deb/debian/openssl@1.1.1d", "name": "openssl", "version": "1.1.1d"},
                {"bom-ref": "pkg:deb/debian/zlib@1.2.11", "name": "zlib", "version": "1.2.11"}
            ]
        })
    }

    fn payload(verb: &str, update_timestamp: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "verb": verb,
            "operatorObject": {
                "kind": "SBOMReport",
                "metadata": {"namespace": "payments"},
                "report": {
                    "artifact": {"repository": "myproj", "tag": "v1"},
                    "components": components(),
                    "updateTimestamp": update_timestamp
                }
            }
        }))
        .unwrap()
    }

    fn uploader(tracker: &Arc<MemoryTracker>, config: &Config) -> Uploader<MemoryTracker> {
        Uploader::new(tracker.clone(), config).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_report_for_new_project() {
        let tracker = Arc::new(MemoryTracker::default());
        let outcome = uploader(&tracker, &config())
            .run(&payload("update", json!("1700000000")), Cancellation::never())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Uploaded {
                project: "myproj".to_string(),
                version: "v1".to_string(),
                is_latest: true,
            }
        );
        // one lookup by the arbiter, then lookup, create, lookup for the upload
        assert_eq!(tracker.lookups.load(Ordering::SeqCst), 3);
        let submissions = tracker.submissions.lock().unwrap();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0].is_latest);
        assert_eq!(submissions[0].project_name, "myproj");
        assert_eq!(submissions[0].project_version, "v1");

        let sent = String::from_utf8(STANDARD.decode(&submissions[0].bom).unwrap()).unwrap();
        let diffs = compare_strs(&sent, &components().to_string(), true, &[]).unwrap();
        assert!(diffs.is_empty(), "BOM diffs: {:?}", diffs);
        assert!(tracker.updates.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_older_report_is_not_latest() {
        let tracker =
            Arc::new(MemoryTracker::default().with_project("myproj", "v1", Some(1_700_000_000)));
        let uploader = uploader(&tracker, &config());

        let outcome = uploader
            .run(&payload("update", json!("1700000000")), Cancellation::never())
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Uploaded { is_latest: false, .. }));

        let outcome = uploader
            .run(&payload("update", json!("1700000001")), Cancellation::never())
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Uploaded { is_latest: true, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparsable_timestamp_defaults_to_latest() {
        let tracker =
            Arc::new(MemoryTracker::default().with_project("myproj", "v1", Some(i64::MAX)));
        let outcome = uploader(&tracker, &config())
            .run(
                &payload("update", json!("2023-11-14T22:13:20Z")),
                Cancellation::never(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Uploaded { is_latest: true, .. }));
        // only the upload looked the project up
        assert_eq!(tracker.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_update_verb_is_rejected() {
        let tracker = Arc::new(MemoryTracker::default());
        let err = uploader(&tracker, &config())
            .run(&payload("create", json!("1700000000")), Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation(ref verb) if verb == "create"));
        assert_eq!(tracker.lookups.load(Ordering::SeqCst), 0);
        assert!(tracker.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_other_reports_are_skipped() {
        let tracker = Arc::new(MemoryTracker::default());
        let input = serde_json::to_vec(&json!({
            "verb": "update",
            "operatorObject": {"kind": "VulnerabilityReport", "report": {}}
        }))
        .unwrap();
        let outcome = uploader(&tracker, &config())
            .run(&input, Cancellation::never())
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped { .. }));
        assert_eq!(tracker.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tags_are_rendered_and_applied() {
        let tracker = Arc::new(MemoryTracker::default());
        let config = Config {
            project_tags: vec![
                "kube_namespace:{{ .sbomReport.metadata.namespace }}".to_string(),
                r#"{{ .sbomReport.metadata.labels.team | default "" }}"#.to_string(),
                "scanner:trivy".to_string(),
            ],
            parent_name: "{{ .sbomReport.metadata.namespace }}".to_string(),
            ..config()
        };
        uploader(&tracker, &config)
            .run(&payload("update", Value::Null), Cancellation::never())
            .await
            .unwrap();

        let tags = tracker
            .project("myproj", "v1")
            .unwrap()
            .tags
            .into_iter()
            .map(|tag| tag.name)
            .collect::<Vec<_>>();
        assert_eq!(tags, vec!["kube_namespace:payments", "scanner:trivy"]);
        assert_eq!(
            tracker.submissions.lock().unwrap()[0].parent_name.as_deref(),
            Some("payments")
        );
    }

    #[tokio::test]
    async fn test_template_errors_abort_the_run() {
        let tracker = Arc::new(MemoryTracker::default());
        let missing = Config {
            project_version: "{{ .sbomReport.report.artifact.digest }}".to_string(),
            ..config()
        };
        let err = uploader(&tracker, &missing)
            .run(&payload("update", Value::Null), Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Template(TemplateError::MissingField { .. })));
        assert_eq!(tracker.lookups.load(Ordering::SeqCst), 0);

        let empty = Config {
            project_name: r#"{{ .sbomReport.metadata.name | default "" }}"#.to_string(),
            ..config()
        };
        let err = uploader(&tracker, &empty)
            .run(&payload("update", Value::Null), Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Template(TemplateError::EmptyValue { .. })));
    }

    #[test]
    fn test_invalid_template_fails_construction() {
        let config = Config {
            project_tags: vec!["{{ .sbomReport.metadata.namespace".to_string()],
            ..config()
        };
        let result = Uploader::new(Arc::new(MemoryTracker::default()), &config);
        assert!(matches!(
            result,
            Err(Error::Template(TemplateError::Syntax { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_skips_tagging() {
        let tracker = Arc::new(MemoryTracker {
            fail_poll: true,
            ..MemoryTracker::default()
        });
        let config = Config {
            project_tags: vec!["scanner:trivy".to_string()],
            ..config()
        };
        let err = uploader(&tracker, &config)
            .run(&payload("update", Value::Null), Cancellation::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Poll { .. }));
        assert!(tracker.updates.lock().unwrap().is_empty());
    }
}
