use super::{BomSubmission, ClientError, Project, TrackingClient, UploadToken};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-memory tracking service used by the unit tests.
#[derive(Default)]
pub(crate) struct MemoryTracker {
    pub projects: Mutex<Vec<Project>>,
    pub submissions: Mutex<Vec<BomSubmission>>,
    pub updates: Mutex<Vec<Project>>,
    pub lookups: AtomicUsize,
    pub creates: AtomicUsize,
    pub polls: AtomicUsize,
    /// Number of polls answering "still processing" before the token completes.
    pub busy_polls: usize,
    pub fail_lookup: bool,
    pub fail_poll: bool,
    pub panic_poll: bool,
    /// Creating fails while another writer creates the same project.
    pub racing_create: bool,
    pub fail_create: bool,
}

impl MemoryTracker {
    pub fn with_project(self, name: &str, version: &str, last_bom_import: Option<i64>) -> Self {
        self.projects.lock().unwrap().push(Project {
            uuid: Some(format!("uuid-{}-{}", name, version)),
            name: name.to_string(),
            version: version.to_string(),
            last_bom_import,
            ..Project::default()
        });
        self
    }

    pub fn project(&self, name: &str, version: &str) -> Option<Project> {
        self.projects
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name && p.version == version)
            .cloned()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn insert(&self, name: &str, version: &str) -> Project {
        let project = Project {
            uuid: Some(format!("uuid-{}-{}", name, version)),
            name: name.to_string(),
            version: version.to_string(),
            ..Project::default()
        };
        self.projects.lock().unwrap().push(project.clone());
        project
    }
}

#[async_trait]
impl TrackingClient for MemoryTracker {
    async fn lookup_project(&self, name: &str, version: &str) -> Result<Project, ClientError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup {
            return Err(ClientError::Status {
                status: 500,
                body: "lookup unavailable".to_string(),
            });
        }
        self.project(name, version).ok_or(ClientError::NotFound)
    }

    async fn create_project(&self, name: &str, version: &str) -> Result<Project, ClientError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        if self.racing_create {
            self.insert(name, version);
            return Err(ClientError::Status {
                status: 409,
                body: "project already exists".to_string(),
            });
        }
        if self.fail_create {
            return Err(ClientError::Status {
                status: 403,
                body: "forbidden".to_string(),
            });
        }
        Ok(self.insert(name, version))
    }

    async fn update_project(&self, project: &Project) -> Result<Project, ClientError> {
        self.updates.lock().unwrap().push(project.clone());
        let mut projects = self.projects.lock().unwrap();
        let stored = projects
            .iter_mut()
            .find(|p| p.uuid == project.uuid)
            .ok_or(ClientError::NotFound)?;
        *stored = project.clone();
        Ok(project.clone())
    }

    async fn submit_bom(&self, submission: &BomSubmission) -> Result<UploadToken, ClientError> {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(submission.clone());
        Ok(UploadToken(format!("token-{}", submissions.len())))
    }

    async fn is_processing(&self, _token: &UploadToken) -> Result<bool, ClientError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_poll {
            panic!("token lookup blew up");
        }
        if self.fail_poll {
            return Err(ClientError::Other("token lookup failed".to_string()));
        }
        Ok(polls <= self.busy_polls)
    }
}
