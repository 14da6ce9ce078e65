//! In-memory stand-ins for the three outbound services.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use pagesmith::errors::{GenerationError, PublishError};
use pagesmith::github::{FileWrite, PagesResponse, RemoteFile, RepoHost, RepoInfo};
use pagesmith::llm::ChatBackend;
use pagesmith::models::{BuildJob, JobRequest, NotificationPayload};
use pagesmith::notify::{CallbackSink, RetryPolicy};
use pagesmith::orchestrator::{Pipeline, PipelineDeps};

pub const OWNER: &str = "octo";
pub const MIT_TEMPLATE: &str = "MIT License\n\nCopyright (c) [year] [fullname]\n";

// ── Repository host ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    sha: String,
}

#[derive(Debug, Clone)]
struct StoredRepo {
    description: Option<String>,
    files: BTreeMap<String, StoredFile>,
}

/// Host call that cancels a run while it is being served.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Trip {
    Pages,
    Write(String),
}

#[derive(Default)]
struct HostState {
    repos: HashMap<String, StoredRepo>,
    deleted: Vec<String>,
    pages_calls: Vec<(String, String, String)>,
    writes: Vec<(String, String)>,
    counter: u64,
}

impl HostState {
    fn next_id(&mut self, kind: &str) -> String {
        self.counter += 1;
        format!("{kind}-{:04}", self.counter)
    }
}

/// Repository host that enforces content-hash preconditions like the real
/// contents API.
pub struct FakeHost {
    state: Mutex<HostState>,
    pages_status: AtomicU16,
    license_fails: AtomicBool,
    create_fails: AtomicBool,
    failing_writes: Mutex<HashSet<String>>,
    stale_reads: Mutex<HashMap<String, String>>,
    trips: Mutex<Vec<(Trip, CancellationToken)>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HostState::default()),
            pages_status: AtomicU16::new(201),
            license_fails: AtomicBool::new(false),
            create_fails: AtomicBool::new(false),
            failing_writes: Mutex::new(HashSet::new()),
            stale_reads: Mutex::new(HashMap::new()),
            trips: Mutex::new(Vec::new()),
        })
    }

    pub fn set_pages_status(&self, status: u16) {
        self.pages_status.store(status, Ordering::SeqCst);
    }

    pub fn fail_license(&self) {
        self.license_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_create(&self) {
        self.create_fails.store(true, Ordering::SeqCst);
    }

    /// Every write to `path` fails with a server error.
    pub fn fail_write(&self, path: &str) {
        self.failing_writes.lock().unwrap().insert(path.to_string());
    }

    /// The next read of `path` returns the current file, after which the
    /// file is replaced with `content` as if edited concurrently.
    pub fn edit_after_read(&self, path: &str, content: &str) {
        self.stale_reads
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }

    /// Cancel `token` while the hosting request is in flight.
    pub fn cancel_during_pages(&self, token: CancellationToken) {
        self.trips.lock().unwrap().push((Trip::Pages, token));
    }

    /// Cancel `token` while a write to `path` is in flight.
    pub fn cancel_during_write(&self, path: &str, token: CancellationToken) {
        self.trips
            .lock()
            .unwrap()
            .push((Trip::Write(path.to_string()), token));
    }

    fn trip(&self, call: &Trip) {
        for (trip, token) in self.trips.lock().unwrap().iter() {
            if trip == call {
                token.cancel();
            }
        }
    }

    /// Put a repository in place as if someone had created it earlier.
    pub fn seed_repo(&self, name: &str, description: Option<&str>, files: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let mut stored = BTreeMap::new();
        for (path, content) in files {
            let sha = state.next_id("blob");
            stored.insert(
                path.to_string(),
                StoredFile {
                    content: content.to_string(),
                    sha,
                },
            );
        }
        state.repos.insert(
            name.to_string(),
            StoredRepo {
                description: description.map(str::to_string),
                files: stored,
            },
        );
    }

    /// Change a file out of band, giving it a new content hash.
    pub fn overwrite(&self, repo: &str, path: &str, content: &str) {
        let mut state = self.state.lock().unwrap();
        let sha = state.next_id("blob");
        let repo = state.repos.get_mut(repo).expect("repo exists");
        repo.files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                sha,
            },
        );
    }

    pub fn has_repo(&self, name: &str) -> bool {
        self.state.lock().unwrap().repos.contains_key(name)
    }

    pub fn repo_count(&self) -> usize {
        self.state.lock().unwrap().repos.len()
    }

    pub fn description(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(name)
            .and_then(|r| r.description.clone())
    }

    pub fn file(&self, repo: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(repo)
            .and_then(|r| r.files.get(path))
            .map(|f| f.content.clone())
    }

    pub fn sha(&self, repo: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(repo)
            .and_then(|r| r.files.get(path))
            .map(|f| f.sha.clone())
    }

    pub fn paths(&self, repo: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .repos
            .get(repo)
            .map(|r| r.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn pages_calls(&self) -> Vec<(String, String, String)> {
        self.state.lock().unwrap().pages_calls.clone()
    }

    /// Paths written, in order, as `repo/path`.
    pub fn writes(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .writes
            .iter()
            .map(|(repo, path)| format!("{repo}/{path}"))
            .collect()
    }
}

#[async_trait]
impl RepoHost for FakeHost {
    fn owner(&self) -> &str {
        OWNER
    }

    async fn get_repo(&self, name: &str) -> Result<Option<RepoInfo>, PublishError> {
        let state = self.state.lock().unwrap();
        Ok(state.repos.get(name).map(|r| repo_info(name, r)))
    }

    async fn create_repo(&self, name: &str, description: &str) -> Result<RepoInfo, PublishError> {
        if self.create_fails.load(Ordering::SeqCst) {
            return Err(PublishError::Api {
                action: "create repository".into(),
                status: 403,
                body: "Resource not accessible by integration".into(),
            });
        }
        let mut state = self.state.lock().unwrap();
        if state.repos.contains_key(name) {
            return Err(PublishError::Api {
                action: "create repository".into(),
                status: 422,
                body: "name already exists on this account".into(),
            });
        }
        let repo = StoredRepo {
            description: Some(description.to_string()),
            files: BTreeMap::new(),
        };
        let info = repo_info(name, &repo);
        state.repos.insert(name.to_string(), repo);
        Ok(info)
    }

    async fn delete_repo(&self, name: &str) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        if state.repos.remove(name).is_none() {
            return Err(PublishError::not_found(format!("repository {name}")));
        }
        state.deleted.push(name.to_string());
        Ok(())
    }

    async fn get_file(&self, repo: &str, path: &str) -> Result<Option<RemoteFile>, PublishError> {
        let file = {
            let state = self.state.lock().unwrap();
            let stored = state
                .repos
                .get(repo)
                .ok_or_else(|| PublishError::not_found(format!("repository {repo}")))?;
            stored.files.get(path).map(|f| RemoteFile {
                path: path.to_string(),
                sha: f.sha.clone(),
                content: f.content.clone(),
            })
        };
        let edit = self.stale_reads.lock().unwrap().remove(path);
        if let Some(content) = edit {
            self.overwrite(repo, path, &content);
        }
        Ok(file)
    }

    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        _message: &str,
        sha: Option<&str>,
    ) -> Result<FileWrite, PublishError> {
        self.trip(&Trip::Write(path.to_string()));
        if self.failing_writes.lock().unwrap().contains(path) {
            return Err(PublishError::Api {
                action: format!("write {path}"),
                status: 500,
                body: "internal error".into(),
            });
        }
        let mut state = self.state.lock().unwrap();
        let current = state
            .repos
            .get(repo)
            .ok_or_else(|| PublishError::not_found(format!("repository {repo}")))?
            .files
            .get(path)
            .map(|f| f.sha.clone());

        match (current.as_deref(), sha) {
            (Some(_), None) => {
                return Err(PublishError::Api {
                    action: format!("write {path}"),
                    status: 422,
                    body: "\"sha\" wasn't supplied".into(),
                });
            }
            (current, Some(given)) if current != Some(given) => {
                return Err(PublishError::Conflict {
                    path: path.to_string(),
                    sha: given.to_string(),
                });
            }
            _ => {}
        }

        let blob_sha = state.next_id("blob");
        let commit_sha = state.next_id("commit");
        state.writes.push((repo.to_string(), path.to_string()));
        if let Some(stored) = state.repos.get_mut(repo) {
            stored.files.insert(
                path.to_string(),
                StoredFile {
                    content: content.to_string(),
                    sha: blob_sha.clone(),
                },
            );
        }
        Ok(FileWrite {
            blob_sha,
            commit_sha,
        })
    }

    async fn enable_pages(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<PagesResponse, PublishError> {
        self.trip(&Trip::Pages);
        let mut state = self.state.lock().unwrap();
        state
            .pages_calls
            .push((repo.to_string(), branch.to_string(), path.to_string()));
        let status = self.pages_status.load(Ordering::SeqCst);
        Ok(PagesResponse {
            status,
            body: format!("{{\"status\":{status}}}"),
        })
    }

    async fn license_text(&self, _key: &str) -> Result<String, PublishError> {
        if self.license_fails.load(Ordering::SeqCst) {
            return Err(PublishError::Api {
                action: "get license".into(),
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(MIT_TEMPLATE.to_string())
    }
}

fn repo_info(name: &str, repo: &StoredRepo) -> RepoInfo {
    RepoInfo {
        name: name.to_string(),
        full_name: format!("{OWNER}/{name}"),
        html_url: format!("https://github.com/{OWNER}/{name}"),
        default_branch: "main".to_string(),
        description: repo.description.clone(),
    }
}

// ── Generation backend ────────────────────────────────────────────────

/// Chat backend answering document requests from a queue. README requests
/// are recognised by their system prompt.
pub struct FakeChat {
    documents: Mutex<VecDeque<Result<String, GenerationError>>>,
    readme_fails: AtomicBool,
    calls: Mutex<Vec<(String, String)>>,
    gate: Option<Semaphore>,
}

impl FakeChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Every call waits for a permit from [`FakeChat::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Semaphore::new(0))))
    }

    fn build(gate: Option<Semaphore>) -> Self {
        Self {
            documents: Mutex::new(VecDeque::new()),
            readme_fails: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            gate,
        }
    }

    pub fn push_document(&self, text: &str) {
        self.documents
            .lock()
            .unwrap()
            .push_back(Ok(text.to_string()));
    }

    pub fn push_error(&self, err: GenerationError) {
        self.documents.lock().unwrap().push_back(Err(err));
    }

    pub fn fail_readme(&self) {
        self.readme_fails.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    /// User messages sent for documents (README requests excluded).
    pub fn document_prompts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(system, _)| !system.contains("README"))
            .map(|(_, user)| user.clone())
            .collect()
    }
}

#[async_trait]
impl ChatBackend for FakeChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, GenerationError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        self.calls
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));

        if system.contains("README") {
            if self.readme_fails.load(Ordering::SeqCst) {
                return Err(GenerationError::Service {
                    status: 500,
                    body: "readme backend down".into(),
                });
            }
            return Ok("# Generated README\n\nDescribes the site.".to_string());
        }

        self.documents
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("<!DOCTYPE html><html><body>default</body></html>".to_string()))
    }
}

// ── Callback sink ─────────────────────────────────────────────────────

/// Records every POST and answers with scripted statuses (200 once the
/// script runs out).
pub struct RecordingSink {
    statuses: Mutex<VecDeque<u16>>,
    fallback: AtomicU16,
    posts: Mutex<Vec<(String, NotificationPayload)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(VecDeque::new()),
            fallback: AtomicU16::new(200),
            posts: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, statuses: &[u16]) {
        self.statuses.lock().unwrap().extend(statuses);
    }

    pub fn always(&self, status: u16) {
        self.fallback.store(status, Ordering::SeqCst);
    }

    pub fn posts(&self) -> Vec<(String, NotificationPayload)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackSink for RecordingSink {
    async fn post(&self, url: &str, payload: &NotificationPayload) -> Result<u16> {
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));
        let scripted = self.statuses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.fallback.load(Ordering::SeqCst)))
    }
}

// ── Builders ──────────────────────────────────────────────────────────

pub struct Fakes {
    pub host: Arc<FakeHost>,
    pub chat: Arc<FakeChat>,
    pub sink: Arc<RecordingSink>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::with_chat(FakeChat::new())
    }

    pub fn with_chat(chat: Arc<FakeChat>) -> Self {
        Self {
            host: FakeHost::new(),
            chat,
            sink: RecordingSink::new(),
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(PipelineDeps {
            chat: self.chat.clone(),
            repo_host: self.host.clone(),
            callback: self.sink.clone(),
            retry: RetryPolicy {
                max_attempts: 4,
                base_delay: Duration::from_millis(1),
            },
            license_key: "mit".to_string(),
        })
    }
}

pub fn request(task: &str, round: u32, brief: &str) -> JobRequest {
    serde_json::from_value(request_json(task, round, brief, "s3cret")).unwrap()
}

pub fn job(task: &str, round: u32, brief: &str) -> BuildJob {
    request(task, round, brief).into_job().unwrap()
}

pub fn request_json(task: &str, round: u32, brief: &str, secret: &str) -> serde_json::Value {
    serde_json::json!({
        "email": "student@example.com",
        "secret": secret,
        "task": task,
        "round": round,
        "nonce": format!("nonce-{task}-{round}"),
        "brief": brief,
        "checks": ["Page has a heading", "Uses no external scripts"],
        "evaluation_url": "https://eval.example.com/notify",
        "attachments": [],
    })
}
