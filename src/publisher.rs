//! Repository publisher: creates, fills and updates the published repository.
//!
//! Tracked files are always written in the same order: the entry document
//! first, then the license, then the README (which is generated from the
//! document's final content).

use std::sync::Arc;

use chrono::{Datelike, Utc};

use crate::errors::PublishError;
use crate::generator::{Generator, fallback_readme};
use crate::github::RepoHost;
use crate::models::{
    BuildJob, ENTRY_FILE, GeneratedArtifact, LICENSE_FILE, README_FILE, RepositoryHandle,
};

/// Prefix of the repository description that marks a repository as ours.
pub const MANAGED_PREFIX: &str = "pagesmith:";

pub fn managed_marker(task: &str) -> String {
    format!("{MANAGED_PREFIX}{task}")
}

/// Whether a repository description carries this task's managed marker.
pub fn is_managed(description: Option<&str>, task: &str) -> bool {
    description.is_some_and(|d| d.trim() == managed_marker(task))
}

/// A previously published site, as read back for a revision.
#[derive(Debug, Clone)]
pub struct ExistingSite {
    pub handle: RepositoryHandle,
    pub document: String,
    pub readme: String,
}

pub struct RepositoryPublisher {
    host: Arc<dyn RepoHost>,
    generator: Generator,
    license_key: String,
}

impl RepositoryPublisher {
    pub fn new(host: Arc<dyn RepoHost>, generator: Generator, license_key: &str) -> Self {
        Self {
            host,
            generator,
            license_key: license_key.to_string(),
        }
    }

    /// Create (or re-create) the repository for `job` and write every tracked file.
    ///
    /// Only the repository creation and the entry document are mandatory;
    /// license and README failures are logged and the handle is returned
    /// without them.
    pub async fn create_and_publish(
        &self,
        job: &BuildJob,
        document: &GeneratedArtifact,
    ) -> Result<RepositoryHandle, PublishError> {
        let name = job.task.as_str();

        if let Some(existing) = self.host.get_repo(name).await? {
            if !is_managed(existing.description.as_deref(), name) {
                return Err(PublishError::Unmanaged {
                    name: name.to_string(),
                });
            }
            tracing::info!(task = %name, "deleting previous repository before rebuild");
            match self.host.delete_repo(name).await {
                Ok(()) => {}
                // Someone else removed it in between; nothing left to clean up.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let repo = self.host.create_repo(name, &managed_marker(name)).await?;
        tracing::info!(task = %name, url = %repo.html_url, "repository created");

        let mut handle = RepositoryHandle {
            owner: self.host.owner().to_string(),
            name: repo.name,
            html_url: repo.html_url,
            default_branch: repo.default_branch,
            ..Default::default()
        };

        let written = self
            .host
            .put_file(name, ENTRY_FILE, document.as_str(), "Add index.html", None)
            .await?;
        handle.record_write(ENTRY_FILE, written.blob_sha, written.commit_sha);

        self.write_license(&mut handle).await;

        let readme = self
            .readme_for(&job.task, &job.brief, document.as_str(), None)
            .await;
        match self
            .host
            .put_file(name, README_FILE, &readme, "Add README.md", None)
            .await
        {
            Ok(w) => handle.record_write(README_FILE, w.blob_sha, w.commit_sha),
            Err(e) => tracing::warn!(task = %name, error = %e, "README write failed"),
        }

        Ok(handle)
    }

    /// Read back a repository created by an earlier round. The repository,
    /// the entry document and the README must all exist.
    pub async fn fetch_existing(&self, task: &str) -> Result<ExistingSite, PublishError> {
        let repo = self
            .host
            .get_repo(task)
            .await?
            .ok_or_else(|| PublishError::not_found(format!("repository {task}")))?;

        let entry = self
            .host
            .get_file(task, ENTRY_FILE)
            .await?
            .ok_or_else(|| PublishError::not_found(format!("{task}/{ENTRY_FILE}")))?;
        let readme = self
            .host
            .get_file(task, README_FILE)
            .await?
            .ok_or_else(|| PublishError::not_found(format!("{task}/{README_FILE}")))?;

        let mut handle = RepositoryHandle {
            owner: self.host.owner().to_string(),
            name: repo.name,
            html_url: repo.html_url,
            default_branch: repo.default_branch,
            ..Default::default()
        };
        handle.files.insert(ENTRY_FILE.to_string(), entry.sha);
        handle.files.insert(README_FILE.to_string(), readme.sha);

        Ok(ExistingSite {
            handle,
            document: entry.content,
            readme: readme.content,
        })
    }

    /// Overwrite the entry document and README using the recorded hashes as
    /// preconditions. A stale document hash aborts with `Conflict`; a README
    /// failure is logged and leaves the updated document in place.
    pub async fn update_in_place(
        &self,
        handle: &RepositoryHandle,
        document: &GeneratedArtifact,
        readme: &str,
        round: u32,
    ) -> Result<RepositoryHandle, PublishError> {
        let name = handle.name.as_str();
        let mut updated = handle.clone();

        let doc_sha = handle
            .sha_of(ENTRY_FILE)
            .ok_or_else(|| PublishError::not_found(format!("{name}/{ENTRY_FILE}")))?;
        let written = self
            .host
            .put_file(
                name,
                ENTRY_FILE,
                document.as_str(),
                &format!("Update index.html for round {round}"),
                Some(doc_sha),
            )
            .await?;
        updated.record_write(ENTRY_FILE, written.blob_sha, written.commit_sha);

        let readme_sha = handle.sha_of(README_FILE);
        match self
            .host
            .put_file(
                name,
                README_FILE,
                readme,
                &format!("Update README.md for round {round}"),
                readme_sha,
            )
            .await
        {
            Ok(w) => updated.record_write(README_FILE, w.blob_sha, w.commit_sha),
            Err(e) => {
                tracing::warn!(task = %name, error = %e, "README update failed; document already updated")
            }
        }

        Ok(updated)
    }

    /// Generated README for a document. If generation fails, falls back to
    /// `previous` when it has content, otherwise to a placeholder.
    pub async fn readme_for(
        &self,
        task: &str,
        brief: &str,
        document: &str,
        previous: Option<&str>,
    ) -> String {
        match self.generator.readme(task, brief, document).await {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => tracing::warn!(task = %task, "README generation returned nothing"),
            Err(e) => tracing::warn!(task = %task, error = %e, "README generation failed"),
        }
        match previous {
            Some(text) if !text.trim().is_empty() => text.to_string(),
            _ => fallback_readme(task, brief),
        }
    }

    async fn write_license(&self, handle: &mut RepositoryHandle) {
        let text = match self.host.license_text(&self.license_key).await {
            Ok(body) => fill_license(&body, Utc::now().year(), &handle.owner),
            Err(e) => {
                tracing::warn!(task = %handle.name, error = %e, "license fetch failed; skipping LICENSE");
                return;
            }
        };
        match self
            .host
            .put_file(&handle.name, LICENSE_FILE, &text, "Add LICENSE", None)
            .await
        {
            Ok(w) => handle.record_write(LICENSE_FILE, w.blob_sha, w.commit_sha),
            Err(e) => tracing::warn!(task = %handle.name, error = %e, "LICENSE write failed"),
        }
    }
}

/// Fill the `[year]` and `[fullname]` placeholders GitHub's templates carry.
pub fn fill_license(template: &str, year: i32, holder: &str) -> String {
    template
        .replace("[year]", &year.to_string())
        .replace("[fullname]", holder)
}
