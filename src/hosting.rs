//! Static hosting activation (GitHub Pages).

use std::sync::Arc;

use crate::errors::HostingError;
use crate::github::RepoHost;
use crate::models::RepositoryHandle;

/// Site root path served by Pages.
const PAGES_PATH: &str = "/";
const CREATED: u16 = 201;

/// Public URL of a repository's Pages site. Pure; used by both workflows.
pub fn pages_url(owner: &str, repo: &str) -> String {
    format!("https://{}.github.io/{}/", owner.to_lowercase(), repo)
}

pub struct HostingActivator {
    host: Arc<dyn RepoHost>,
}

impl HostingActivator {
    pub fn new(host: Arc<dyn RepoHost>) -> Self {
        Self { host }
    }

    /// Enable Pages on the handle's default branch at the root path.
    ///
    /// A single request, no retry: 201 is the only success. Anything else
    /// points at a configuration problem the operator has to fix.
    pub async fn activate(&self, handle: &RepositoryHandle) -> Result<String, HostingError> {
        let resp = self
            .host
            .enable_pages(&handle.name, &handle.default_branch, PAGES_PATH)
            .await?;

        if resp.status != CREATED {
            return Err(HostingError::UnexpectedStatus {
                repo: handle.name.clone(),
                status: resp.status,
                body: resp.body,
            });
        }

        let url = pages_url(&handle.owner, &handle.name);
        tracing::info!(task = %handle.name, pages_url = %url, "hosting enabled");
        Ok(url)
    }
}
