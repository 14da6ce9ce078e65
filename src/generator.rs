//! Generation client: turns a brief into a publishable document.
//!
//! Prompts are assembled here and sent through a [`ChatBackend`]. Every
//! successful response is passed through [`sanitize`] before it leaves this
//! module, so callers only ever see cleaned documents.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;

use crate::errors::GenerationError;
use crate::llm::ChatBackend;
use crate::models::{Attachment, GeneratedArtifact};
use crate::sanitize::{sanitize, strip_outer_lines};

const ARTIFACT_SYSTEM_PROMPT: &str = "You are a web developer who ships single-file static sites. \
Produce only the final artifact: one complete, self-contained HTML document starting with \
<!DOCTYPE html>, with any CSS and JavaScript inline. No prose, no explanations, no Markdown \
fencing.";

const README_SYSTEM_PROMPT: &str = "You write concise, professional README.md files in Markdown. \
Include a summary, setup, usage, a short explanation of how the code works, and a license \
section naming the MIT License. Output only the Markdown.";

/// Client for the generation stage.
#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn ChatBackend>,
}

impl Generator {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Build a fresh document for `brief`.
    pub async fn generate(
        &self,
        brief: &str,
        checks: &[String],
        attachments: &[Attachment],
    ) -> Result<GeneratedArtifact, GenerationError> {
        let prompt = build_prompt(brief, checks, attachments);
        let raw = self.backend.complete(ARTIFACT_SYSTEM_PROMPT, &prompt).await?;
        Ok(GeneratedArtifact::new(sanitize(&raw)))
    }

    /// Produce a complete replacement of `existing` that satisfies `new_brief`.
    pub async fn revise(
        &self,
        new_brief: &str,
        existing: &str,
        checks: &[String],
        attachments: &[Attachment],
    ) -> Result<GeneratedArtifact, GenerationError> {
        let prompt = build_revision_prompt(new_brief, existing, checks, attachments);
        let raw = self.backend.complete(ARTIFACT_SYSTEM_PROMPT, &prompt).await?;
        Ok(GeneratedArtifact::new(sanitize(&raw)))
    }

    /// Describe a published document in a README.
    pub async fn readme(
        &self,
        task: &str,
        brief: &str,
        document: &str,
    ) -> Result<String, GenerationError> {
        let prompt = format!(
            "Write a README.md for the project '{task}'.\n\n\
             ## Brief\n{brief}\n\n\
             ## Source (index.html)\n{document}\n"
        );
        let text = self.backend.complete(README_SYSTEM_PROMPT, &prompt).await?;
        Ok(strip_markdown_fence(&text))
    }
}

/// Placeholder README written when generating one fails.
pub fn fallback_readme(task: &str, brief: &str) -> String {
    format!(
        "# {task}\n\n{brief}\n\n## Usage\n\nOpen `index.html` in a browser, or visit the \
         GitHub Pages site for this repository.\n\n## License\n\nMIT License. See `LICENSE`.\n"
    )
}

/// Compose the user message for an initial build.
pub fn build_prompt(brief: &str, checks: &[String], attachments: &[Attachment]) -> String {
    let mut prompt = format!("## Brief\n{}\n", brief.trim());
    push_checks(&mut prompt, checks);
    push_attachments(&mut prompt, attachments);
    prompt
}

/// Compose the user message for a revision. The model sees the full prior
/// document and must answer with a full replacement, never a diff.
pub fn build_revision_prompt(
    new_brief: &str,
    existing: &str,
    checks: &[String],
    attachments: &[Attachment],
) -> String {
    let mut prompt = format!(
        "## Current document\n{}\n\n## Requested changes\n{}\n",
        existing,
        new_brief.trim()
    );
    push_checks(&mut prompt, checks);
    push_attachments(&mut prompt, attachments);
    prompt.push_str(
        "\nReturn the complete updated document, not a diff. Keep every existing \
         feature unless the requested changes say otherwise.\n",
    );
    prompt
}

fn push_checks(prompt: &mut String, checks: &[String]) {
    if checks.is_empty() {
        return;
    }
    prompt.push_str("\n## The result must satisfy\n");
    for check in checks {
        prompt.push_str("- ");
        prompt.push_str(check.trim());
        prompt.push('\n');
    }
}

fn push_attachments(prompt: &mut String, attachments: &[Attachment]) {
    let mut header_written = false;
    for attachment in attachments {
        match decode_data_uri(&attachment.url) {
            Ok(text) => {
                if !header_written {
                    prompt.push_str("\n## Attachments\n");
                    header_written = true;
                }
                prompt.push_str(&format!(
                    "\n--- {} ---\n{}\n--- end {} ---\n",
                    attachment.name, text, attachment.name
                ));
            }
            Err(e) => {
                tracing::warn!(attachment = %attachment.name, error = %format!("{e:#}"), "skipping attachment");
            }
        }
    }
}

/// Decode a `data:[<mediatype>][;base64],<payload>` URI into UTF-8 text.
pub fn decode_data_uri(uri: &str) -> Result<String> {
    let rest = uri
        .strip_prefix("data:")
        .context("attachment url is not a data: URI")?;
    let (meta, payload) = rest
        .split_once(',')
        .context("data: URI has no ',' separator")?;

    let bytes = if meta.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        STANDARD
            .decode(payload.trim())
            .context("invalid base64 payload")?
    } else {
        percent_decode_str(payload).collect::<Vec<u8>>()
    };

    if bytes.is_empty() {
        bail!("data: URI payload is empty");
    }
    String::from_utf8(bytes).context("attachment is not UTF-8 text")
}

/// README responses sometimes arrive fenced as ```markdown.
fn strip_markdown_fence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") && trimmed.ends_with("```") && trimmed.len() > 3 {
        return strip_outer_lines(trimmed);
    }
    trimmed.to_string()
}
