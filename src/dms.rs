//! DMS client: query, download, upload, and tag documents in a
//! paperless-style document-management service.
//!
//! ## Shape
//!
//! One client instance per process, shared by every batch worker: it owns
//! the pooled HTTP connections, the auth token, and the name-resolution
//! cache. All endpoints are authenticated with the `Authorization: Token`
//! header; per-call deadlines come from the configured query/upload/download
//! timeouts — never unlimited.
//!
//! ## Name resolution (get-or-create)
//!
//! Tags, correspondents, document types, and storage paths are configured by
//! name but referenced by id on the wire. Resolution is uniform: search by
//! case-insensitive exact name, create on an empty result, and cache the id
//! by `(kind, lowercased name)` for the rest of the run. The cache is
//! single-writer behind one mutex.
//!
//! ## Upload outcomes
//!
//! The document-post endpoint answers two ways depending on server
//! configuration: a document object (synchronous index) or a bare task id
//! string (queued ingest). That duality is a tagged [`UploadOutcome`];
//! callers that need the document id for tagging poll the task via
//! [`DmsClient::wait_for_task`] with an explicit deadline.

use crate::config::{DmsInputOptions, DmsOptions};
use crate::error::SplitError;
use crate::model::{DmsDocumentRef, UploadOutcome};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Server-side page size cap enforced on every query.
const MAX_PAGE_SIZE: usize = 100;

/// How often a queued upload task is polled.
const TASK_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ── Entities ─────────────────────────────────────────────────────────────

/// Named-entity collections that support list-by-name and create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Tag,
    Correspondent,
    DocumentType,
    StoragePath,
}

impl EntityKind {
    fn endpoint(self) -> &'static str {
        match self {
            EntityKind::Tag => "tags",
            EntityKind::Correspondent => "correspondents",
            EntityKind::DocumentType => "document_types",
            EntityKind::StoragePath => "storage_paths",
        }
    }
}

// ── Requests and results ─────────────────────────────────────────────────

/// Filters for document queries. All fields combine conjunctively.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilters {
    /// Tag names; resolved to ids before querying.
    pub tags: Vec<String>,
    pub correspondent: Option<String>,
    pub document_type: Option<String>,
    /// Substring match on the title.
    pub title_contains: Option<String>,
    /// Created-date range, inclusive.
    pub created_from: Option<chrono::NaiveDate>,
    pub created_to: Option<chrono::NaiveDate>,
    /// Requested page size; capped at [`MAX_PAGE_SIZE`].
    pub page_size: usize,
}

/// Metadata for a document upload.
#[derive(Debug, Clone, Default)]
pub struct DocumentUpload {
    pub title: String,
    pub tags: Vec<String>,
    pub correspondent: Option<String>,
    pub document_type: Option<String>,
    pub storage_path: Option<String>,
}

/// Result of a best-effort batch download.
#[derive(Debug, Clone, Default)]
pub struct BatchDownload {
    pub downloaded: Vec<(u64, PathBuf)>,
    pub failures: Vec<(u64, String)>,
}

impl BatchDownload {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of marking an input document processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The named tag was applied (or removed, for the remove policy).
    Applied(String),
    /// Input tagging is disabled or unconfigured; nothing was done.
    Skipped(&'static str),
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    id: u64,
    title: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    original_file_name: Option<String>,
    #[serde(default)]
    tags: Vec<u64>,
    #[serde(default)]
    correspondent: Option<u64>,
    #[serde(default)]
    document_type: Option<u64>,
    #[serde(default)]
    storage_path: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    status: String,
    #[serde(default)]
    related_document: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<String>,
}

// ── Client ───────────────────────────────────────────────────────────────

/// Client for a paperless-style DMS.
#[derive(Debug)]
pub struct DmsClient {
    query_client: reqwest::Client,
    upload_client: reqwest::Client,
    download_client: reqwest::Client,
    base_url: String,
    name_cache: Mutex<HashMap<(EntityKind, String), u64>>,
}

impl DmsClient {
    /// Build a client from DMS options. Fails with [`SplitError::DmsDisabled`]
    /// when the integration is off or missing its transport settings.
    pub fn new(options: &DmsOptions) -> Result<Self, SplitError> {
        let (base_url, token) = match (&options.base_url, &options.token) {
            (Some(url), Some(token)) if options.enabled => (url.clone(), token.clone()),
            _ => return Err(SplitError::DmsDisabled),
        };

        let auth = {
            let mut headers = reqwest::header::HeaderMap::new();
            let mut value =
                reqwest::header::HeaderValue::from_str(&format!("Token {token}"))
                    .map_err(|_| SplitError::Config("DMS token contains invalid header characters".into()))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
            headers
        };

        let build = |timeout_secs: u64| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs))
                .default_headers(auth.clone())
                .build()
                .expect("reqwest client construction cannot fail with static options")
        };

        Ok(Self {
            query_client: build(options.query_timeout_secs),
            upload_client: build(options.upload_timeout_secs),
            download_client: build(options.download_timeout_secs),
            base_url: base_url.trim_end_matches('/').to_string(),
            name_cache: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    // ── Connection ───────────────────────────────────────────────────────

    /// Any authenticated read succeeding proves the transport and token.
    pub async fn test_connection(&self) -> Result<(), SplitError> {
        let response = self
            .query_client
            .get(self.url("documents/"))
            .query(&[("page_size", "1")])
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            info!("DMS connection test succeeded");
            Ok(())
        } else {
            Err(status_error(status, "connection test failed"))
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Query documents with the given filters, constrained to PDFs.
    pub async fn query_documents(
        &self,
        filters: &DocumentFilters,
    ) -> Result<Vec<DmsDocumentRef>, SplitError> {
        let mut params: Vec<(String, String)> = Vec::new();
        let page_size = if filters.page_size == 0 {
            MAX_PAGE_SIZE
        } else {
            filters.page_size.min(MAX_PAGE_SIZE)
        };
        params.push(("page_size".into(), page_size.to_string()));

        if !filters.tags.is_empty() {
            let mut ids = Vec::with_capacity(filters.tags.len());
            for name in &filters.tags {
                ids.push(self.get_or_create(EntityKind::Tag, name).await?);
            }
            let joined = ids
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            params.push(("tags__id__in".into(), joined));
        }
        if let Some(ref name) = filters.correspondent {
            let id = self.get_or_create(EntityKind::Correspondent, name).await?;
            params.push(("correspondent__id".into(), id.to_string()));
        }
        if let Some(ref name) = filters.document_type {
            let id = self.get_or_create(EntityKind::DocumentType, name).await?;
            params.push(("document_type__id".into(), id.to_string()));
        }
        if let Some(ref title) = filters.title_contains {
            params.push(("title__icontains".into(), title.clone()));
        }
        if let Some(from) = filters.created_from {
            params.push(("created__date__gte".into(), from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = filters.created_to {
            params.push(("created__date__lte".into(), to.format("%Y-%m-%d").to_string()));
        }

        let response = self
            .query_client
            .get(self.url("documents/"))
            .query(&params)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "document query failed"));
        }

        let list: ListResponse<WireDocument> = response
            .json()
            .await
            .map_err(|e| SplitError::Dms {
                message: format!("malformed document list: {e}"),
                status: None,
                retryable: false,
            })?;

        let documents: Vec<DmsDocumentRef> = list
            .results
            .into_iter()
            .filter(is_pdf_document)
            .map(|w| DmsDocumentRef {
                id: w.id,
                title: w.title,
                content_type: w.content_type,
                tags: w.tags,
                correspondent: w.correspondent,
                document_type: w.document_type,
                storage_path: w.storage_path,
            })
            .collect();

        debug!(count = documents.len(), "document query returned");
        Ok(documents)
    }

    /// Documents carrying all of the given tags.
    pub async fn query_by_tags(
        &self,
        tags: &[String],
    ) -> Result<Vec<DmsDocumentRef>, SplitError> {
        self.query_documents(&DocumentFilters {
            tags: tags.to_vec(),
            ..DocumentFilters::default()
        })
        .await
    }

    /// Documents from the given correspondent.
    pub async fn query_by_correspondent(
        &self,
        name: &str,
    ) -> Result<Vec<DmsDocumentRef>, SplitError> {
        self.query_documents(&DocumentFilters {
            correspondent: Some(name.to_string()),
            ..DocumentFilters::default()
        })
        .await
    }

    /// Documents of the given document type.
    pub async fn query_by_document_type(
        &self,
        name: &str,
    ) -> Result<Vec<DmsDocumentRef>, SplitError> {
        self.query_documents(&DocumentFilters {
            document_type: Some(name.to_string()),
            ..DocumentFilters::default()
        })
        .await
    }

    /// Fetch one document's current representation.
    pub async fn get_document(&self, id: u64) -> Result<DmsDocumentRef, SplitError> {
        let response = self
            .query_client
            .get(self.url(&format!("documents/{id}/")))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &format!("document {id} fetch failed")));
        }
        let w: WireDocument = response.json().await.map_err(|e| SplitError::Dms {
            message: format!("malformed document detail: {e}"),
            status: None,
            retryable: false,
        })?;
        Ok(DmsDocumentRef {
            id: w.id,
            title: w.title,
            content_type: w.content_type,
            tags: w.tags,
            correspondent: w.correspondent,
            document_type: w.document_type,
            storage_path: w.storage_path,
        })
    }

    // ── Downloads ────────────────────────────────────────────────────────

    /// Download a document's binary into `destination`, atomically.
    pub async fn download_document(
        &self,
        id: u64,
        destination: &Path,
    ) -> Result<(), SplitError> {
        let response = self
            .download_client
            .get(self.url(&format!("documents/{id}/download/")))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &format!("download of document {id} failed")));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
            return Err(SplitError::Dms {
                message: format!("document {id} download is not a PDF"),
                status: None,
                retryable: false,
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SplitError::OutputWrite {
                    path: destination.to_path_buf(),
                    source: e,
                })?;
        }
        let tmp = destination.with_extension("pdf.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| SplitError::OutputWrite {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, destination)
            .await
            .map_err(|e| SplitError::OutputWrite {
                path: destination.to_path_buf(),
                source: e,
            })?;

        debug!(id, dest = %destination.display(), bytes = bytes.len(), "downloaded document");
        Ok(())
    }

    /// Best-effort batch download into `dir`; per-document failures are
    /// collected, not propagated.
    pub async fn download_multiple(&self, ids: &[u64], dir: &Path) -> BatchDownload {
        let mut batch = BatchDownload::default();
        for &id in ids {
            let dest = dir.join(format!("document-{id}.pdf"));
            match self.download_document(id, &dest).await {
                Ok(()) => batch.downloaded.push((id, dest)),
                Err(e) => {
                    warn!(id, error = %e, "batch download: document failed");
                    batch.failures.push((id, e.to_string()));
                }
            }
        }
        batch
    }

    // ── Uploads ──────────────────────────────────────────────────────────

    /// Upload a PDF with resolved metadata. Returns the tagged outcome.
    pub async fn upload_document(
        &self,
        path: &Path,
        upload: &DocumentUpload,
    ) -> Result<UploadOutcome, SplitError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| SplitError::Dms {
            message: format!("cannot read upload source '{}': {e}", path.display()),
            status: None,
            retryable: false,
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "statement.pdf".to_string());

        let mut form = reqwest::multipart::Form::new()
            .text("title", upload.title.clone())
            .part(
                "document",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(filename)
                    .mime_str("application/pdf")
                    .map_err(|e| SplitError::Internal(format!("mime: {e}")))?,
            );

        for name in &upload.tags {
            let id = self.get_or_create(EntityKind::Tag, name).await?;
            form = form.text("tags", id.to_string());
        }
        if let Some(ref name) = upload.correspondent {
            let id = self.get_or_create(EntityKind::Correspondent, name).await?;
            form = form.text("correspondent", id.to_string());
        }
        if let Some(ref name) = upload.document_type {
            let id = self.get_or_create(EntityKind::DocumentType, name).await?;
            form = form.text("document_type", id.to_string());
        }
        if let Some(ref name) = upload.storage_path {
            let id = self.get_or_create(EntityKind::StoragePath, name).await?;
            form = form.text("storage_path", id.to_string());
        }

        let response = self
            .upload_client
            .post(self.url("documents/post_document/"))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, "upload failed"));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| SplitError::Dms {
            message: format!("malformed upload response: {e}"),
            status: None,
            retryable: false,
        })?;

        let outcome = match &body {
            serde_json::Value::String(task_id) => UploadOutcome::Queued(task_id.clone()),
            serde_json::Value::Number(n) => UploadOutcome::Immediate(
                n.as_u64().ok_or_else(|| malformed_upload(&body))?,
            ),
            serde_json::Value::Object(map) => match map.get("id").and_then(|v| v.as_u64()) {
                Some(id) => UploadOutcome::Immediate(id),
                None => return Err(malformed_upload(&body)),
            },
            _ => return Err(malformed_upload(&body)),
        };

        info!(title = %upload.title, ?outcome, "uploaded document");
        Ok(outcome)
    }

    /// Poll a queued ingest task until it produces a document id, fails, or
    /// the deadline passes. `Ok(None)` means the task succeeded without
    /// reporting a document id (older servers).
    pub async fn wait_for_task(
        &self,
        task_id: &str,
        deadline: Duration,
    ) -> Result<Option<u64>, SplitError> {
        let started = std::time::Instant::now();

        loop {
            if started.elapsed() > deadline {
                return Err(SplitError::Dms {
                    message: format!("task {task_id} did not finish within {deadline:?}"),
                    status: None,
                    retryable: false,
                });
            }

            let response = self
                .query_client
                .get(self.url("tasks/"))
                .query(&[("task_id", task_id)])
                .send()
                .await
                .map_err(transport_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(status_error(status, "task poll failed"));
            }

            let tasks: Vec<WireTask> = response.json().await.map_err(|e| SplitError::Dms {
                message: format!("malformed task response: {e}"),
                status: None,
                retryable: false,
            })?;

            if let Some(task) = tasks.first() {
                match task.status.as_str() {
                    "SUCCESS" => {
                        let id = task
                            .related_document
                            .as_ref()
                            .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()));
                        return Ok(id);
                    }
                    "FAILURE" => {
                        return Err(SplitError::Dms {
                            message: format!(
                                "task {task_id} failed: {}",
                                task.result.as_deref().unwrap_or("no detail")
                            ),
                            status: None,
                            retryable: false,
                        })
                    }
                    _ => {}
                }
            }

            tokio::time::sleep(TASK_POLL_INTERVAL).await;
        }
    }

    // ── Tagging ──────────────────────────────────────────────────────────

    /// Merge the named tags into a document's tag set, preserving existing
    /// tags.
    pub async fn apply_tags(&self, id: u64, tag_names: &[String]) -> Result<(), SplitError> {
        let mut tag_ids = Vec::with_capacity(tag_names.len());
        for name in tag_names {
            tag_ids.push(self.get_or_create(EntityKind::Tag, name).await?);
        }

        let current = self.get_document(id).await?;
        let mut merged = current.tags;
        for tag in tag_ids {
            if !merged.contains(&tag) {
                merged.push(tag);
            }
        }

        self.patch_tags(id, &merged).await
    }

    /// Remove one named tag from a document, leaving the rest untouched.
    pub async fn remove_tag(&self, id: u64, tag_name: &str) -> Result<(), SplitError> {
        let tag_id = self.get_or_create(EntityKind::Tag, tag_name).await?;
        let current = self.get_document(id).await?;
        let remaining: Vec<u64> = current.tags.into_iter().filter(|t| *t != tag_id).collect();
        self.patch_tags(id, &remaining).await
    }

    async fn patch_tags(&self, id: u64, tags: &[u64]) -> Result<(), SplitError> {
        let response = self
            .query_client
            .patch(self.url(&format!("documents/{id}/")))
            .json(&json!({ "tags": tags }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            debug!(id, ?tags, "patched document tags");
            Ok(())
        } else {
            Err(status_error(status, &format!("tag update of document {id} failed")))
        }
    }

    /// Add one named tag to many documents via the bulk-edit endpoint.
    pub async fn bulk_add_tag(&self, ids: &[u64], tag_name: &str) -> Result<(), SplitError> {
        if ids.is_empty() {
            return Ok(());
        }
        let tag_id = self.get_or_create(EntityKind::Tag, tag_name).await?;
        let response = self
            .query_client
            .post(self.url("documents/bulk_edit/"))
            .json(&json!({
                "documents": ids,
                "method": "modify_tags",
                "parameters": { "add_tags": [tag_id], "remove_tags": [] },
            }))
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(status_error(status, "bulk tag edit failed"))
        }
    }

    /// Apply the configured post-processing policy to an input document.
    pub async fn mark_input_processed(
        &self,
        id: u64,
        input: &DmsInputOptions,
    ) -> Result<MarkOutcome, SplitError> {
        if !input.tagging_enabled {
            return Ok(MarkOutcome::Skipped("input tagging disabled"));
        }

        // Custom processing tag takes precedence, then tag removal, then the
        // plain processed tag.
        if let Some(ref tag) = input.processing_tag {
            self.apply_tags(id, std::slice::from_ref(tag)).await?;
            return Ok(MarkOutcome::Applied(tag.clone()));
        }
        if input.remove_unprocessed_tag {
            let tag = input.unprocessed_tag.as_deref().unwrap_or("unprocessed");
            self.remove_tag(id, tag).await?;
            return Ok(MarkOutcome::Applied(tag.to_string()));
        }
        if let Some(ref tag) = input.processed_tag {
            self.apply_tags(id, std::slice::from_ref(tag)).await?;
            return Ok(MarkOutcome::Applied(tag.clone()));
        }

        Ok(MarkOutcome::Skipped("no input tagging configured"))
    }

    // ── Name resolution ──────────────────────────────────────────────────

    /// Resolve a named entity to its id, creating it when absent. Cached per
    /// run by `(kind, lowercased name)`.
    pub async fn get_or_create(
        &self,
        kind: EntityKind,
        name: &str,
    ) -> Result<u64, SplitError> {
        let key = (kind, name.to_lowercase());
        if let Some(&id) = self
            .name_cache
            .lock()
            .expect("name cache mutex poisoned")
            .get(&key)
        {
            return Ok(id);
        }

        let endpoint = kind.endpoint();
        let response = self
            .query_client
            .get(self.url(&format!("{endpoint}/")))
            .query(&[("name__iexact", name)])
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &format!("{endpoint} lookup failed")));
        }

        let list: ListResponse<NamedEntity> =
            response.json().await.map_err(|e| SplitError::Dms {
                message: format!("malformed {endpoint} list: {e}"),
                status: None,
                retryable: false,
            })?;

        let id = match list.results.first() {
            Some(entity) => {
                debug!(kind = ?kind, name, id = entity.id, "resolved existing entity");
                entity.id
            }
            None => {
                let body = match kind {
                    // Storage paths need a filesystem pattern alongside the
                    // name.
                    EntityKind::StoragePath => json!({
                        "name": name,
                        "path": format!("/{}/", name.to_lowercase().replace(' ', "_")),
                    }),
                    _ => json!({ "name": name }),
                };
                let response = self
                    .query_client
                    .post(self.url(&format!("{endpoint}/")))
                    .json(&body)
                    .send()
                    .await
                    .map_err(transport_error)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(status_error(status, &format!("{endpoint} create failed")));
                }
                let created: NamedEntity =
                    response.json().await.map_err(|e| SplitError::Dms {
                        message: format!("malformed {endpoint} create response: {e}"),
                        status: None,
                        retryable: false,
                    })?;
                info!(kind = ?kind, name, id = created.id, "created entity");
                created.id
            }
        };

        self.name_cache
            .lock()
            .expect("name cache mutex poisoned")
            .insert(key, id);
        Ok(id)
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────

/// PDF filter: by MIME when the server reports it, by filename extension
/// otherwise.
fn is_pdf_document(doc: &WireDocument) -> bool {
    if let Some(ref ct) = doc.content_type {
        return ct.starts_with("application/pdf");
    }
    if let Some(ref name) = doc.original_file_name {
        return name.to_lowercase().ends_with(".pdf");
    }
    doc.title.to_lowercase().ends_with(".pdf") || doc.original_file_name.is_none()
}

fn transport_error(e: reqwest::Error) -> SplitError {
    SplitError::Dms {
        message: format!("transport: {e}"),
        status: None,
        retryable: e.is_timeout() || e.is_connect(),
    }
}

fn status_error(status: reqwest::StatusCode, context: &str) -> SplitError {
    SplitError::Dms {
        message: context.to_string(),
        status: Some(status.as_u16()),
        retryable: status.is_server_error(),
    }
}

fn malformed_upload(body: &serde_json::Value) -> SplitError {
    SplitError::Dms {
        message: format!("unexpected upload response shape: {body}"),
        status: None,
        retryable: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DmsOptions;

    fn options(base_url: &str) -> DmsOptions {
        DmsOptions {
            enabled: true,
            base_url: Some(base_url.to_string()),
            token: Some("test-token".to_string()),
            ..DmsOptions::default()
        }
    }

    #[test]
    fn disabled_configuration_is_rejected() {
        let err = DmsClient::new(&DmsOptions::default()).unwrap_err();
        assert!(matches!(err, SplitError::DmsDisabled));

        let mut half = options("https://dms.example.com");
        half.token = None;
        assert!(matches!(DmsClient::new(&half), Err(SplitError::DmsDisabled)));
    }

    #[test]
    fn url_building_strips_trailing_slash() {
        let client = DmsClient::new(&options("https://dms.example.com/")).unwrap();
        assert_eq!(client.url("documents/"), "https://dms.example.com/api/documents/");
    }

    #[test]
    fn pdf_filter_uses_mime_then_extension() {
        let doc = |ct: Option<&str>, name: Option<&str>| WireDocument {
            id: 1,
            title: "statement".into(),
            content_type: ct.map(str::to_string),
            original_file_name: name.map(str::to_string),
            tags: vec![],
            correspondent: None,
            document_type: None,
            storage_path: None,
        };
        assert!(is_pdf_document(&doc(Some("application/pdf"), None)));
        assert!(!is_pdf_document(&doc(Some("image/png"), Some("scan.pdf"))));
        assert!(is_pdf_document(&doc(None, Some("Scan.PDF"))));
        assert!(!is_pdf_document(&doc(None, Some("notes.txt"))));
    }

    #[tokio::test]
    async fn get_or_create_caches_by_kind_and_name() {
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags/"))
            .and(query_param("name__iexact", "processed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"results": [{"id": 7, "name": "processed"}]})),
            )
            .expect(1) // the second resolve must hit the cache
            .mount(&server)
            .await;

        let client = DmsClient::new(&options(&server.uri())).unwrap();
        assert_eq!(client.get_or_create(EntityKind::Tag, "processed").await.unwrap(), 7);
        assert_eq!(client.get_or_create(EntityKind::Tag, "Processed").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn get_or_create_creates_on_empty_result() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/storage_paths/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/storage_paths/"))
            .and(body_partial_json(
                serde_json::json!({"name": "Bank Statements", "path": "/bank_statements/"}),
            ))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"id": 12, "name": "Bank Statements"})),
            )
            .mount(&server)
            .await;

        let client = DmsClient::new(&options(&server.uri())).unwrap();
        let id = client
            .get_or_create(EntityKind::StoragePath, "Bank Statements")
            .await
            .unwrap();
        assert_eq!(id, 12);
    }

    #[tokio::test]
    async fn mark_processed_policies() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"results": [{"id": 3, "name": "processed"}]})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/documents/42/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"id": 42, "title": "input.pdf", "tags": [1, 2]}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/documents/42/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = DmsClient::new(&options(&server.uri())).unwrap();

        // Disabled → skipped, no calls.
        let outcome = client
            .mark_input_processed(42, &DmsInputOptions::default())
            .await
            .unwrap();
        assert!(matches!(outcome, MarkOutcome::Skipped(_)));

        // Enabled with a processed tag → applied.
        let outcome = client
            .mark_input_processed(
                42,
                &DmsInputOptions {
                    processed_tag: Some("processed".into()),
                    tagging_enabled: true,
                    ..DmsInputOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, MarkOutcome::Applied("processed".into()));

        // Enabled but nothing configured → skipped.
        let outcome = client
            .mark_input_processed(
                42,
                &DmsInputOptions {
                    tagging_enabled: true,
                    ..DmsInputOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, MarkOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn upload_outcome_is_tagged_by_response_shape() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/documents/post_document/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!("ca6a6dc8-b434-4fcd-8436-8b2546465622")),
            )
            .mount(&server)
            .await;

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"%PDF-1.7 fake").unwrap();

        let client = DmsClient::new(&options(&server.uri())).unwrap();
        let outcome = client
            .upload_document(
                file.path(),
                &DocumentUpload {
                    title: "westpac-2819-2024-04-30".into(),
                    ..DocumentUpload::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Queued("ca6a6dc8-b434-4fcd-8436-8b2546465622".into())
        );
    }
}
