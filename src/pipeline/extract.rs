//! Text extraction: per-page text from a source PDF.
//!
//! ## Why spawn_blocking?
//!
//! lopdf parses the whole cross-reference table and content streams
//! synchronously; for scanned multi-hundred-page bundles that is real CPU
//! time. `tokio::task::spawn_blocking` keeps the async workers free while a
//! document is parsed.
//!
//! ## Failure semantics
//!
//! A page whose content streams cannot be decoded yields an *empty* page
//! text and a warning — one bad page must not lose the document, and the
//! boundary analyzer treats empty pages as image-only. Whole-document
//! failures (missing file, wrong magic bytes, corrupt xref) are fatal and
//! typed. The extractor never mutates its input and is deterministic for
//! identical inputs.

use crate::error::SplitError;
use crate::model::{PageText, SourceDocument};
use lopdf::Document;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// PDF header sentinel every accepted input must start with.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Extract per-page text from the PDF at `path`.
///
/// Returns the immutable [`SourceDocument`] record and exactly
/// `page_count` [`PageText`] entries in page order.
pub async fn extract_pages(
    path: &Path,
) -> Result<(SourceDocument, Vec<PageText>), SplitError> {
    validate_pdf_file(path)?;

    let size_bytes = std::fs::metadata(path)
        .map_err(|e| SplitError::Extraction {
            path: path.to_path_buf(),
            detail: format!("stat failed: {e}"),
        })?
        .len();

    let owned = path.to_path_buf();
    let (page_count, texts) =
        tokio::task::spawn_blocking(move || extract_pages_blocking(&owned))
            .await
            .map_err(|e| SplitError::Internal(format!("extraction task panicked: {e}")))??;

    info!(
        path = %path.display(),
        pages = page_count,
        bytes = size_bytes,
        "extracted text from source document"
    );

    Ok((
        SourceDocument {
            path: path.to_path_buf(),
            page_count,
            size_bytes,
        },
        texts,
    ))
}

/// Validate existence, readability, and the PDF magic bytes.
///
/// Checking the sentinel before handing the file to lopdf turns "trailer not
/// found" parser noise into a precise error for the common case of a
/// mis-typed path or a non-PDF file.
pub fn validate_pdf_file(path: &Path) -> Result<(), SplitError> {
    if !path.exists() {
        return Err(SplitError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            match f.read_exact(&mut magic) {
                Ok(()) if &magic == PDF_MAGIC => Ok(()),
                Ok(()) => Err(SplitError::InvalidFormat {
                    path: path.to_path_buf(),
                    magic,
                }),
                Err(_) => Err(SplitError::InvalidFormat {
                    path: path.to_path_buf(),
                    magic: [0; 4],
                }),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(SplitError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(SplitError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

/// Blocking implementation: parse the document and walk its pages.
fn extract_pages_blocking(path: &PathBuf) -> Result<(usize, Vec<PageText>), SplitError> {
    let doc = Document::load(path).map_err(|e| SplitError::Extraction {
        path: path.clone(),
        detail: e.to_string(),
    })?;

    let pages = doc.get_pages();
    let page_count = pages.len();
    let mut texts = Vec::with_capacity(page_count);
    let mut failed_pages = 0usize;

    for (&page_no, _) in pages.iter() {
        let text = match doc.extract_text(&[page_no]) {
            Ok(t) => t,
            Err(e) => {
                debug!(page = page_no, error = %e, "page text extraction failed");
                failed_pages += 1;
                String::new()
            }
        };
        texts.push(PageText {
            index: page_no as usize,
            text,
        });
    }

    if failed_pages > 0 {
        warn!(
            failed_pages,
            total = page_count,
            "some pages produced no text (image-only or undecodable)"
        );
    }

    texts.sort_by_key(|p| p.index);
    Ok((page_count, texts))
}
