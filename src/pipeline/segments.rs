//! Segment writing: one output PDF per boundary.
//!
//! Each output is produced by cloning the parsed source document, deleting
//! every page outside the boundary's range, pruning now-unreferenced
//! objects, and saving. Cloning per boundary keeps shared resources (fonts,
//! xobjects) intact in every output; pages keep their content byte-for-byte.
//!
//! Writes are atomic: each file is staged as `<name>.pdf.tmp` in the output
//! directory and renamed into place, so a crash can never leave a
//! half-written statement that looks valid.
//!
//! Failure semantics: any single segment failure is fatal for the run. A
//! partially written output set is worse than none — the validator would
//! flag it, but the quarantine path needs the typed error to report *which*
//! segment failed.

use crate::error::SplitError;
use crate::model::{Boundary, OutputArtifact, StatementMetadata};
use crate::pipeline::filename::build_filename;
use lopdf::Document;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Write one PDF per boundary into `output_dir`. Boundaries and metadata
/// run in lockstep (index i describes statement i).
pub async fn write_segments(
    source_path: &Path,
    output_dir: &Path,
    boundaries: &[Boundary],
    metadata: &[StatementMetadata],
    max_filename_length: usize,
) -> Result<Vec<OutputArtifact>, SplitError> {
    debug_assert_eq!(boundaries.len(), metadata.len());

    std::fs::create_dir_all(output_dir).map_err(|e| SplitError::OutputWrite {
        path: output_dir.to_path_buf(),
        source: e,
    })?;

    let source_path = source_path.to_path_buf();
    let output_dir = output_dir.to_path_buf();
    let boundaries = boundaries.to_vec();
    let metadata = metadata.to_vec();

    let outputs = tokio::task::spawn_blocking(move || {
        write_segments_blocking(
            &source_path,
            &output_dir,
            &boundaries,
            &metadata,
            max_filename_length,
        )
    })
    .await
    .map_err(|e| SplitError::Internal(format!("segment task panicked: {e}")))??;

    info!(count = outputs.len(), "segment writing complete");
    Ok(outputs)
}

fn write_segments_blocking(
    source_path: &PathBuf,
    output_dir: &Path,
    boundaries: &[Boundary],
    metadata: &[StatementMetadata],
    max_filename_length: usize,
) -> Result<Vec<OutputArtifact>, SplitError> {
    let source = Document::load(source_path).map_err(|e| SplitError::Extraction {
        path: source_path.clone(),
        detail: e.to_string(),
    })?;
    let total_pages = source.get_pages().len() as u32;

    let mut outputs = Vec::with_capacity(boundaries.len());

    for (boundary, meta) in boundaries.iter().zip(metadata.iter()) {
        let filename = build_filename(boundary, meta, max_filename_length);
        let artifact = write_one_segment(
            &source,
            total_pages,
            boundary,
            &filename,
            output_dir,
        )
        .map_err(|detail| SplitError::SegmentWrite {
            filename: filename.clone(),
            detail,
        })?;
        outputs.push(artifact);
    }

    Ok(outputs)
}

/// Produce one output PDF containing exactly the boundary's page range.
fn write_one_segment(
    source: &Document,
    total_pages: u32,
    boundary: &Boundary,
    filename: &str,
    output_dir: &Path,
) -> Result<OutputArtifact, String> {
    let start = boundary.start_page as u32;
    let end = boundary.end_page as u32;
    if start < 1 || end > total_pages || start > end {
        return Err(format!(
            "page range {start}-{end} invalid for a {total_pages}-page source"
        ));
    }

    let mut doc = source.clone();
    let delete: Vec<u32> = (1..=total_pages)
        .filter(|p| *p < start || *p > end)
        .collect();
    if !delete.is_empty() {
        doc.delete_pages(&delete);
    }
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();

    let final_path = output_dir.join(filename);
    let tmp_path = output_dir.join(format!("{filename}.tmp"));

    doc.save(&tmp_path).map_err(|e| format!("save failed: {e}"))?;
    std::fs::rename(&tmp_path, &final_path).map_err(|e| {
        // Clean up the stage file so the directory never accumulates temps.
        let _ = std::fs::remove_file(&tmp_path);
        format!("rename failed: {e}")
    })?;

    let size_bytes = std::fs::metadata(&final_path)
        .map(|m| m.len())
        .map_err(|e| format!("stat failed: {e}"))?;
    let page_count = (end - start + 1) as usize;

    debug!(
        file = %final_path.display(),
        pages = page_count,
        bytes = size_bytes,
        "wrote segment"
    );

    Ok(OutputArtifact {
        path: final_path,
        filename: filename.to_string(),
        boundary: boundary.clone(),
        size_bytes,
        page_count,
    })
}
