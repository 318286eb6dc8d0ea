use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use log::error;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::query::{parse_item_id, QueryResult};
use crate::search::data_loader::Dataset;

const PREVIEW_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions<'a> {
    /// Source dataset, used to resolve each result back to its image
    pub dataset: Option<&'a Dataset>,
    /// Where thumbnails are written; requires `dataset`
    pub preview_dir: Option<&'a Path>,
    /// Position of the query in a batch, used in preview file names
    pub query_number: usize,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub shown: usize,
    pub skipped: usize,
    pub previews: Vec<PathBuf>,
}

pub fn format_similarity(distance: Option<f32>) -> String {
    match distance {
        Some(d) => format!("{:.4}", 1.0 - d),
        None => "N/A".to_string(),
    }
}

/// Prints ranked results. A result that cannot be resolved to a dataset
/// record, or whose image cannot be loaded, is logged and skipped.
pub fn display_results<W: Write>(
    out: &mut W,
    results: &[QueryResult],
    options: &RenderOptions<'_>,
) -> io::Result<RenderSummary> {
    let mut summary = RenderSummary::default();
    if results.is_empty() {
        writeln!(out, "No results found.")?;
        return Ok(summary);
    }

    writeln!(out, "\nFound {} relevant images:", results.len())?;
    writeln!(out, "{}", "=".repeat(50))?;

    if let (Some(dir), Some(_)) = (options.preview_dir, options.dataset) {
        std::fs::create_dir_all(dir)?;
    }

    for (rank, result) in results.iter().enumerate() {
        let Some(index) = result.source_index() else {
            error!(
                "Error processing result {}: cannot resolve a dataset index from id '{}'",
                rank + 1,
                result.id
            );
            summary.skipped += 1;
            continue;
        };

        let image = match options.dataset {
            Some(dataset) => match load_record_image(dataset, index) {
                Ok(image) => Some(image),
                Err(e) => {
                    error!("Error displaying result {} ({}): {:#}", rank + 1, result.id, e);
                    summary.skipped += 1;
                    continue;
                }
            },
            None => None,
        };

        writeln!(out, "Result #{}:", rank + 1)?;
        writeln!(out, "  Image ID: {} (Index: {})", result.id, index)?;
        writeln!(out, "  Similarity Score: {}", format_similarity(result.distance))?;
        writeln!(out, "  Metadata: {}", format_metadata(result))?;

        if let (Some(image), Some(dir)) = (image, options.preview_dir) {
            let file = dir.join(format!(
                "q{}_r{}_{}.png",
                options.query_number,
                rank + 1,
                result.id
            ));
            match image.thumbnail(PREVIEW_SIZE, PREVIEW_SIZE).save(&file) {
                Ok(()) => {
                    writeln!(out, "  Preview: {}", file.display())?;
                    summary.previews.push(file);
                }
                Err(e) => error!("Error writing preview {:?}: {}", file, e),
            }
        }

        writeln!(out, "{}", "-".repeat(50))?;
        summary.shown += 1;
    }
    Ok(summary)
}

fn format_metadata(result: &QueryResult) -> String {
    match result.image_metadata() {
        Some(m) => format!(
            "{{source_id: {}, width: {}, height: {}}}",
            m.source_id, m.width, m.height
        ),
        None => serde_json::to_string(&result.metadata).unwrap_or_else(|_| "{}".to_string()),
    }
}

fn load_record_image(dataset: &Dataset, index: usize) -> Result<DynamicImage> {
    let record = dataset
        .get(index)
        .ok_or_else(|| anyhow!("index {} is out of range (dataset has {} records)", index, dataset.len()))?;
    Ok(record.decode_image()?)
}

/// Resolves `image_<n>` to its dataset record and writes the image to `out`.
pub fn export_record_image(dataset: &Dataset, id: &str, out: &Path) -> Result<(u32, u32)> {
    let index = parse_item_id(id).ok_or_else(|| anyhow!("Invalid image ID format: '{}'", id))?;
    let image = load_record_image(dataset, index)?;
    image
        .save(out)
        .with_context(|| format!("Failed to write image to {:?}", out))?;
    Ok((image.width(), image.height()))
}
