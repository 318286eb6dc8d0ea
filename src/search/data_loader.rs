use anyhow::{Context, Result};
use csv::ReaderBuilder;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::DecodeError;

// Column of the manifest that points at the image file
const IMAGE_COL: &str = "image";

/// One dataset entry. The image is only decoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub index: usize,
    pub image_path: Option<PathBuf>,
}

impl Record {
    pub fn decode_image(&self) -> Result<DynamicImage, DecodeError> {
        let path = self.image_path.as_ref().ok_or(DecodeError::Missing)?;
        image::open(path).map_err(|source| DecodeError::Unreadable {
            path: path.clone(),
            source,
        })
    }
}

/// An ordered, immutable sequence of records.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    /// Loads a dataset from a directory of images or from a CSV manifest.
    pub fn load(source: &Path) -> Result<Self> {
        if !source.exists() {
            return Err(anyhow::anyhow!("Dataset not found at: {:?}", source));
        }
        if source.is_dir() {
            Self::from_directory(source)
        } else {
            Self::from_manifest(source)
        }
    }

    fn from_directory(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk dataset directory {:?}", dir))?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        Ok(Self::from_paths(paths.into_iter().map(Some)))
    }

    fn from_manifest(csv_path: &Path) -> Result<Self> {
        let base_dir = csv_path.parent().unwrap_or_else(|| Path::new("."));
        let file = std::fs::File::open(csv_path)
            .with_context(|| format!("Failed to open dataset manifest at {:?}", csv_path))?;
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers = rdr.headers()?.clone();
        let image_idx = headers
            .iter()
            .position(|h| h.trim() == IMAGE_COL)
            .ok_or_else(|| anyhow::anyhow!("Column '{}' not found", IMAGE_COL))?;

        let mut paths = Vec::new();
        for (row_index, result) in rdr.records().enumerate() {
            let record = result.with_context(|| format!("Failed to read record at row index {}", row_index))?;
            let image = record.get(image_idx).map(str::trim).unwrap_or("");
            if image.is_empty() {
                paths.push(None);
            } else {
                paths.push(Some(base_dir.join(image)));
            }
        }
        Ok(Self::from_paths(paths))
    }

    /// Builds a dataset whose record indices follow the iteration order.
    pub fn from_paths(paths: impl IntoIterator<Item = Option<PathBuf>>) -> Self {
        let records = paths
            .into_iter()
            .enumerate()
            .map(|(index, image_path)| Record { index, image_path })
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([10, 20, 30]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_load_directory_sorted() -> Result<()> {
        let dir = TempDir::new()?;
        write_png(&dir.path().join("b.png"), 4, 3);
        write_png(&dir.path().join("a.png"), 2, 2);
        fs::create_dir(dir.path().join("nested"))?;
        fs::write(dir.path().join("nested").join("c.txt"), "not an image")?;

        let dataset = Dataset::load(dir.path())?;
        assert_eq!(dataset.len(), 3);
        let names: Vec<_> = dataset
            .iter()
            .map(|r| r.image_path.as_ref().unwrap().file_name().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "c.txt"]);
        assert_eq!(dataset.get(1).unwrap().index, 1);

        let img = dataset.get(1).unwrap().decode_image()?;
        assert_eq!((img.width(), img.height()), (4, 3));
        assert!(matches!(
            dataset.get(2).unwrap().decode_image(),
            Err(DecodeError::Unreadable { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_manifest_with_missing_images() -> Result<()> {
        let dir = TempDir::new()?;
        write_png(&dir.path().join("zero.png"), 5, 6);
        let manifest = dir.path().join("manifest.csv");
        fs::write(&manifest, "caption,image\nfirst,zero.png\nsecond,\nthird,gone.png\n")?;

        let dataset = Dataset::load(&manifest)?;
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.get(0).unwrap().image_path, Some(dir.path().join("zero.png")));
        assert!(matches!(dataset.get(1).unwrap().decode_image(), Err(DecodeError::Missing)));
        assert!(matches!(
            dataset.get(2).unwrap().decode_image(),
            Err(DecodeError::Unreadable { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_load_manifest_missing_column() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "path,caption")?;
        writeln!(file, "a.png,first")?;
        file.flush()?;

        let result = Dataset::load(file.path());
        assert!(result.unwrap_err().to_string().contains("Column 'image' not found"));
        Ok(())
    }

    #[test]
    fn test_load_dataset_not_found() {
        let result = Dataset::load(Path::new("this_dataset_does_not_exist"));
        assert!(result.unwrap_err().to_string().contains("Dataset not found"));
    }
}
