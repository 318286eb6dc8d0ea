use image::DynamicImage;

use crate::error::EmbedError;

pub const CLIP_MODEL_ID: &str = "clip-ViT-B-32";

pub const EMBEDDING_DIMENSION: usize = 512;

/// A model that maps images and text into one shared vector space.
///
/// Ingestion and query must use the same model identity, otherwise the
/// distances between stored image vectors and query text vectors are
/// meaningless.
pub trait Embedder {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbedError>;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

#[cfg(feature = "clip")]
pub use clip::ClipEmbeddingEngine;

#[cfg(feature = "clip")]
mod clip {
    use std::io::Cursor;

    use fastembed::{
        EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
        TextEmbedding,
    };
    use image::{DynamicImage, ImageFormat};
    use log::info;

    use super::{Embedder, CLIP_MODEL_ID, EMBEDDING_DIMENSION};
    use crate::error::EmbedError;

    /// CLIP ViT-B/32, both towers.
    pub struct ClipEmbeddingEngine {
        image_model: ImageEmbedding,
        text_model: TextEmbedding,
    }

    impl ClipEmbeddingEngine {
        pub fn new() -> Result<Self, EmbedError> {
            info!("Loading CLIP model {}...", CLIP_MODEL_ID);
            let image_model = ImageEmbedding::try_new(
                ImageInitOptions::new(ImageEmbeddingModel::ClipVitB32)
                    .with_show_download_progress(true),
            )
            .map_err(|e| init_error(&e))?;
            let text_model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::ClipVitB32).with_show_download_progress(true),
            )
            .map_err(|e| init_error(&e))?;
            Ok(Self {
                image_model,
                text_model,
            })
        }
    }

    fn init_error(e: &anyhow::Error) -> EmbedError {
        EmbedError::ModelInit {
            model: CLIP_MODEL_ID.to_string(),
            message: format!("{:#}", e),
        }
    }

    fn inference_error(e: anyhow::Error) -> EmbedError {
        EmbedError::Inference {
            message: format!("{:#}", e),
        }
    }

    impl Embedder for ClipEmbeddingEngine {
        fn model_id(&self) -> &str {
            CLIP_MODEL_ID
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIMENSION
        }

        fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>, EmbedError> {
            // The model's preprocessor decodes from bytes, so hand it a lossless copy.
            let mut bytes = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .map_err(|source| EmbedError::Encode { source })?;
            let embeddings = self
                .image_model
                .embed_bytes(&[bytes.as_slice()], None)
                .map_err(inference_error)?;
            embeddings.into_iter().next().ok_or_else(|| EmbedError::EmptyOutput {
                input: format!("{}x{} image", image.width(), image.height()),
            })
        }

        fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            let embeddings = self
                .text_model
                .embed(vec![text], None)
                .map_err(inference_error)?;
            embeddings.into_iter().next().ok_or_else(|| EmbedError::EmptyOutput {
                input: format!("text '{}'", text),
            })
        }
    }
}

#[cfg(all(test, feature = "clip"))]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    #[ignore] // Downloads the CLIP model
    fn test_clip_engine_shares_one_space() -> anyhow::Result<()> {
        let engine = ClipEmbeddingEngine::new()?;
        assert_eq!(engine.dimension(), EMBEDDING_DIMENSION);

        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([200, 30, 30])));
        let image_vec = engine.embed_image(&image)?;
        let text_vec = engine.embed_text("a red square")?;
        assert_eq!(image_vec.len(), EMBEDDING_DIMENSION);
        assert_eq!(text_vec.len(), image_vec.len());
        Ok(())
    }
}
