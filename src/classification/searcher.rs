//! Zero-shot category search
//!
//! Category names are embedded once with the text encoder. Each query crop is
//! embedded with the image encoder and matched against the catalog by cosine
//! similarity.

use anyhow::{Context, Result};
use image::RgbImage;
use std::time::Instant;
use tracing::{debug, info};

use super::{Classifier, ClassifyError};

/// Turns images into embedding vectors
pub trait ImageEncoder: Send + Sync {
    /// Encode a batch of images, one embedding per image
    fn encode_batch(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>>;
}

/// Turns text into an embedding vector
pub trait TextEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// Category catalog with precomputed text embeddings
pub struct ImageSearcher {
    image_encoder: Box<dyn ImageEncoder>,
    catalog: Vec<(String, Vec<f32>)>,
}

impl ImageSearcher {
    /// Embed every category with `text_encoder`
    pub fn new(
        image_encoder: Box<dyn ImageEncoder>,
        text_encoder: &dyn TextEncoder,
        categories: &[String],
    ) -> Result<Self> {
        let start = Instant::now();

        let catalog = categories
            .iter()
            .map(|category| {
                let embedding = text_encoder
                    .encode(category)
                    .with_context(|| format!("Failed to encode category '{}'", category))?;
                Ok((category.clone(), embedding))
            })
            .collect::<Result<Vec<_>>>()?;

        let searcher = Self::from_embeddings(image_encoder, catalog)?;
        info!(
            "Encoded {} categories in {:?}",
            searcher.catalog.len(),
            start.elapsed()
        );
        Ok(searcher)
    }

    /// Build from already computed category embeddings
    pub fn from_embeddings(
        image_encoder: Box<dyn ImageEncoder>,
        catalog: Vec<(String, Vec<f32>)>,
    ) -> Result<Self> {
        if catalog.is_empty() {
            return Err(crate::config::ConfigError::EmptyCatalog.into());
        }

        Ok(Self {
            image_encoder,
            catalog,
        })
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.catalog.iter().map(|(name, _)| name.as_str())
    }

    /// Best matching category for an image embedding.
    ///
    /// The first entry wins ties.
    pub fn search_embedding(&self, embedding: &[f32]) -> Result<&str, ClassifyError> {
        let mut best: Option<(&str, f32)> = None;

        for (name, category) in &self.catalog {
            if category.len() != embedding.len() {
                return Err(ClassifyError::DimensionMismatch {
                    image: embedding.len(),
                    catalog: category.len(),
                });
            }

            let score = cosine_similarity(embedding, category);
            let score = if score.is_nan() { f32::NEG_INFINITY } else { score };

            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((name.as_str(), score)),
            }
        }

        best.map(|(name, _)| name).ok_or(ClassifyError::EmptyCatalog)
    }

    /// Embed `image` and return the closest category
    pub fn search_with_image(&self, image: &RgbImage) -> Result<String, ClassifyError> {
        let start = Instant::now();

        let embedding = self
            .image_encoder
            .encode_batch(std::slice::from_ref(image))
            .map_err(|e| ClassifyError::Inference(format!("{:#}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| ClassifyError::Inference("image encoder returned no embedding".to_string()))?;

        let category = self.search_embedding(&embedding)?.to_string();
        debug!("Category search took {:?}", start.elapsed());
        Ok(category)
    }
}

impl Classifier for ImageSearcher {
    fn classify(&self, crop: &RgbImage) -> Result<String, ClassifyError> {
        self.search_with_image(crop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes an image as its mean RGB colour
    struct MeanColorEncoder;

    impl ImageEncoder for MeanColorEncoder {
        fn encode_batch(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>> {
            Ok(images
                .iter()
                .map(|image| {
                    let mut sum = [0.0f32; 3];
                    for pixel in image.pixels() {
                        for (acc, channel) in sum.iter_mut().zip(pixel.0) {
                            *acc += channel as f32;
                        }
                    }
                    sum.to_vec()
                })
                .collect())
        }
    }

    struct ColorNameEncoder;

    impl TextEncoder for ColorNameEncoder {
        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            match text {
                "red" => Ok(vec![1.0, 0.0, 0.0]),
                "green" => Ok(vec![0.0, 1.0, 0.0]),
                "blue" => Ok(vec![0.0, 0.0, 1.0]),
                other => anyhow::bail!("unknown colour {}", other),
            }
        }
    }

    fn searcher(categories: &[&str]) -> Result<ImageSearcher> {
        let categories: Vec<String> = categories.iter().map(|c| c.to_string()).collect();
        ImageSearcher::new(Box::new(MeanColorEncoder), &ColorNameEncoder, &categories)
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_search_with_image_picks_closest() {
        let searcher = searcher(&["red", "green", "blue"]).unwrap();
        let image = RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 20]));

        assert_eq!(searcher.search_with_image(&image).unwrap(), "green");
    }

    #[test]
    fn test_ties_go_to_first_entry() {
        let catalog = vec![
            ("first".to_string(), vec![1.0, 0.0]),
            ("second".to_string(), vec![1.0, 0.0]),
            ("other".to_string(), vec![0.0, 1.0]),
        ];
        let searcher = ImageSearcher::from_embeddings(Box::new(MeanColorEncoder), catalog).unwrap();

        assert_eq!(searcher.search_embedding(&[3.0, 0.0]).unwrap(), "first");
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        assert!(searcher(&[]).is_err());
    }

    #[test]
    fn test_unknown_category_fails_construction() {
        assert!(searcher(&["red", "mauve"]).is_err());
    }

    #[test]
    fn test_dimension_mismatch() {
        let catalog = vec![("short".to_string(), vec![1.0, 0.0])];
        let searcher = ImageSearcher::from_embeddings(Box::new(MeanColorEncoder), catalog).unwrap();

        let result = searcher.search_with_image(&RgbImage::new(2, 2));
        assert_eq!(
            result,
            Err(ClassifyError::DimensionMismatch { image: 3, catalog: 2 })
        );
    }

    #[test]
    fn test_zero_embedding_still_returns_a_category() {
        let searcher = searcher(&["red", "green"]).unwrap();
        // All-black crop embeds to the zero vector
        assert_eq!(searcher.search_with_image(&RgbImage::new(4, 4)).unwrap(), "red");
    }
}
