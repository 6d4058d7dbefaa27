//! ONNX Runtime encoders
//!
//! MobileCLIP-style image and text towers loaded from local model files.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DynValue, Tensor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::searcher::{ImageEncoder, TextEncoder};

pub const START_OF_TEXT: &str = "<|startoftext|>";
pub const END_OF_TEXT: &str = "<|endoftext|>";
pub const END_OF_WORD: &str = "</w>";
pub const CONTEXT_LENGTH: usize = 77;

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Mutex<Session>,
}

impl OnnxSession {
    /// Create a new ONNX session from a model file
    pub fn new(model_path: &Path, intra_threads: usize) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_names: Vec<String> = session
            .inputs
            .iter()
            .map(|input| input.name.clone())
            .collect();

        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|output| output.name.clone())
            .collect();

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Run the model on a single input and copy out the first output
    fn run_first_output(&self, input: DynValue) -> Result<Vec<f32>> {
        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input])
            .context("ONNX inference failed")?;

        let first_value = outputs.iter().next().context("Model produced no outputs")?.1;
        let (_shape, data) = first_value
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;

        Ok(data.to_vec())
    }
}

/// Resize to `size`×`size` and lay out as NCHW floats in [0, 1]
pub fn preprocess_batch(images: &[RgbImage], size: u32) -> Array4<f32> {
    let side = size as usize;
    let mut data = Array4::<f32>::zeros((images.len(), 3, side, side));

    for (n, image) in images.iter().enumerate() {
        let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                data[[n, channel, y, x]] = pixel.0[channel] as f32 / 255.0;
            }
        }
    }

    data
}

/// Split a flat output buffer into fixed-size embeddings
pub fn split_embeddings(flat: &[f32], embedding_dim: usize) -> Vec<Vec<f32>> {
    if embedding_dim == 0 {
        return Vec::new();
    }
    flat.chunks_exact(embedding_dim).map(<[f32]>::to_vec).collect()
}

/// Vision tower
pub struct OnnxImageEncoder {
    session: OnnxSession,
    image_size: u32,
    embedding_dim: usize,
}

impl OnnxImageEncoder {
    pub fn new(model_path: &Path, image_size: u32, embedding_dim: usize) -> Result<Self> {
        Ok(Self {
            session: OnnxSession::new(model_path, 4)?,
            image_size,
            embedding_dim,
        })
    }
}

impl ImageEncoder for OnnxImageEncoder {
    fn encode_batch(&self, images: &[RgbImage]) -> Result<Vec<Vec<f32>>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Encoding {} image(s)", images.len());

        let data = preprocess_batch(images, self.image_size);
        let tensor = Tensor::from_array(data)
            .context("Failed to create image input tensor")?
            .into_dyn();

        let flat = self.session.run_first_output(tensor)?;
        let embeddings = split_embeddings(&flat, self.embedding_dim);

        if embeddings.len() != images.len() {
            anyhow::bail!(
                "Expected {} embeddings of size {}, model returned {} values",
                images.len(),
                self.embedding_dim,
                flat.len()
            );
        }

        Ok(embeddings)
    }
}

/// Word-level tokenizer over a CLIP-style vocabulary
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: HashMap<String, i64>,
    start_of_text: i64,
    end_of_text: i64,
}

impl Tokenizer {
    pub fn new(vocab: HashMap<String, i64>) -> Result<Self> {
        let start_of_text = *vocab
            .get(START_OF_TEXT)
            .with_context(|| format!("Vocabulary is missing {}", START_OF_TEXT))?;
        let end_of_text = *vocab
            .get(END_OF_TEXT)
            .with_context(|| format!("Vocabulary is missing {}", END_OF_TEXT))?;

        Ok(Self {
            vocab,
            start_of_text,
            end_of_text,
        })
    }

    /// Load a JSON `token -> id` map
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read vocabulary {:?}", path))?;
        let vocab: HashMap<String, i64> =
            serde_json::from_str(&content).context("Failed to parse vocabulary")?;
        Self::new(vocab)
    }

    /// Token IDs padded with zeros to `CONTEXT_LENGTH`
    pub fn encode(&self, text: &str) -> Vec<i64> {
        let mut tokens = vec![self.start_of_text];

        let lowered = text.to_lowercase();
        let words = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|word| !word.is_empty());

        for word in words {
            let whole = format!("{}{}", word, END_OF_WORD);
            if let Some(&id) = self.vocab.get(&whole) {
                tokens.push(id);
                continue;
            }

            // Fall back to single characters
            let chars: Vec<char> = word.chars().collect();
            for (i, c) in chars.iter().enumerate() {
                let piece = if i + 1 == chars.len() {
                    format!("{}{}", c, END_OF_WORD)
                } else {
                    c.to_string()
                };
                match self.vocab.get(&piece) {
                    Some(&id) => tokens.push(id),
                    None => debug!("Dropping out-of-vocabulary piece '{}'", piece),
                }
            }
        }

        if tokens.len() >= CONTEXT_LENGTH {
            warn!("Text '{}' truncated to {} tokens", text, CONTEXT_LENGTH);
            tokens.truncate(CONTEXT_LENGTH - 1);
        }
        tokens.push(self.end_of_text);
        tokens.resize(CONTEXT_LENGTH, 0);
        tokens
    }
}

/// Text tower
pub struct OnnxTextEncoder {
    session: OnnxSession,
    tokenizer: Tokenizer,
    embedding_dim: usize,
}

impl OnnxTextEncoder {
    pub fn new(model_path: &Path, vocab_path: &Path, embedding_dim: usize) -> Result<Self> {
        Ok(Self {
            session: OnnxSession::new(model_path, 1)?,
            tokenizer: Tokenizer::from_file(vocab_path)?,
            embedding_dim,
        })
    }
}

impl TextEncoder for OnnxTextEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenizer.encode(text);
        let tensor = Tensor::from_array(([1usize, CONTEXT_LENGTH], tokens.into_boxed_slice()))
            .context("Failed to create text input tensor")?
            .into_dyn();

        let mut flat = self.session.run_first_output(tensor)?;
        if flat.len() < self.embedding_dim {
            anyhow::bail!(
                "Text model returned {} values, expected {}",
                flat.len(),
                self.embedding_dim
            );
        }
        flat.truncate(self.embedding_dim);
        Ok(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vocab() -> HashMap<String, i64> {
        [
            (START_OF_TEXT, 1),
            (END_OF_TEXT, 2),
            ("books</w>", 10),
            ("toys</w>", 11),
            ("hobbies</w>", 12),
            ("z", 20),
            ("q</w>", 21),
        ]
        .into_iter()
        .map(|(token, id)| (token.to_string(), id))
        .collect()
    }

    #[test]
    fn test_tokenizer_wraps_and_pads() {
        let tokenizer = Tokenizer::new(vocab()).unwrap();
        let tokens = tokenizer.encode("Toys & Hobbies");

        assert_eq!(tokens.len(), CONTEXT_LENGTH);
        assert_eq!(&tokens[..4], &[1, 11, 12, 2]);
        assert!(tokens[4..].iter().all(|&t| t == 0));
    }

    #[test]
    fn test_tokenizer_falls_back_to_characters() {
        let tokenizer = Tokenizer::new(vocab()).unwrap();
        assert_eq!(&tokenizer.encode("zq")[..4], &[1, 20, 21, 2]);
    }

    #[test]
    fn test_tokenizer_truncates_long_text() {
        let tokenizer = Tokenizer::new(vocab()).unwrap();
        let text = vec!["books"; 200].join(" ");
        let tokens = tokenizer.encode(&text);

        assert_eq!(tokens.len(), CONTEXT_LENGTH);
        assert_eq!(tokens[CONTEXT_LENGTH - 1], 2);
    }

    #[test]
    fn test_tokenizer_requires_special_tokens() {
        let mut incomplete = vocab();
        incomplete.remove(END_OF_TEXT);
        assert!(Tokenizer::new(incomplete).is_err());
    }

    #[test]
    fn test_tokenizer_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&vocab()).unwrap().as_bytes()).unwrap();

        let tokenizer = Tokenizer::from_file(file.path()).unwrap();
        assert_eq!(tokenizer.encode("books")[1], 10);
    }

    #[test]
    fn test_preprocess_layout() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 51]));
        let data = preprocess_batch(&[image.clone(), image], 2);

        assert_eq!(data.shape(), &[2, 3, 2, 2]);
        assert!(data.index_axis(ndarray::Axis(1), 0).iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(data.index_axis(ndarray::Axis(1), 1).iter().all(|&v| v == 0.0));
        assert!(data.index_axis(ndarray::Axis(1), 2).iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_split_embeddings() {
        let flat: Vec<f32> = (0..6).map(|v| v as f32).collect();
        let chunks = split_embeddings(&flat, 3);
        assert_eq!(chunks, vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]);
        assert!(split_embeddings(&flat, 0).is_empty());
    }
}
