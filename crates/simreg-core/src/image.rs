//! Raw-binary to memory-image conversion.
//!
//! The simulator loads RAM from a `$readmemh`-style hex file: one word per
//! line, words packed from the binary in the core's declared endianness.
//! Conversion is pure and deterministic; identical inputs always produce a
//! byte-identical image.

use crate::descriptor::MemoryLayout;
use crate::error::{RegressionError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Byte order used when packing words.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Memory-image converter for one core's layout.
#[derive(Debug, Clone)]
pub struct ImageConverter {
    word_size: usize,
    endianness: Endianness,
    /// Zero-fill the image up to this many words.
    min_words: usize,
}

/// Size information about a binary, as reported by diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInfo {
    pub size_bytes: usize,
    pub size_words: usize,
    pub word_size: usize,
}

impl ImageConverter {
    /// Converter for `layout`, packing little-endian by default.
    pub fn for_layout(layout: &MemoryLayout) -> Self {
        Self {
            word_size: layout.word_size as usize,
            endianness: Endianness::Little,
            min_words: 0,
        }
    }

    /// Override the byte order.
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Zero-fill the image to at least `min_words` lines.
    pub fn with_min_words(mut self, min_words: usize) -> Self {
        self.min_words = min_words;
        self
    }

    /// Size info for a binary under this converter's word size.
    pub fn info(&self, data: &[u8]) -> ImageInfo {
        ImageInfo {
            size_bytes: data.len(),
            size_words: data.len().div_ceil(self.word_size),
            word_size: self.word_size,
        }
    }

    /// Convert raw binary `data` into hex-image text.
    ///
    /// `ram_bytes` is the core's addressable RAM size; content that would
    /// land past the end of RAM is rejected, never truncated.
    pub fn convert(&self, project: &str, core: &str, data: &[u8], ram_bytes: usize) -> Result<String> {
        if data.len() > ram_bytes {
            return Err(RegressionError::ImageTooLarge {
                project: project.to_string(),
                core: core.to_string(),
                image_bytes: data.len(),
                ram_bytes,
            });
        }

        let words = data.len().div_ceil(self.word_size).max(self.min_words);
        if words * self.word_size > ram_bytes {
            return Err(RegressionError::ImageTooLarge {
                project: project.to_string(),
                core: core.to_string(),
                image_bytes: words * self.word_size,
                ram_bytes,
            });
        }

        let mut out = String::with_capacity(words * (self.word_size * 2 + 1));
        let mut word = vec![0u8; self.word_size];
        for i in 0..words {
            word.fill(0);
            let offset = i * self.word_size;
            if offset < data.len() {
                let chunk = &data[offset..data.len().min(offset + self.word_size)];
                word[..chunk.len()].copy_from_slice(chunk);
            }

            match self.endianness {
                Endianness::Little => {
                    for byte in word.iter().rev() {
                        out.push_str(&format!("{byte:02x}"));
                    }
                }
                Endianness::Big => {
                    for byte in &word {
                        out.push_str(&format!("{byte:02x}"));
                    }
                }
            }
            out.push('\n');
        }

        Ok(out)
    }
}

/// SHA-256 digest of an image, hex-encoded.
///
/// Recorded in the build artifact so idempotence is checkable: rebuilding
/// identical inputs must reproduce the same digest.
pub fn image_digest(image: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.as_bytes());
    hex::encode(hasher.finalize())
}
