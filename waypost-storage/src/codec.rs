//! Reversible text codec for values that do not fit uncompressed.
//!
//! Output is plain ASCII so it can live in any text store. The marker string
//! is what gets recorded next to a compressed key.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use waypost_core::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextCodec {
    /// Raw deflate, then standard base64.
    #[default]
    DeflateBase64,
}

impl TextCodec {
    pub fn marker(&self) -> &'static str {
        match self {
            TextCodec::DeflateBase64 => "deflate-b64",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "deflate-b64" => Some(TextCodec::DeflateBase64),
            _ => None,
        }
    }

    pub fn compress(&self, key: &str, text: &str) -> Result<String, StorageError> {
        match self {
            TextCodec::DeflateBase64 => {
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
                encoder
                    .write_all(text.as_bytes())
                    .map_err(|e| codec_error(key, e))?;
                let bytes = encoder.finish().map_err(|e| codec_error(key, e))?;
                Ok(STANDARD.encode(bytes))
            }
        }
    }

    pub fn decompress(&self, key: &str, encoded: &str) -> Result<String, StorageError> {
        match self {
            TextCodec::DeflateBase64 => {
                let bytes = STANDARD.decode(encoded).map_err(|e| codec_error(key, e))?;
                let mut text = String::new();
                DeflateDecoder::new(bytes.as_slice())
                    .read_to_string(&mut text)
                    .map_err(|e| codec_error(key, e))?;
                Ok(text)
            }
        }
    }
}

fn codec_error(key: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::Codec {
        key: key.to_string(),
        reason: e.to_string(),
    }
}
