//! Observation frames.
//!
//! Simulators hand frames over as PNG. The harness never decodes pixels: it
//! stores the bytes, reads the dimensions from the IHDR chunk, and passes the
//! file on to the model and the video encoder.

use std::path::Path;

use base64::Engine;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("frame is not a PNG image")]
    NotPng,

    #[error("PNG frame has zero width or height")]
    EmptyImage,
}

/// A single PNG-encoded observation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    png: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap PNG bytes, validating the signature and header.
    pub fn from_png(png: Vec<u8>) -> Result<Self, FrameError> {
        // Signature (8) + chunk length (4) + "IHDR" (4) + width (4) + height (4).
        if png.len() < 24 || png[..8] != PNG_SIGNATURE || &png[12..16] != b"IHDR" {
            return Err(FrameError::NotPng);
        }
        let width = u32::from_be_bytes([png[16], png[17], png[18], png[19]]);
        let height = u32::from_be_bytes([png[20], png[21], png[22], png[23]]);
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyImage);
        }
        Ok(Self { png, width, height })
    }

    /// Decode a base64 string (optionally a `data:` URL) holding a PNG.
    pub fn from_base64(encoded: &str) -> Result<Self, FrameError> {
        let payload = encoded
            .split_once(";base64,")
            .map(|(_, data)| data)
            .unwrap_or(encoded);
        let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
        Self::from_png(bytes)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    /// Write the frame to `path` as a PNG file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, &self.png)
    }
}
