//! Image Storage
//!
//! Content-addressed storage for message and profile pictures. Clients send
//! base64 payloads (optionally data URIs); bytes are written under their
//! SHA-256 hash and served back by hash.

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{Error, Result};

pub struct ImageStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl ImageStore {
    pub fn new(dir: PathBuf, max_bytes: usize) -> Self {
        Self { dir, max_bytes }
    }

    /// Decode and store a base64 image payload. Returns the serving path.
    pub async fn store_base64(&self, payload: &str) -> Result<String> {
        // Strip a "data:image/...;base64," prefix if present.
        let encoded = payload.rsplit(',').next().unwrap_or(payload);
        let data = BASE64
            .decode(encoded.trim())
            .map_err(|_| Error::Validation("invalid image encoding".to_string()))?;

        if data.is_empty() {
            return Err(Error::Validation("empty image payload".to_string()));
        }
        if data.len() > self.max_bytes {
            return Err(Error::Validation(format!(
                "image exceeds {} bytes",
                self.max_bytes
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(&data);
        let hash = format!("{:x}", hasher.finalize());

        let path = self.dir.join(&hash);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(format!("/images/{hash}"));
        }

        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| Error::Internal(format!("failed to store image: {e}")))?;

        info!("Stored image {} ({} bytes)", hash, data.len());
        Ok(format!("/images/{hash}"))
    }

    /// Read stored image bytes by hash.
    pub async fn read(&self, hash: &str) -> Result<Bytes> {
        // Hashes are lowercase hex; anything else cannot name a stored file.
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::NotFound("image"));
        }

        match tokio::fs::read(self.dir.join(hash)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound("image")),
            Err(e) => Err(Error::Internal(format!("failed to read image: {e}"))),
        }
    }

    /// Sniff a content type from magic bytes for the serving response.
    pub fn content_type(data: &[u8]) -> &'static str {
        if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            "image/png"
        } else if data.starts_with(b"\xff\xd8\xff") {
            "image/jpeg"
        } else if data.starts_with(b"GIF8") {
            "image/gif"
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            "image/webp"
        } else {
            "application/octet-stream"
        }
    }
}
