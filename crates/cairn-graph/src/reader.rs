//! Source text loading with encoding fallback.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ContentReadError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot decode {} as text: {reason}", .path.display())]
    Encoding { path: PathBuf, reason: String },
}

/// Reads a file's content as text.
pub trait ContentReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<String, ContentReadError>;
}

/// Reads from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsContentReader;

impl ContentReader for FsContentReader {
    fn read(&self, path: &Path) -> Result<String, ContentReadError> {
        let bytes = fs::read(path).map_err(|source| ContentReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        decode(&bytes).map_err(|reason| ContentReadError::Encoding {
            path: path.to_path_buf(),
            reason,
        })
    }
}

/// Decode bytes as UTF-8, then UTF-16 (BOM required), then Latin-1 (no NULs).
pub fn decode(bytes: &[u8]) -> Result<String, String> {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(body) {
        return Ok(text.to_string());
    }

    if let Some(body) = bytes.strip_prefix(b"\xFF\xFE") {
        return decode_utf16(body, u16::from_le_bytes);
    }
    if let Some(body) = bytes.strip_prefix(b"\xFE\xFF") {
        return decode_utf16(body, u16::from_be_bytes);
    }

    if bytes.contains(&0) {
        return Err("binary content (NUL bytes without a UTF-16 byte order mark)".to_string());
    }
    Ok(bytes.iter().map(|&b| b as char).collect())
}

fn decode_utf16(body: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, String> {
    if body.len() % 2 != 0 {
        return Err("odd byte count for UTF-16".to_string());
    }
    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|e| e.to_string())
}
