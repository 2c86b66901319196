//! Document ingestion surface: format and size checks before indexing.

use crate::defaults;
use crate::error::{ParlanceError, Result};
use std::path::Path;

/// Text read from an accepted document file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    /// File name without directories.
    pub name: String,
    pub text: String,
}

/// Reads plain text and markdown files up to a size ceiling.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    max_bytes: u64,
    extensions: Vec<String>,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new(defaults::MAX_DOCUMENT_BYTES)
    }
}

impl DocumentLoader {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            extensions: defaults::DOCUMENT_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn expected(&self) -> String {
        self.extensions
            .iter()
            .map(|e| format!(".{e}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Reads a document after checking its extension, size and encoding.
    ///
    /// # Errors
    /// - `UnsupportedDocumentFormat` for other extensions or non-UTF-8 content
    /// - `DocumentTooLarge` above the size ceiling
    /// - `Io` if the file cannot be read
    pub fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let display = path.display().to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !self.extensions.iter().any(|e| *e == extension) {
            return Err(ParlanceError::UnsupportedDocumentFormat {
                path: display,
                expected: self.expected(),
            });
        }

        let size = std::fs::metadata(path)?.len();
        if size > self.max_bytes {
            return Err(ParlanceError::DocumentTooLarge {
                path: display,
                size,
                limit: self.max_bytes,
            });
        }

        let bytes = std::fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|_| ParlanceError::UnsupportedDocumentFormat {
            path: display.clone(),
            expected: "UTF-8 text".to_string(),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(display);
        Ok(LoadedDocument { name, text })
    }
}
