use std::path::Path;
use thiserror::Error;

/// Extraction failures are permanent: the pipeline never retries them and
/// degrades the file to metadata-only with the reason recorded.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document contains no extractable text")]
    EmptyDocument,
}

/// Collaborator contract for turning a document into plain text.
///
/// Implementations are synchronous; the pipeline runs them on blocking
/// tasks. Rich formats (PDF, DOCX, XLSX) plug in behind this trait.
pub trait ContentExtractor: Send + Sync {
    /// Whether this extractor can handle the file at all.
    fn supports(&self, path: &Path) -> bool;

    fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Default extractor for plain-text formats: reads the file as UTF-8 with
/// lossy conversion.
pub struct PlainTextExtractor {
    extensions: Vec<String>,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            extensions: ["txt", "md", "rst", "csv", "rtf", "html", "htm", "tex"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl PlainTextExtractor {
    #[must_use]
    pub fn with_extensions(extensions: Vec<String>) -> Self {
        Self { extensions }
    }
}

impl ContentExtractor for PlainTextExtractor {
    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .is_some_and(|ext| self.extensions.iter().any(|candidate| candidate == &ext))
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        if !self.supports(path) {
            return Err(ExtractionError::UnsupportedType(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("<none>")
                    .to_string(),
            ));
        }

        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn extracts_plain_text() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "quarterly budget review").unwrap();

        let extractor = PlainTextExtractor::default();
        assert!(extractor.supports(&path));
        assert_eq!(
            extractor.extract(&path).unwrap(),
            "quarterly budget review"
        );
    }

    #[test]
    fn rejects_unsupported_extension() {
        let extractor = PlainTextExtractor::default();
        let err = extractor.extract(Path::new("/a/b.pdf")).unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedType(_)));
    }

    #[test]
    fn whitespace_only_file_is_empty_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blank.txt");
        std::fs::write(&path, "   \n\t\n").unwrap();

        let err = PlainTextExtractor::default().extract(&path).unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyDocument));
    }
}
