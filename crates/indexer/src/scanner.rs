use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a discovered file should be indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Extract text and embed it.
    Content,
    /// Record the filename only; no extraction or embedding. Config files,
    /// binaries, logs and images land here so they stay findable by name
    /// without polluting semantic results.
    MetadataOnly,
}

/// Extension routing and guards for directory discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Extensions whose content is extracted and embedded.
    pub content_extensions: Vec<String>,
    /// Extensions indexed by filename only.
    pub metadata_only_extensions: Vec<String>,
    pub max_file_size_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            content_extensions: to_strings(CONTENT_EXTENSIONS),
            metadata_only_extensions: to_strings(METADATA_ONLY_EXTENSIONS),
            max_file_size_bytes: 50 * 1024 * 1024,
        }
    }
}

impl ScanConfig {
    /// Route a path to its indexing mode, or `None` if it should be skipped.
    #[must_use]
    pub fn classify(&self, path: &Path) -> Option<FileKind> {
        if is_transient_artifact(path) {
            return None;
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)?;

        if self
            .metadata_only_extensions
            .iter()
            .any(|candidate| candidate == &ext)
        {
            return Some(FileKind::MetadataOnly);
        }
        if self
            .content_extensions
            .iter()
            .any(|candidate| candidate == &ext)
        {
            return Some(FileKind::Content);
        }
        None
    }
}

/// Scanner for finding indexable files under a directory.
pub struct FileScanner {
    root: PathBuf,
    config: ScanConfig,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>, config: ScanConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config,
        }
    }

    /// Walk the root (gitignore-aware, hidden files skipped) and return
    /// every indexable file with its routing.
    pub fn scan(&self) -> Vec<(PathBuf, FileKind)> {
        let mut files = Vec::new();

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true);

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }

                    let path = entry.path();
                    if let Ok(meta) = entry.metadata() {
                        if meta.len() > self.config.max_file_size_bytes {
                            log::debug!(
                                "Skipping large file {} ({} bytes > {})",
                                path.display(),
                                meta.len(),
                                self.config.max_file_size_bytes
                            );
                            continue;
                        }
                    }

                    if let Some(kind) = self.config.classify(path) {
                        files.push((path.to_path_buf(), kind));
                    }
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        log::info!(
            "Found {} indexable files under {}",
            files.len(),
            self.root.display()
        );
        files
    }
}

/// Incomplete downloads, lock files and editor droppings churn constantly
/// and never carry searchable content.
fn is_transient_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    let name = name.to_lowercase();

    const TRANSIENT_SUFFIXES: &[&str] = &[
        ".tmp",
        ".crdownload",
        ".part",
        ".download",
        ".partial",
        ".lock",
        ".swp",
        ".~",
    ];
    TRANSIENT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn to_strings(extensions: &[&str]) -> Vec<String> {
    extensions.iter().map(ToString::to_string).collect()
}

/// Document types whose text extraction is worth embedding.
const CONTENT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rst", "csv", "rtf", "html", "htm", "pdf", "docx", "doc", "xlsx", "odt", "tex",
];

/// Findable by filename only. Content is either not text, boilerplate, or
/// noisy enough to produce false positives in semantic results.
const METADATA_ONLY_EXTENSIONS: &[&str] = &[
    // config
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "properties", "config",
    // binary
    "exe", "dll", "jar", "so", "dylib", "dat", "class", "bin", "zip", "tar", "gz",
    // logs
    "log",
    // images: indexing their bytes makes random pictures rank in text search
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "ico", "tiff", "tif",
    // audio / video
    "mp3", "mp4", "mkv", "avi", "mov", "wav", "flac",
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn classify_routes_by_extension() {
        let config = ScanConfig::default();
        assert_eq!(
            config.classify(Path::new("/a/notes.txt")),
            Some(FileKind::Content)
        );
        assert_eq!(
            config.classify(Path::new("/a/report.PDF")),
            Some(FileKind::Content)
        );
        assert_eq!(
            config.classify(Path::new("/a/photo.jpg")),
            Some(FileKind::MetadataOnly)
        );
        assert_eq!(
            config.classify(Path::new("/a/settings.json")),
            Some(FileKind::MetadataOnly)
        );
        assert_eq!(config.classify(Path::new("/a/unknown.xyz")), None);
        assert_eq!(config.classify(Path::new("/a/noext")), None);
    }

    #[test]
    fn transient_artifacts_are_skipped() {
        let config = ScanConfig::default();
        assert_eq!(config.classify(Path::new("/a/movie.mp4.crdownload")), None);
        assert_eq!(config.classify(Path::new("/a/report.pdf.part")), None);
        assert_eq!(config.classify(Path::new("/a/.doc.txt.swp")), None);
    }

    #[test]
    fn scan_skips_oversized_and_unknown_files() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("keep.txt"), b"hello world").unwrap();
        fs::write(temp.path().join("skip.xyz"), b"whatever").unwrap();
        fs::write(temp.path().join("big.txt"), vec![b'x'; 256]).unwrap();

        let config = ScanConfig {
            max_file_size_bytes: 128,
            ..ScanConfig::default()
        };
        let scanner = FileScanner::new(temp.path(), config);
        let files = scanner.scan();

        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with("keep.txt"));
        assert_eq!(files[0].1, FileKind::Content);
    }

    #[test]
    fn scan_routes_metadata_only_files() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), b"text").unwrap();
        fs::write(temp.path().join("b.png"), b"\x89PNG").unwrap();

        let scanner = FileScanner::new(temp.path(), ScanConfig::default());
        let mut files = scanner.scan();
        files.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].1, FileKind::Content);
        assert_eq!(files[1].1, FileKind::MetadataOnly);
    }
}
