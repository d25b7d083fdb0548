use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::{InvokeError, PathDenyReason};

/// File extensions that may be read for prompt construction: source, config
/// and doc types only. Anything credential-shaped (.pem, .key, .env) is
/// outside this set by construction.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "java", "cpp", "cc", "c", "h", "rs", "go", "rb", "vue",
    "html", "css", "scss", "sass", "json", "yaml", "yml", "toml", "md", "txt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Dir,
}

/// A path that passed validation: canonical, inside the permitted root, of
/// the expected type, and within size policy. Only `PathValidator` builds
/// one. The referenced entry was readable at validation time; a later
/// deletion races as an execution-time error, not a security failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    pub absolute_path: PathBuf,
    pub byte_size: u64,
    pub line_count: usize,
    pub extension: Option<String>,
}

/// Primary defense against arbitrary-file-read: every filesystem reference
/// goes through `validate` before any content is read.
#[derive(Debug, Clone)]
pub struct PathValidator {
    root: PathBuf,
    max_file_bytes: u64,
    max_file_lines: usize,
}

impl PathValidator {
    /// `root` must exist; it is canonicalized up front so the ancestry check
    /// compares like with like.
    pub fn new(root: &Path, max_file_bytes: u64, max_file_lines: usize) -> Result<Self, InvokeError> {
        let root = root.canonicalize().map_err(|e| {
            InvokeError::Internal(format!("cannot canonicalize permitted root: {}", e))
        })?;
        Ok(Self {
            root,
            max_file_bytes,
            max_file_lines,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn validate(
        &self,
        path_str: &str,
        expect: PathKind,
    ) -> Result<ValidatedPath, InvokeError> {
        if path_str.trim().is_empty() {
            return Err(self.deny(path_str, PathDenyReason::EmptyPath));
        }

        // Relative references resolve against the permitted root, never
        // against ambient process state.
        let candidate = {
            let p = Path::new(path_str);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                self.root.join(p)
            }
        };

        // Symlink-expanded absolute form; fails for dangling references.
        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(resolved) => resolved,
            Err(_) => return Err(self.deny(path_str, PathDenyReason::NotFound)),
        };

        // Component-wise ancestry: `/root-evil` does not start with `/root`
        // here, unlike a raw string prefix check.
        if !resolved.starts_with(&self.root) {
            return Err(self.deny(path_str, PathDenyReason::OutsideRoot));
        }

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(|_| self.deny(path_str, PathDenyReason::NotFound))?;

        match expect {
            PathKind::Dir => {
                if !metadata.is_dir() {
                    return Err(self.deny(path_str, PathDenyReason::NotADirectory));
                }
                Ok(ValidatedPath {
                    absolute_path: resolved,
                    byte_size: 0,
                    line_count: 0,
                    extension: None,
                })
            }
            PathKind::File => {
                if !metadata.is_file() {
                    return Err(self.deny(path_str, PathDenyReason::NotAFile));
                }

                let extension = resolved
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_ascii_lowercase());
                let allowed = extension
                    .as_deref()
                    .map(|e| ALLOWED_EXTENSIONS.contains(&e))
                    .unwrap_or(false);
                if !allowed {
                    return Err(self.deny(path_str, PathDenyReason::ExtensionNotAllowed));
                }

                let byte_size = metadata.len();
                if byte_size > self.max_file_bytes {
                    return Err(self.deny(path_str, PathDenyReason::FileTooLarge));
                }

                let line_count = self.count_lines(&resolved).await?;
                if line_count > self.max_file_lines {
                    return Err(self.deny(path_str, PathDenyReason::TooManyLines));
                }

                Ok(ValidatedPath {
                    absolute_path: resolved,
                    byte_size,
                    line_count,
                    extension,
                })
            }
        }
    }

    /// Streams the file line by line, bailing as soon as the limit is
    /// exceeded, so bounds-checking never loads the whole file.
    async fn count_lines(&self, path: &Path) -> Result<usize, InvokeError> {
        let file = File::open(path)
            .await
            .map_err(|e| InvokeError::Internal(format!("cannot open validated file: {}", e)))?;
        let mut lines = BufReader::new(file).lines();
        let mut count = 0usize;
        while let Some(_line) = lines
            .next_line()
            .await
            .map_err(|e| InvokeError::Internal(format!("cannot read validated file: {}", e)))?
        {
            count += 1;
            if count > self.max_file_lines {
                return Ok(count);
            }
        }
        Ok(count)
    }

    /// The returned error carries only the reason code; the offending input
    /// stays in server-side logs, redacted.
    fn deny(&self, path_str: &str, reason: PathDenyReason) -> InvokeError {
        tracing::warn!(
            reason = reason.as_str(),
            input = %crate::redaction::redact_sensitive_text(path_str),
            "path rejected"
        );
        InvokeError::PathSecurity { reason }
    }
}
