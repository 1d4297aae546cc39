use crate::config::UploadConfig;
use axum::extract::{multipart::MultipartError, Multipart};
use std::path::PathBuf;
use thiserror::Error;
use tracing::instrument;
use unicode_normalization::UnicodeNormalization;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file part")]
    NoFilePart,
    #[error("No selected file")]
    NoSelectedFile,
    #[error("Invalid file type")]
    InvalidFileType,
    #[error("Invalid filename")]
    InvalidFilename,
    #[error("Malformed upload: {0}")]
    Malformed(#[from] MultipartError),
    #[error("Failed to store upload: {0}")]
    Storage(#[from] std::io::Error),
}

impl UploadError {
    /// Everything except storage is the client's to fix.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, UploadError::Storage(_))
    }
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub path: PathBuf,
}

/// Writes accepted images into a single directory, keyed by sanitized file
/// name. A later upload with the same name replaces the earlier file.
#[derive(Debug)]
pub struct UploadStore {
    dir: PathBuf,
    allowed_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(upload_config: &UploadConfig) -> std::io::Result<Self> {
        std::fs::create_dir_all(&upload_config.dir)?;
        Ok(Self {
            dir: upload_config.dir.clone(),
            allowed_extensions: upload_config
                .allowed_extensions
                .iter()
                .map(|ext| ext.to_lowercase())
                .collect(),
        })
    }

    pub fn allowed_file(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| self.allowed_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Validates `filename` and writes `data` under its sanitized name.
    pub async fn save(&self, filename: &str, data: &[u8]) -> Result<UploadedImage, UploadError> {
        if filename.is_empty() {
            return Err(UploadError::NoSelectedFile);
        }
        if !self.allowed_file(filename) {
            return Err(UploadError::InvalidFileType);
        }

        let filename = secure_filename(filename);
        if filename.is_empty() {
            return Err(UploadError::InvalidFilename);
        }

        let path = self.dir.join(&filename);
        tokio::fs::write(&path, data).await?;
        tracing::debug!(path = ?path, bytes = data.len(), "Stored upload");

        Ok(UploadedImage { filename, path })
    }

    /// Reads the `file` part of a multipart form and stores it.
    #[instrument(skip(self, multipart))]
    pub async fn receive(&self, multipart: &mut Multipart) -> Result<UploadedImage, UploadError> {
        while let Some(field) = multipart.next_field().await? {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }

            // A part without a filename parameter is a plain form value.
            let Some(filename) = field.file_name().map(str::to_string) else {
                continue;
            };
            if filename.is_empty() {
                return Err(UploadError::NoSelectedFile);
            }
            if !self.allowed_file(&filename) {
                return Err(UploadError::InvalidFileType);
            }

            let data = field.bytes().await?;
            return self.save(&filename, &data).await;
        }

        Err(UploadError::NoFilePart)
    }
}

/// Reduces a client-supplied name to a flat ASCII file name: path separators
/// become spaces, whitespace runs become `_`, anything outside
/// `[A-Za-z0-9_.-]` is dropped and leading or trailing `.`/`_` are trimmed.
pub fn secure_filename(filename: &str) -> String {
    let ascii: String = filename
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    ascii
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect::<String>()
        .trim_matches(|c| c == '.' || c == '_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &std::path::Path) -> UploadStore {
        UploadStore::new(&UploadConfig {
            dir: dir.to_path_buf(),
            allowed_extensions: vec!["png".into(), "jpg".into(), "JPEG".into()],
            max_body_bytes: 1024,
        })
        .unwrap()
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My cool movie.mov"), "My_cool_movie.mov");
        assert_eq!(secure_filename("../../../etc/passwd"), "etc_passwd");
        assert_eq!(
            secure_filename("i contain cool \u{fc}ml\u{e4}uts.txt"),
            "i_contain_cool_umlauts.txt"
        );
        assert_eq!(secure_filename("..\\frame 01.PNG"), "frame_01.PNG");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn test_allowed_file_checks_last_extension_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert!(store.allowed_file("frame.PNG"));
        assert!(store.allowed_file("frame.tar.jpeg"));
        assert!(!store.allowed_file("frame.png.exe"));
        assert!(!store.allowed_file("png"));
        assert!(!store.allowed_file("frame."));
    }

    #[tokio::test]
    async fn test_save_writes_sanitized_name_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let first = store.save("../match frame.jpg", b"first").await.unwrap();
        let second = store.save("match frame.jpg", b"second").await.unwrap();

        assert_eq!(first.filename, "match_frame.jpg");
        assert_eq!(first.path, second.path);
        assert_eq!(std::fs::read(&second.path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_save_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert!(matches!(
            store.save("", b"x").await,
            Err(UploadError::NoSelectedFile)
        ));
        assert!(matches!(
            store.save("notes.txt", b"x").await,
            Err(UploadError::InvalidFileType)
        ));
    }
}
