use axum::extract::multipart::Field;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Attachment allow-list: images and PDF only.
const ALLOWED_TYPES: [&str; 3] = ["image/jpeg", "image/png", "application/pdf"];

/// One file pulled out of a multipart request before it is handed to object
/// storage.
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub original_name: Option<String>,
    pub content_type: Option<String>,
}

impl UploadedFile {
    pub async fn from_field(field: Field<'_>) -> AppResult<Self> {
        let original_name = field.file_name().map(|n| n.to_string());
        let content_type = field.content_type().map(|mime| mime.to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("failed to read file bytes: {err}")))?
            .to_vec();

        Ok(Self {
            bytes,
            original_name,
            content_type,
        })
    }

    /// Declared content type, falling back to a guess from the filename
    /// extension when the client omitted one.
    pub fn resolved_content_type(&self) -> Option<String> {
        if let Some(declared) = &self.content_type {
            return Some(declared.clone());
        }
        self.original_name
            .as_deref()
            .and_then(|name| mime_guess::from_path(name).first_raw())
            .map(|mime| mime.to_string())
    }

    pub fn ensure_allowed(&self, max_bytes: usize) -> AppResult<String> {
        if self.bytes.is_empty() {
            return Err(AppError::bad_request("file must not be empty"));
        }
        if self.bytes.len() > max_bytes {
            return Err(AppError::bad_request(format!(
                "file exceeds the {max_bytes}-byte limit"
            )));
        }
        let content_type = self
            .resolved_content_type()
            .ok_or_else(|| AppError::bad_request("file content type is required"))?;
        if !ALLOWED_TYPES.contains(&content_type.as_str()) {
            return Err(AppError::bad_request(
                "only JPG, PNG, and PDF files are allowed",
            ));
        }
        Ok(content_type)
    }

    /// Storage key under the given prefix, keeping the original extension so
    /// presigned downloads keep a sensible filename.
    pub fn storage_key(&self, prefix: &str) -> String {
        let extension = self
            .original_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()))
            .filter(|ext| !ext.is_empty() && ext.len() <= 8);

        match extension {
            Some(ext) => format!("{prefix}/{}.{ext}", Uuid::new_v4()),
            None => format!("{prefix}/{}", Uuid::new_v4()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: Option<&str>, content_type: Option<&str>, bytes: &[u8]) -> UploadedFile {
        UploadedFile {
            bytes: bytes.to_vec(),
            original_name: name.map(|n| n.to_string()),
            content_type: content_type.map(|c| c.to_string()),
        }
    }

    #[test]
    fn rejects_disallowed_content_type() {
        let upload = file(Some("script.exe"), Some("application/octet-stream"), b"xx");
        assert!(upload.ensure_allowed(1024).is_err());
    }

    #[test]
    fn accepts_pdf_and_caps_size() {
        let upload = file(Some("form.pdf"), Some("application/pdf"), b"%PDF");
        assert_eq!(upload.ensure_allowed(1024).unwrap(), "application/pdf");
        assert!(upload.ensure_allowed(2).is_err());
    }

    #[test]
    fn guesses_content_type_from_filename() {
        let upload = file(Some("photo.png"), None, b"\x89PNG");
        assert_eq!(upload.ensure_allowed(1024).unwrap(), "image/png");
    }

    #[test]
    fn empty_file_is_rejected() {
        let upload = file(Some("photo.png"), Some("image/png"), b"");
        assert!(upload.ensure_allowed(1024).is_err());
    }

    #[test]
    fn storage_key_keeps_extension() {
        let upload = file(Some("leaky tap.JPG"), Some("image/jpeg"), b"xx");
        let key = upload.storage_key("attachments");
        assert!(key.starts_with("attachments/"));
        assert!(key.ends_with(".jpg"));
    }
}
