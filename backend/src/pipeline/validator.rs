use image::ImageFormat;

use crate::error::UploadRejection;

pub const ACCEPTED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/jpg", "image/png", "image/bmp"];

/// Raw upload as received from the client; lives only for one request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

impl UploadedImage {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            content_type,
            file_name: None,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Client-supplied file name for log lines.
    pub fn display_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or("<unnamed>")
    }
}

#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_bytes: usize,
}

impl ImageValidator {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Checks size, declared type and file signature. Never decodes pixels.
    /// Returns the format detected from the file signature.
    pub fn validate(&self, upload: &UploadedImage) -> Result<ImageFormat, UploadRejection> {
        if upload.is_empty() {
            return Err(UploadRejection::Empty);
        }
        if upload.len() > self.max_bytes {
            return Err(UploadRejection::TooLarge {
                limit: self.max_bytes,
            });
        }
        if let Some(declared) = upload.content_type.as_deref() {
            let essence = declared.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            if !ACCEPTED_MIME_TYPES.contains(&essence.as_str()) {
                return Err(UploadRejection::UnsupportedType(declared.to_string()));
            }
        }

        let format = image::guess_format(&upload.bytes).map_err(|_| UploadRejection::Corrupt)?;
        match format {
            ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Bmp => Ok(format),
            other => Err(UploadRejection::UnsupportedType(other.to_mime_type().to_string())),
        }
    }
}
