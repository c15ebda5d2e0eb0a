//! Loads image files as `data:` URLs for upload.

use base64::Engine;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("image file is empty")]
    Empty,
}

/// MIME type for an image path, by extension.
pub fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

pub fn to_data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub fn load_data_url(path: &Path) -> Result<String, ImageError> {
    let mime = mime_for(path)
        .ok_or_else(|| ImageError::UnsupportedType(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| ImageError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }
    Ok(to_data_url(mime, &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mime_by_extension() {
        assert_eq!(mime_for(Path::new("a/b/photo.JPG")), Some("image/jpeg"));
        assert_eq!(mime_for(Path::new("shot.png")), Some("image/png"));
        assert_eq!(mime_for(Path::new("notes.txt")), None);
        assert_eq!(mime_for(Path::new("no_extension")), None);
    }

    #[test]
    fn test_load_data_url() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(&[0x89, b'P', b'N', b'G']).unwrap();

        let url = load_data_url(file.path()).unwrap();
        assert_eq!(url, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_load_rejects_empty_and_unknown_files() {
        let empty = tempfile::Builder::new().suffix(".gif").tempfile().unwrap();
        assert!(matches!(load_data_url(empty.path()), Err(ImageError::Empty)));

        let text = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(matches!(
            load_data_url(text.path()),
            Err(ImageError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.png");
        assert!(matches!(
            load_data_url(&missing),
            Err(ImageError::Read { .. })
        ));
    }
}
