//! Plain-text extraction from policy documents.

use std::path::Path;

use crate::error::IngestError;

/// Extract the text of a PDF, plain-text, or Markdown file.
pub async fn extract_text(path: &Path) -> Result<String, IngestError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => {
            let owned = path.to_path_buf();
            tokio::task::spawn_blocking(move || pdf_extract::extract_text(&owned))
                .await
                .map_err(|e| extraction_error(path, e))?
                .map_err(|e| extraction_error(path, e))
        }
        "txt" | "md" => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| extraction_error(path, e)),
        other => Err(IngestError::Extraction {
            path: path.to_path_buf(),
            message: format!("unsupported file type '{other}'"),
        }),
    }
}

fn extraction_error(path: &Path, e: impl std::fmt::Display) -> IngestError {
    IngestError::Extraction {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extract_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("politica.txt");
        std::fs::write(&path, "Días de vacaciones: 15.").unwrap();
        assert_eq!(extract_text(&path).await.unwrap(), "Días de vacaciones: 15.");
    }

    #[tokio::test]
    async fn test_extract_invalid_pdf_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roto.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();
        let err = extract_text(&path).await.unwrap_err();
        assert!(matches!(err, IngestError::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_extract_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabla.xlsx");
        std::fs::write(&path, b"x").unwrap();
        assert!(extract_text(&path).await.is_err());
    }
}
