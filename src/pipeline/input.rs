//! Input resolution: normalise a user-supplied path or URL to a local PDF.
//!
//! URLs are downloaded into a `TempDir` that lives as long as the
//! [`ResolvedInput`]; pdfium needs a real path. Local files are checked for
//! the `%PDF` magic and swapped for a sanitised sibling
//! (`report.sanitized.pdf` / `report_sanitized.pdf`) when one exists, since
//! sanitised copies convert with far fewer layout failures.

use crate::error::EsgError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// The resolved input: a local path or a downloaded temp file.
pub enum ResolvedInput {
    Local(PathBuf),
    /// The `TempDir` is kept alive until processing completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, EsgError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        let path = prefer_sanitized(Path::new(input));
        check_local(&path)?;
        debug!("Resolved local PDF: {}", path.display());
        Ok(ResolvedInput::Local(path))
    }
}

fn is_sanitized(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains("_sanitized") || n.contains(".sanitized"))
}

/// Return a sanitised sibling of `path` if one exists, else `path` itself.
pub fn prefer_sanitized(path: &Path) -> PathBuf {
    if is_sanitized(path) {
        return path.to_path_buf();
    }
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return path.to_path_buf();
    };
    let candidates = [
        path.with_file_name(format!("{stem}.sanitized.pdf")),
        path.with_file_name(format!("{stem}_sanitized.pdf")),
    ];
    for candidate in candidates {
        if candidate.is_file() {
            warn!(
                "Sanitized PDF found, switching input to {}",
                candidate.display()
            );
            return candidate;
        }
    }
    path.to_path_buf()
}

/// Validate existence, read permission and PDF magic bytes.
fn check_local(path: &Path) -> Result<(), EsgError> {
    if !path.exists() {
        return Err(EsgError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(EsgError::NotAPdf {
                    path: path.to_path_buf(),
                    magic,
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(EsgError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => Err(EsgError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, EsgError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EsgError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            EsgError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            EsgError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(EsgError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = filename_from_url(url);
    let temp_dir = TempDir::new().map_err(|e| EsgError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(|e| EsgError::DownloadFailed {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(EsgError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| EsgError::write(&file_path, e))?;

    info!("Downloaded to: {}", file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_from_url("https://x.kr/esg/2025_HDEC.pdf?v=2"), "2025_HDEC.pdf");
        assert_eq!(filename_from_url("https://x.kr/download"), "downloaded.pdf");
    }

    #[test]
    fn sanitized_sibling_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("2025_HDEC_Report.pdf");
        std::fs::write(&original, b"%PDF-1.7").unwrap();
        assert_eq!(prefer_sanitized(&original), original);

        let sanitized = dir.path().join("2025_HDEC_Report_sanitized.pdf");
        std::fs::write(&sanitized, b"%PDF-1.7").unwrap();
        assert_eq!(prefer_sanitized(&original), sanitized);
        assert_eq!(prefer_sanitized(&sanitized), sanitized);
    }

    #[tokio::test]
    async fn local_checks() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.pdf");
        let err = resolve_input(missing.to_str().unwrap(), 5).await.err().unwrap();
        assert!(matches!(err, EsgError::FileNotFound { .. }));

        let text = dir.path().join("notes.pdf");
        std::fs::write(&text, b"hello world").unwrap();
        let err = resolve_input(text.to_str().unwrap(), 5).await.err().unwrap();
        assert!(matches!(err, EsgError::NotAPdf { magic, .. } if &magic == b"hell"));

        let pdf = dir.path().join("ok.pdf");
        std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();
        let resolved = resolve_input(pdf.to_str().unwrap(), 5).await.unwrap();
        assert_eq!(resolved.path(), pdf.as_path());
    }
}
