//! Format normaliser (spec section 4.2).
//!
//! `.pdf` passes through, `.doc`/`.docx` are converted to PDF by an
//! out-of-process converter, `.txt` flags plain-text mode (no PDF
//! extraction needed), anything else fails `Unsupported`.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::errors::{CoreError, CoreResult};

pub struct NormalizedInput {
    pub pdf_path: Option<PathBuf>,
    pub plain_text_path: Option<PathBuf>,
}

impl NormalizedInput {
    pub fn plain_text_mode(&self) -> bool {
        self.plain_text_path.is_some()
    }
}

/// The converter binary used for `.doc`/`.docx` → PDF. Configurable via
/// `DOC_CONVERTER` env var mainly so tests can stub it; defaults to
/// `libreoffice`, matching the most common headless-conversion toolchain.
fn converter_binary() -> String {
    std::env::var("DOC_CONVERTER").unwrap_or_else(|_| "libreoffice".to_string())
}

pub fn normalize(path: &Path, suffix_hint: &str) -> CoreResult<NormalizedInput> {
    match suffix_hint.to_lowercase().as_str() {
        "pdf" => Ok(NormalizedInput {
            pdf_path: Some(path.to_path_buf()),
            plain_text_path: None,
        }),
        "txt" => Ok(NormalizedInput {
            pdf_path: None,
            plain_text_path: Some(path.to_path_buf()),
        }),
        "doc" | "docx" => {
            let out_dir = path
                .parent()
                .ok_or_else(|| CoreError::Fatal("source path has no parent directory".to_string()))?;

            let output = Command::new(converter_binary())
                .arg("--headless")
                .arg("--convert-to")
                .arg("pdf")
                .arg("--outdir")
                .arg(out_dir)
                .arg(path)
                .output()
                .map_err(|e| CoreError::Fatal(format!("failed to invoke converter: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(CoreError::Fatal(format!(
                    "document converter failed: {}",
                    stderr
                )));
            }

            let pdf_path = path.with_extension("pdf");
            Ok(NormalizedInput {
                pdf_path: Some(pdf_path),
                plain_text_path: None,
            })
        }
        other => Err(CoreError::Unsupported(format!("file suffix '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_passes_through() {
        let result = normalize(Path::new("/tmp/a.pdf"), "pdf").unwrap();
        assert!(result.pdf_path.is_some());
        assert!(!result.plain_text_mode());
    }

    #[test]
    fn txt_flags_plain_text_mode() {
        let result = normalize(Path::new("/tmp/a.txt"), "txt").unwrap();
        assert!(result.plain_text_mode());
        assert!(result.pdf_path.is_none());
    }

    #[test]
    fn unknown_suffix_is_unsupported() {
        let err = normalize(Path::new("/tmp/a.xyz"), "xyz").unwrap_err();
        assert!(matches!(err, CoreError::Unsupported(_)));
    }
}
