use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Run configuration maintained by the review frontend: where the source
/// document lives and which extraction tool to invoke. Read-only here.
/// Key names are the ones the deployed frontend already writes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    #[serde(default)]
    pub pdf_path: PathBuf,
    #[serde(default)]
    pub script_path: PathBuf,
}

impl RunConfig {
    /// Load and validate. Everything a run needs must exist up front; a
    /// dangling path fails here, before any side effect.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("config file not found: {}", path.display());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;

        if config.pdf_path.as_os_str().is_empty() || !config.pdf_path.exists() {
            bail!(
                "PDF document not found or path invalid: {}",
                config.pdf_path.display()
            );
        }
        if config.script_path.as_os_str().is_empty() || !config.script_path.exists() {
            bail!(
                "extraction tool not found or path invalid: {}",
                config.script_path.display()
            );
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunConfig::load(&dir.path().join("config.json")).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn dangling_pdf_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("tool.sh");
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            format!(
                r#"{{"pdfPath": "{}", "scriptPath": "{}"}}"#,
                dir.path().join("gone.pdf").display(),
                tool.display()
            ),
        )
        .unwrap();

        let err = RunConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("PDF document not found"));
    }

    #[test]
    fn missing_keys_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{}").unwrap();
        assert!(RunConfig::load(&path).is_err());
    }

    #[test]
    fn valid_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        let tool = dir.path().join("tool.sh");
        fs::write(&pdf, "%PDF").unwrap();
        fs::write(&tool, "#!/bin/sh\n").unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            format!(
                r#"{{"pdfPath": "{}", "scriptPath": "{}"}}"#,
                pdf.display(),
                tool.display()
            ),
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.pdf_path, pdf);
    }
}
