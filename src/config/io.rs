use anyhow::{bail, Context, Result};
use std::path::Path;

/// Maximum size for a config file (10 MB).
pub const MAX_CONFIG_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Parse a JSON5 configuration string.
pub fn parse_config_json5(content: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value = json5::from_str(content)?;
    Ok(value)
}

/// Read a configuration file into a loosely-typed snapshot.
///
/// The format is picked from the extension: `.yaml`/`.yml`, `.toml`, and
/// JSON5 for everything else. Files larger than [`MAX_CONFIG_FILE_BYTES`]
/// are rejected before being read.
pub fn read_config_file_snapshot(path: &Path) -> Result<serde_json::Value> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Cannot stat config file '{}'", path.display()))?;

    if !metadata.is_file() {
        bail!("Config path '{}' is not a regular file", path.display());
    }

    if metadata.len() > MAX_CONFIG_FILE_BYTES {
        bail!(
            "Config file '{}' is {} bytes, exceeds limit of {} bytes",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_BYTES,
        );
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match ext {
        "yaml" | "yml" => {
            let value: serde_json::Value = serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML in '{}'", path.display()))?;
            Ok(value)
        }
        "toml" => {
            let value: serde_json::Value = toml::from_str(&content)
                .with_context(|| format!("Invalid TOML in '{}'", path.display()))?;
            Ok(value)
        }
        _ => parse_config_json5(&content)
            .with_context(|| format!("Invalid JSON5 in '{}'", path.display())),
    }
}

/// Compute a hash of a configuration snapshot for change detection.
pub fn resolve_config_snapshot_hash(value: &serde_json::Value) -> String {
    use sha2::{Digest, Sha256};
    let canonical = serde_json::to_string(value).unwrap_or_default();
    let hash = Sha256::digest(canonical.as_bytes());
    hex::encode(hash)
}

// ============================================================================
// Tests
// ============================================================================
