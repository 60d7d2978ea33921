use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use shared::config::ClientConfig;

/// Writes a default configuration file (`config.yaml` or `config.json`) to
/// the current directory.
///
/// # Errors
/// Returns an error for an unsupported format or when the file cannot be written.
pub fn generate_config(format: &str) -> Result<()> {
    let path = write_config(Path::new("."), format)?;
    println!(
        "Configuration file '{}' generated successfully.",
        path.display()
    );
    Ok(())
}

fn write_config(dir: &Path, format: &str) -> Result<std::path::PathBuf> {
    let config = ClientConfig::with_defaults();
    let (file_name, serialized) = match format {
        "yaml" | "yml" => ("config.yaml", serde_yml::to_string(&config)?),
        "json" => ("config.json", serde_json::to_string_pretty(&config)?),
        _ => bail!("Unsupported format. Use 'yaml' or 'json'."),
    };

    let path = dir.join(file_name);
    fs::write(&path, serialized)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
