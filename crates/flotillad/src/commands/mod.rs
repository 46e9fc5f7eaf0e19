pub mod query;
pub mod render;

use std::path::Path;

/// App id for an app file: the file stem.
pub fn app_id_from_path(path: &Path) -> anyhow::Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("cannot derive an app id from {}", path.display()))
}
