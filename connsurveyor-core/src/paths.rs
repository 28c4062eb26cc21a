//! Cache tree layout.
//!
//! The on-disk layout is a persisted contract read by other tooling:
//!
//! ```text
//! <cache>/resources/<env_id>/<entity_type>/<entity_id>.json
//! <cache>/data/<env_id>/connections/<api_name>/<connection_id>/<record_type>/<record_name>.<ext>
//! ```

use std::path::{Path, PathBuf};

use crate::models::ResourceType;

/// Root of the resource entity tree.
pub fn resources_path(cache_path: &Path) -> PathBuf {
    cache_path.join("resources")
}

/// One environment's resource entities.
pub fn env_resources_path(cache_path: &Path, env_id: &str) -> PathBuf {
    resources_path(cache_path).join(env_id)
}

/// One entity-type directory within an environment.
pub fn env_entity_type_path(
    cache_path: &Path,
    env_id: &str,
    entity_type: ResourceType,
) -> PathBuf {
    env_resources_path(cache_path, env_id).join(entity_type.as_str())
}

/// Root of the collected data tree.
pub fn data_path(cache_path: &Path) -> PathBuf {
    cache_path.join("data")
}

/// One environment's collected data. Deleted and rebuilt on every data
/// collection run.
pub fn env_data_path(cache_path: &Path, env_id: &str) -> PathBuf {
    data_path(cache_path).join(env_id)
}

/// Root of per-connection dumps inside an environment's data tree.
pub fn env_connections_data_path(cache_path: &Path, env_id: &str) -> PathBuf {
    env_data_path(cache_path, env_id).join("connections")
}

/// Strips path separators so a backend-supplied name cannot escape its
/// record-type directory.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim_start_matches('.').trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
