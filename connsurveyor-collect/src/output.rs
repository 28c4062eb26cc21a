//! Dump file output.
//!
//! Every write is whole-file: a partial run never leaves an unparseable
//! file behind. Text content is decoded with its declared encoding before
//! writing, binary content is written verbatim, and image content arrives
//! base64-encoded and is re-encoded as a native image file.

use std::path::{Path, PathBuf};

use base64::Engine;
use connsurveyor_core::error::{ConnSurveyorError, Result};
use connsurveyor_core::models::DataDumpWithContext;
use connsurveyor_core::paths::sanitize_file_name;

/// Backend-declared extension that marks base64-encoded image content.
const IMAGE_EXTENSION: &str = "png";

/// Writes one dump under its record-type directory and returns the path.
///
/// # Errors
/// I/O failures and undecodable image payloads.
pub async fn write_dump(type_dir: &Path, dump: &DataDumpWithContext) -> Result<PathBuf> {
    tokio::fs::create_dir_all(type_dir)
        .await
        .map_err(|e| ConnSurveyorError::io(type_dir.display().to_string(), e))?;

    let record = &dump.record.record;
    let path = type_dir.join(dump_file_name(
        record.record_name.as_deref(),
        &record.record_id,
        &dump.dump.extension,
    ));

    let content = materialize(&dump.dump.extension, dump.dump.encoding.as_deref(), &dump.dump.content)?;
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| ConnSurveyorError::io(path.display().to_string(), e))?;

    Ok(path)
}

/// Composes `<name>.<ext>`, sanitizing the backend-supplied name and
/// collapsing a duplicate extension suffix (file backends name records
/// after the full file name).
pub(crate) fn dump_file_name(record_name: Option<&str>, record_id: &str, extension: &str) -> String {
    let base = sanitize_file_name(record_name.unwrap_or(record_id));
    let suffix = format!(".{extension}");
    let base = base.strip_suffix(&suffix).unwrap_or(&base);
    format!("{base}{suffix}")
}

fn materialize(extension: &str, encoding: Option<&str>, content: &[u8]) -> Result<Vec<u8>> {
    if extension == IMAGE_EXTENSION {
        return base64::engine::general_purpose::STANDARD
            .decode(content)
            .map_err(|_| {
                ConnSurveyorError::invalid_response("Image content is not valid base64")
            });
    }

    match encoding {
        // The only declared text encoding; decode validates, the bytes are
        // written as-is.
        Some(_) => Ok(String::from_utf8_lossy(content).into_owned().into_bytes()),
        None => Ok(content.to_vec()),
    }
}
