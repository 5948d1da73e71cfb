//! file helpers shared by the firmware and backup formats

use crate::error::DictResult;
use std::{
    io::Write,
    path::Path,
    };


/// replace the content of `path` so that readers never see a partially written file
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> DictResult {
    let directory = match path.parent() {
        Some(parent) if ! parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(directory)?;
    file.write_all(content)?;
    file.flush()?;
    file.persist(path)?;
    log::debug!("wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}
