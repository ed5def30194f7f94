use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Relative paths containing this marker are intermediate checkpoints.
pub const CHECKPOINT_MARKER: &str = "checkpoint-";

/// A file produced by training that is eligible for publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: PathBuf,
    /// Path relative to the output root, `/`-separated.
    pub relative_path: String,
}

#[must_use]
pub fn is_transient_checkpoint(relative_path: &str) -> bool {
    relative_path.contains(CHECKPOINT_MARKER)
}

/// Walk `root` and return every regular file outside checkpoint subpaths.
///
/// Order is unspecified.
pub fn collect_publishable(root: &Path) -> TrainingResult<Vec<ArtifactFile>> {
    if !root.is_dir() {
        return Err(TrainingError::Artifact(format!(
            "output directory does not exist: {}",
            root.display()
        )));
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).map_err(|_| {
            TrainingError::Artifact(format!("{} is outside {}", entry.path().display(), root.display()))
        })?;
        let relative_path = slash_path(relative);
        if is_transient_checkpoint(&relative_path) {
            continue;
        }
        out.push(ArtifactFile { path: entry.path().to_path_buf(), relative_path });
    }
    Ok(out)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Model identifier used in the remote path.
///
/// An explicit model name wins; otherwise the last hyphen-delimited token of
/// `hub_model_id` (`"org/base-model-v2"` gives `"v2"`). A trailing hyphen
/// leaves no usable token and yields `None`.
#[must_use]
pub fn model_identifier(model_name: Option<&str>, hub_model_id: Option<&str>) -> Option<String> {
    if let Some(name) = model_name.map(str::trim).filter(|n| !n.is_empty()) {
        return Some(name.to_string());
    }
    hub_model_id
        .and_then(|id| id.rsplit('-').next())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Remote directory for a user's model: `<prefix>/<user_id>/<model_identifier>`.
#[must_use]
pub fn remote_model_path(prefix: &str, user_id: &str, model_identifier: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("{user_id}/{model_identifier}")
    } else {
        format!("{prefix}/{user_id}/{model_identifier}")
    }
}
