use crate::config::config_dir;
use std::path::PathBuf;

pub(crate) fn default_functions_path() -> Option<PathBuf> {
    let mut path = config_dir()?;
    path.push("default.rhai");
    Some(path)
}

/// Put `default.rhai` first in `functions` when it exists.
pub(crate) fn prepend_default_functions_if_present(
    functions: &mut Vec<PathBuf>,
    no_default_functions: bool,
) {
    if no_default_functions {
        return;
    }
    let Some(path) = default_functions_path() else {
        return;
    };
    if path.is_file() {
        functions.insert(0, path);
    } else {
        tracing::debug!(path = %path.display(), "no default functions file");
    }
}

/// Read function files and join them into one script.
pub(crate) fn load_functions(paths: &[PathBuf]) -> anyhow::Result<Option<String>> {
    let mut script: Option<String> = None;
    for path in paths {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to load functions file {}: {}", path.display(), e))?;
        match &mut script {
            Some(existing) => {
                existing.push_str("\n\n");
                existing.push_str(&content);
            }
            None => script = Some(content),
        }
    }
    Ok(script)
}
