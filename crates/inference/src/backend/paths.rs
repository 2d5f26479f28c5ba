use std::path::PathBuf;

/// Scheme for models fetched by name from the hub base URL.
pub const HUB_SCHEME: &str = "hub://";

/// Canonicalize a user-supplied model path for one load attempt.
///
/// Trims whitespace, converts `\` separators to `/`, and expands a leading `~`
/// from `HOME`. Pure: returns a new path and touches no process state.
pub fn normalize_model_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    if trimmed.starts_with(HUB_SCHEME) {
        return PathBuf::from(trimmed);
    }

    let unified = trimmed.replace('\\', "/");

    let expanded = match unified.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match std::env::var_os("HOME") {
            Some(home) => {
                let mut path = PathBuf::from(home);
                path.push(rest.trim_start_matches('/'));
                return path;
            }
            None => unified,
        },
        _ => unified,
    };

    PathBuf::from(expanded)
}

/// The model name of a `hub://<name>` reference, if `raw` is one.
pub fn hub_reference(raw: &str) -> Option<&str> {
    raw.trim()
        .strip_prefix(HUB_SCHEME)
        .map(|name| name.trim_end_matches(".onnx"))
        .filter(|name| !name.is_empty())
}
