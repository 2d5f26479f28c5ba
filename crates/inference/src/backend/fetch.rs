use anyhow::{Context, anyhow};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

/// Download a hub model into `cache_dir/hub/<name>.onnx` unless already cached.
pub fn fetch_hub_model(base_url: &str, name: &str, cache_dir: &Path) -> anyhow::Result<PathBuf> {
    if !is_contained_name(name) {
        anyhow::bail!("refusing hub model name outside the cache: {name}");
    }

    let target = cache_dir.join("hub").join(format!("{name}.onnx"));
    if target.is_file() {
        tracing::debug!(path = %target.display(), "Hub model already cached");
        return Ok(target);
    }

    let url = format!("{}/{name}.onnx", base_url.trim_end_matches('/'));
    download(&url, &target)?;
    Ok(target)
}

/// Relative, made only of plain components, so joining it stays under the cache.
fn is_contained_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('\\')
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn download(url: &str, target: &Path) -> anyhow::Result<()> {
    tracing::info!(url, "Downloading hub model");

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating cache directory {}", parent.display()))?;
    }

    let client = reqwest::blocking::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| anyhow!("Failed to send HTTP request: {e}"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("HTTP request for {url} failed with status: {status}");
    }

    let bytes = response.bytes().context("reading hub model body")?;

    // Only complete downloads appear at the cache path
    let partial = target.with_extension("onnx.part");
    let mut file = fs::File::create(&partial)
        .with_context(|| format!("creating {}", partial.display()))?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&partial, target)?;

    tracing::info!(path = %target.display(), bytes = bytes.len(), "Hub model cached");
    Ok(())
}

/// Clone `url` into `dir` with `git clone --depth 1` unless `dir` already exists.
///
/// Existence is all that is checked; a present directory is trusted as-is.
pub fn ensure_repository(url: &str, dir: &Path) -> anyhow::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    tracing::info!(url, dir = %dir.display(), "Cloning vendored detector repository");

    let output = Command::new("git")
        .args(["clone", "--depth", "1", "--quiet", url])
        .arg(dir)
        .output()
        .context("failed to spawn git")?;

    if !output.status.success() {
        let _ = fs::remove_dir_all(dir);
        anyhow::bail!(
            "git clone of {url} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_hub_model_skips_network() {
        let cache = tempfile::tempdir().unwrap();
        let cached = cache.path().join("hub").join("tiny.onnx");
        fs::create_dir_all(cached.parent().unwrap()).unwrap();
        fs::write(&cached, b"onnx").unwrap();

        let path = fetch_hub_model("http://127.0.0.1:9", "tiny", cache.path()).unwrap();
        assert_eq!(path, cached);
    }

    #[test]
    fn test_traversal_names_are_rejected() {
        let cache = tempfile::tempdir().unwrap();
        for name in ["../etc/passwd", "models/../../x", "/abs/path", "//abs", "./tiny", "a\\b", ""] {
            assert!(
                fetch_hub_model("http://127.0.0.1:9", name, cache.path()).is_err(),
                "{name:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_absolute_name_cannot_reach_an_existing_model() {
        let cache = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let outside = elsewhere.path().join("evil.onnx");
        std::fs::write(&outside, b"onnx").unwrap();

        let name = elsewhere.path().join("evil");
        let result = fetch_hub_model("http://127.0.0.1:9", name.to_str().unwrap(), cache.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_nested_names_stay_under_the_cache() {
        let cache = tempfile::tempdir().unwrap();
        let cached = cache.path().join("hub").join("team").join("tiny.onnx");
        std::fs::create_dir_all(cached.parent().unwrap()).unwrap();
        std::fs::write(&cached, b"onnx").unwrap();

        let resolved = fetch_hub_model("http://127.0.0.1:9", "team/tiny", cache.path()).unwrap();
        assert_eq!(resolved, cached);
        assert!(resolved.starts_with(cache.path()));
    }

    #[test]
    fn test_existing_repository_is_not_recloned() {
        let repo = tempfile::tempdir().unwrap();
        ensure_repository("http://127.0.0.1:9/never.git", repo.path()).unwrap();
    }

    #[test]
    fn test_failed_clone_leaves_no_directory() {
        let parent = tempfile::tempdir().unwrap();
        let dir = parent.path().join("repo");
        let missing = parent.path().join("no-such-remote");

        assert!(ensure_repository(missing.to_str().unwrap(), &dir).is_err());
        assert!(!dir.exists());
    }
}
