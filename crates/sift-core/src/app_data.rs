//! Where sift keeps its own data (config, the embedding store, downloaded models).

use std::path::PathBuf;

/// Returns the directory where sift stores config, the store file and the model cache.
/// On macOS: `~/Library/Application Support/Sift/`.
/// Creates the directory if it doesn't exist; returns `None` if we can't determine the path.
pub fn app_data_dir() -> Option<PathBuf> {
    let dir = directories::ProjectDirs::from("app", "Sift", "Sift")?.data_local_dir().to_path_buf();
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Cache directory for local embedding models, under the app data dir.
pub fn model_cache_dir() -> Option<PathBuf> {
    let dir = app_data_dir()?.join("models");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_is_some() {
        assert!(app_data_dir().is_some());
    }

    #[test]
    fn model_cache_is_inside_data_dir() {
        let data = app_data_dir().unwrap();
        let models = model_cache_dir().unwrap();
        assert!(models.starts_with(&data));
        assert!(models.is_dir());
    }
}
