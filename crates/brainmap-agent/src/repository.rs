//! Durable graph storage: one JSON file per named graph.
//!
//! The store writes through `GraphRepository`; the backend decides where
//! bytes go. Today: a local directory.

use brainmap_core::{Error, Graph, Result};
use std::path::{Path, PathBuf};

const MAX_NAME_LEN: usize = 64;

/// Accept `[A-Za-z0-9 _.-]`, at most 64 chars, no leading dot. Returns the trimmed name.
pub fn validate_graph_name(name: &str) -> Result<&str> {
    let name = name.trim();
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '.' | '-'));
    if valid {
        Ok(name)
    } else {
        Err(Error::InvalidGraphName(name.to_string()))
    }
}

#[async_trait::async_trait]
pub trait GraphRepository: Send + Sync {
    /// Stored graph names, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Load a graph. Transient state is always reset.
    async fn load(&self, name: &str) -> Result<Graph>;

    /// Replace the stored snapshot for `name`.
    async fn save(&self, name: &str, snapshot: &serde_json::Value) -> Result<()>;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// Physical location, for logs.
    fn location(&self) -> String;
}

/// Local filesystem backend, `<base_dir>/<name>.json`.
pub struct LocalFsRepository {
    base_dir: PathBuf,
}

impl LocalFsRepository {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn graph_path(&self, name: &str) -> Result<PathBuf> {
        let name = validate_graph_name(name)?;
        Ok(self.base_dir.join(format!("{}.json", name)))
    }
}

#[async_trait::async_trait]
impl GraphRepository for LocalFsRepository {
    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.base_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_graph_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn load(&self, name: &str) -> Result<Graph> {
        let path = self.graph_path(name)?;
        let bytes = tokio::fs::read(&path).await?;
        Graph::load_from_durable(&bytes).map_err(|e| Error::storage(name, e.to_string()))
    }

    async fn save(&self, name: &str, snapshot: &serde_json::Value) -> Result<()> {
        let path = self.graph_path(name)?;
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let bytes = serde_json::to_vec_pretty(snapshot)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.graph_path(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn location(&self) -> String {
        self.base_dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_names() {
        assert_eq!(validate_graph_name(" physics ").unwrap(), "physics");
        assert!(validate_graph_name("My Graph_v1.2-final").is_ok());
        assert!(validate_graph_name("").is_err());
        assert!(validate_graph_name(".hidden").is_err());
        assert!(validate_graph_name("../etc/passwd").is_err());
        assert!(validate_graph_name("a/b").is_err());
        assert!(validate_graph_name(&"x".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn missing_directory_lists_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = LocalFsRepository::new(tmp.path().join("nope"));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = LocalFsRepository::new(tmp.path());
        let graph = Graph::default();
        repo.save("default", &serde_json::to_value(&graph).unwrap()).await.unwrap();

        let entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["default.json".to_string()]);
    }
}
