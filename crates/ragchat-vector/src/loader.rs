//! Document loading from the staging directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;

use ragchat_core::error::RagChatError;
use ragchat_core::types::Document;

/// Turns a directory of raw files into normalized documents.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, dir: &Path) -> Result<Vec<Document>, RagChatError>;
}

/// Reads every UTF-8 file under a directory.
///
/// Hidden files and directories are skipped, as are files that are not
/// valid UTF-8. Documents are returned in path order. A directory with no
/// readable file is an error, since an index over nothing can't answer.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    recursive: bool,
}

impl Default for DirectoryLoader {
    fn default() -> Self {
        Self { recursive: true }
    }
}

impl DirectoryLoader {
    pub fn new(recursive: bool) -> Self {
        Self { recursive }
    }

    fn load_sync(dir: &Path, recursive: bool) -> Result<Vec<Document>, RagChatError> {
        if !dir.is_dir() {
            return Err(RagChatError::IndexBuild(format!(
                "input directory {} does not exist",
                dir.display()
            )));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut paths: Vec<PathBuf> = Vec::new();
        let walker = WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));
        for entry in walker {
            let entry = entry.map_err(|e| RagChatError::IndexBuild(e.to_string()))?;
            if entry.file_type().is_file() {
                paths.push(entry.into_path());
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = std::fs::read(&path)
                .map_err(|e| RagChatError::IndexBuild(format!("{}: {}", path.display(), e)))?;
            let text = match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(path = %path.display(), "Skipping file that is not UTF-8 text");
                    continue;
                }
            };
            let file_name = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            debug!(file = %file_name, bytes = text.len(), "Loaded document");
            documents.push(Document { file_name, text });
        }

        if documents.is_empty() {
            return Err(RagChatError::IndexBuild(format!(
                "no readable documents in {}",
                dir.display()
            )));
        }
        Ok(documents)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

#[async_trait]
impl DocumentLoader for DirectoryLoader {
    async fn load(&self, dir: &Path) -> Result<Vec<Document>, RagChatError> {
        let dir = dir.to_path_buf();
        let recursive = self.recursive;
        tokio::task::spawn_blocking(move || Self::load_sync(&dir, recursive))
            .await
            .map_err(|e| RagChatError::IndexBuild(format!("Loader task panicked: {}", e)))?
    }
}
