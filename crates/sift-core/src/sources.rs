//! Plain-text sources for ingestion: single files or directories of `.md` / `.txt`.
//!
//! Mail bodies, crawled pages and anything else already reduced to text can be
//! wrapped in a [`TextSource`] directly; this module only covers the filesystem.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];

/// Text plus provenance, ready to be chunked and embedded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSource {
    /// Prefix for the ids of this source's chunks.
    pub id: String,
    pub url: String,
    pub title: String,
    pub text: String,
    pub depth: i32,
}

impl TextSource {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_depth(mut self, depth: i32) -> Self {
        self.depth = depth;
        self
    }
}

/// Reads one file as a source. Frontmatter is stripped; the title is the first
/// `# ` heading, else the file stem.
pub fn read_source(path: &Path) -> Result<TextSource, SourceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| SourceError::Read(path.to_path_buf(), e))?;
    let text = strip_frontmatter(&raw);
    let title = heading(&text)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();
    Ok(TextSource {
        id: path.display().to_string(),
        url: path.display().to_string(),
        title,
        text,
        depth: 0,
    })
}

/// Scans `root` for all `.md` and `.txt` files, skipping hidden entries.
/// Does not follow symlinks into directories (walkdir default).
pub fn scan_sources(root: &Path) -> Result<Vec<TextSource>, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::NotADirectory(root.to_path_buf()));
    }
    let mut sources = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| SourceError::Walk(e.to_string()))?;
        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXT_EXTENSIONS.contains(&e));
        if is_text && path.is_file() {
            sources.push(read_source(path)?);
        }
    }
    Ok(sources)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn heading(text: &str) -> Option<String> {
    text.lines()
        .find_map(|l| l.trim().strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Removes optional YAML frontmatter (lines between first --- and second ---).
fn strip_frontmatter(content: &str) -> String {
    let s = content.trim_start();
    if !s.starts_with("---") {
        return content.to_string();
    }
    let after_first = s.strip_prefix("---").unwrap_or(s).trim_start();
    if let Some(rest) = after_first.find("\n---") {
        after_first[rest + 4..].trim_start().to_string()
    } else {
        content.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}
