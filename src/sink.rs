use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    /// hostname -> CNAMEs
    Url,
    /// CNAME -> hostnames
    Cname,
}

impl TreeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TreeKind::Url => "url",
            TreeKind::Cname => "cname",
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for serialized trees.
pub trait TreeSink {
    /// Persist one domain's tree of the given kind
    fn write_tree(&mut self, domain: &str, kind: TreeKind, document: &str) -> anyhow::Result<()>;

    /// Persist a tree merged over the whole batch
    fn write_combined(&mut self, kind: TreeKind, document: &str) -> anyhow::Result<()>;
}

/// Writes `<dir>/<domain>-<kind>.json` per domain and `<dir>/<kind>-tree.json`
/// for combined trees.
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Make sure `dir` is a usable directory, creating it if absent.
    pub fn create(dir: &Path) -> anyhow::Result<Self> {
        if dir.exists() && !dir.is_dir() {
            return Err(anyhow::anyhow!("Invalid output directory '{}': not a directory", dir.display()));
        }
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("Failed to create output directory '{}': {}", dir.display(), e))?;
            info!("Created output directory {}", dir.display());
        }
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn path_for(&self, domain: &str, kind: TreeKind) -> anyhow::Result<PathBuf> {
        if domain.is_empty() || domain.starts_with('.') || domain.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
            return Err(anyhow::anyhow!("Domain '{}' cannot be used as a file name", domain));
        }
        Ok(self.dir.join(format!("{}-{}.json", domain, kind)))
    }

    fn write_file(path: &Path, document: &str) -> anyhow::Result<()> {
        std::fs::write(path, document).map_err(|e| anyhow::anyhow!("Failed to write '{}': {}", path.display(), e))?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

impl TreeSink for FileSink {
    fn write_tree(&mut self, domain: &str, kind: TreeKind, document: &str) -> anyhow::Result<()> {
        let path = self.path_for(domain, kind)?;
        Self::write_file(&path, document)
    }

    fn write_combined(&mut self, kind: TreeKind, document: &str) -> anyhow::Result<()> {
        let path = self.dir.join(format!("{}-tree.json", kind));
        Self::write_file(&path, document)
    }
}

/// Keeps documents in memory; optionally refuses one domain.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemorySink {
    pub trees: std::collections::HashMap<(String, TreeKind), String>,
    pub combined: std::collections::HashMap<TreeKind, String>,
    pub reject: Option<String>,
}

#[cfg(test)]
impl MemorySink {
    pub fn tree(&self, domain: &str, kind: TreeKind) -> Option<serde_json::Value> {
        let doc = self.trees.get(&(domain.to_string(), kind))?;
        serde_json::from_str(doc).ok()
    }
}

#[cfg(test)]
impl TreeSink for MemorySink {
    fn write_tree(&mut self, domain: &str, kind: TreeKind, document: &str) -> anyhow::Result<()> {
        if self.reject.as_deref() == Some(domain) {
            return Err(anyhow::anyhow!("refusing {}", domain));
        }
        self.trees.insert((domain.to_string(), kind), document.to_string());
        Ok(())
    }

    fn write_combined(&mut self, kind: TreeKind, document: &str) -> anyhow::Result<()> {
        self.combined.insert(kind, document.to_string());
        Ok(())
    }
}
