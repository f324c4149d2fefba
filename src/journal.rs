use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::JournalConfig;
use crate::resolver::LookupError;

/// Lookup Journal - every CNAME question the run asked, and what came back.
///
/// Lets you answer "why is m.macys.com missing from the tree?" after the
/// fact: no record, NXDOMAIN, or a timeout against a particular upstream.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JournalEntry {
    pub timestamp: String,
    pub name: String,
    pub upstream: String,
    pub outcome: String,
    pub answers: usize,
    pub latency_us: u64,
}

pub struct Journal {
    enabled: bool,
    entries: RwLock<Vec<JournalEntry>>,
    total_recorded: AtomicU64,
}

impl Journal {
    pub fn new(config: &JournalConfig) -> Self {
        Self {
            enabled: config.enabled,
            entries: RwLock::new(Vec::new()),
            total_recorded: AtomicU64::new(0),
        }
    }

    /// Record one exchange with one upstream
    pub fn record_lookup(
        &self,
        name: &str,
        upstream: &str,
        result: &Result<Vec<String>, LookupError>,
        latency: Duration,
    ) {
        if !self.enabled {
            return;
        }

        let (outcome, answers) = match result {
            Ok(targets) => ("cname".to_string(), targets.len()),
            Err(e) => (e.kind().to_string(), 0),
        };

        let entry = JournalEntry {
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            name: name.to_string(),
            upstream: upstream.to_string(),
            outcome,
            answers,
            latency_us: latency.as_micros() as u64,
        };

        self.entries.write().push(entry);
        self.total_recorded.fetch_add(1, Ordering::Relaxed);
    }

    /// Entries for one name, oldest first
    #[cfg(test)]
    pub fn search(&self, name: &str) -> Vec<JournalEntry> {
        let entries = self.entries.read();
        entries.iter().filter(|e| e.name == name).cloned().collect()
    }

    pub fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "enabled": self.enabled,
            "total_recorded": self.total_recorded.load(Ordering::Relaxed),
        })
    }

    /// Dump the journal as a JSON document alongside the run statistics
    pub fn write(&self, path: &Path, run_stats: serde_json::Value) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let entries = self.entries.read();
        let document = serde_json::json!({
            "generated_at": Utc::now().to_rfc3339(),
            "run": run_stats,
            "journal": self.get_stats(),
            "lookups": &*entries,
        });

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create journal directory '{}': {}", parent.display(), e))?;
        }
        let content = serde_json::to_string_pretty(&document)?;
        std::fs::write(path, content)
            .map_err(|e| anyhow::anyhow!("Failed to write journal '{}': {}", path.display(), e))?;

        info!("Journal with {} lookups written to {}", entries.len(), path.display());
        debug!("Journal stats: {}", self.get_stats());
        Ok(())
    }
}
