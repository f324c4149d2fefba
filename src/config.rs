use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub seeds: SeedConfig,
    pub walker: WalkerConfig,
    pub resolver: ResolverConfig,
    pub journal: JournalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default = "default_input_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub blank_lines: BlankLinePolicy,
}

/// What a blank input record means.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlankLinePolicy {
    /// Ignore the record and keep reading
    #[default]
    Skip,
    /// End of input
    Stop,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// Also write url-tree.json / cname-tree.json merged over all domains
    #[serde(default)]
    pub combined: bool,
    /// Echo serialized trees to stdout
    #[serde(default)]
    pub print_trees: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedConfig {
    /// Host prefixes applied to every input domain. "" is the bare domain.
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub attribution: Attribution,
}

/// Which name a discovered CNAME is filed under in the URL tree.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Attribution {
    /// The seed the walk started from, however deep the hop
    #[default]
    Seed,
    /// The name that directly carries the CNAME record
    Hop,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalkerConfig {
    /// Upper bound on distinct names expanded per seed
    #[serde(default = "default_max_names")]
    pub max_names: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResolverConfig {
    /// Empty => nameservers from /etc/resolv.conf
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
    /// Tries per name for transient failures (timeouts, SERVFAIL, I/O)
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Re-ask over TCP when a UDP answer comes back truncated
    #[serde(default = "default_true")]
    pub tcp_fallback: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Defaults to <output.dir>/journal.json
    pub path: Option<PathBuf>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: default_input_path(),
            blank_lines: BlankLinePolicy::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            combined: false,
            print_trees: false,
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            prefixes: default_prefixes(),
            attribution: Attribution::default(),
        }
    }
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self { max_names: default_max_names() }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            attempts: default_attempts(),
            tcp_fallback: true,
        }
    }
}

// Default value functions
fn default_input_path() -> PathBuf { PathBuf::from("domains.csv") }
fn default_output_dir() -> PathBuf { PathBuf::from("output") }
fn default_prefixes() -> Vec<String> {
    ["", "www", "m", "mobile"].iter().map(|p| p.to_string()).collect()
}
fn default_max_names() -> usize { 64 }
fn default_attempts() -> u32 { 2 }
fn default_true() -> bool { true }
fn default_port() -> u16 { 53 }
fn default_timeout_ms() -> u64 { 2000 }

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path.display(), e))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Where the lookup journal goes when enabled
    pub fn journal_path(&self) -> PathBuf {
        self.journal
            .path
            .clone()
            .unwrap_or_else(|| self.output.dir.join("journal.json"))
    }
}
