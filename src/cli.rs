use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

const ABOUT: &str = "Discovers the CNAMEs of a list of domains and builds two trees per domain";

const LONG_ABOUT: &str = "\
Discovers the CNAMEs of a list of domains and builds two trees per domain.

Input: a CSV file with a domain in the first column of each line.
Output: <domain>-url.json and <domain>-cname.json in the output directory.

URL tree: reverse domain order of each walked hostname, with every CNAME the
hostname leads to as a null-valued leaf.

CNAME tree: reverse domain order of each CNAME, with every hostname that led
to it as a null-valued leaf.";

#[derive(Debug, Parser)]
#[command(name = "cname-trees", version, about = ABOUT, long_about = LONG_ABOUT)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Input CSV
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output folder
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Debug logging and echo trees to stdout
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Flags win over the configuration file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(input) = &self.input {
            config.input.path = input.clone();
        }
        if let Some(output) = &self.output {
            config.output.dir = output.clone();
        }
        if self.verbose {
            config.output.print_trees = true;
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "cname_trees=debug"
        } else {
            "cname_trees=info"
        }
    }
}
