use std::fs::File;
use std::io::{BufRead, BufReader, Split};
use std::path::Path;

use tracing::{debug, warn};

use crate::config::BlankLinePolicy;

/// Domains from a delimited text source, one record per line.
///
/// The domain is the first comma-separated field of each record, trimmed
/// and unquoted. What a blank record means is up to the [`BlankLinePolicy`].
/// Bytes that are not UTF-8 are replaced, not rejected; such a record comes
/// through as a name that will fail lookup.
pub struct DomainReader<R> {
    lines: Split<R>,
    policy: BlankLinePolicy,
    line_no: usize,
    done: bool,
}

impl DomainReader<BufReader<File>> {
    pub fn open(path: &Path, policy: BlankLinePolicy) -> anyhow::Result<Self> {
        if !path.is_file() {
            return Err(anyhow::anyhow!("Input file '{}' does not exist", path.display()));
        }
        let file = File::open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open input '{}': {}", path.display(), e))?;
        Ok(Self::new(BufReader::new(file), policy))
    }
}

impl<R: BufRead> DomainReader<R> {
    pub fn new(reader: R, policy: BlankLinePolicy) -> Self {
        Self {
            lines: reader.split(b'\n'),
            policy,
            line_no: 0,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for DomainReader<R> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.done {
            let bytes = match self.lines.next() {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    warn!("Stopping input at line {}: {}", self.line_no + 1, e);
                    self.done = true;
                    return None;
                }
                None => {
                    self.done = true;
                    return None;
                }
            };
            self.line_no += 1;

            let line = String::from_utf8_lossy(&bytes);
            let domain = first_field(&line);
            if !domain.is_empty() {
                return Some(domain);
            }

            match self.policy {
                BlankLinePolicy::Skip => continue,
                BlankLinePolicy::Stop => {
                    debug!("Blank record at line {}, ending input", self.line_no);
                    self.done = true;
                }
            }
        }
        None
    }
}

fn first_field(line: &str) -> String {
    line.trim_start_matches('\u{feff}')
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches('"')
        .trim()
        .to_string()
}
