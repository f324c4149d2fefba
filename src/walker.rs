use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use crate::dns::name;
use crate::resolver::CnameLookup;

/// `source` carries a CNAME record pointing at `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

/// Everything one seed's walk turned up.
#[derive(Debug, Default)]
pub struct Walk {
    pub seed: String,
    /// Distinct edges in discovery order
    pub edges: Vec<Edge>,
    /// Names actually looked up
    pub expanded: usize,
    /// Lookups that yielded nothing
    pub failures: usize,
    /// The name cap stopped the walk with work still queued
    pub capped: bool,
}

/// Follows CNAME chains breadth-first from a seed.
///
/// Every name is looked up at most once per walk, so cycles (A -> B -> A)
/// and diamonds terminate. `max_names` bounds chains of ever-new names.
pub struct ChainWalker<'a, R> {
    resolver: &'a R,
    max_names: usize,
}

impl<'a, R: CnameLookup> ChainWalker<'a, R> {
    pub fn new(resolver: &'a R, max_names: usize) -> Self {
        Self {
            resolver,
            max_names: max_names.max(1),
        }
    }

    pub async fn walk(&self, seed: &str) -> Walk {
        let seed = name::normalize(seed);
        let mut walk = Walk {
            seed: seed.clone(),
            ..Walk::default()
        };
        if seed.is_empty() {
            return walk;
        }

        let mut queue = VecDeque::from([seed.clone()]);
        let mut seen: HashSet<String> = HashSet::from([seed]);
        let mut edges: HashSet<Edge> = HashSet::new();

        while let Some(current) = queue.pop_front() {
            if walk.expanded >= self.max_names {
                walk.capped = true;
                warn!(
                    "{}: stopped after {} names, {} still queued",
                    walk.seed,
                    walk.expanded,
                    queue.len() + 1
                );
                break;
            }
            walk.expanded += 1;

            let targets = match self.resolver.lookup_cname(&current).await {
                Ok(targets) => targets,
                Err(e) => {
                    debug!("{}: no CNAME ({})", current, e);
                    walk.failures += 1;
                    continue;
                }
            };

            for target in targets {
                let target = name::normalize(&target);
                if target.is_empty() {
                    continue;
                }
                debug!("{} -> {}", current, target);

                let edge = Edge {
                    source: current.clone(),
                    target: target.clone(),
                };
                if edges.insert(edge.clone()) {
                    walk.edges.push(edge);
                }
                if seen.insert(target.clone()) {
                    queue.push_back(target);
                }
            }
        }

        walk
    }
}
