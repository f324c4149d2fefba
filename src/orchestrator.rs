use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Attribution, Config};
use crate::dns::name;
use crate::metrics::RunMetrics;
use crate::resolver::CnameLookup;
use crate::sink::{TreeKind, TreeSink};
use crate::tree::LabelTree;
use crate::walker::{ChainWalker, Edge};

/// The URL tree and CNAME tree built for one input domain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DomainTrees {
    /// hostname -> CNAME leaves
    pub url: LabelTree,
    /// CNAME -> hostname leaves
    pub cname: LabelTree,
}

impl DomainTrees {
    /// Route one edge found while walking `seed` into both trees.
    pub fn record(&mut self, seed: &str, edge: &Edge, attribution: Attribution) {
        let origin = match attribution {
            Attribution::Seed => seed,
            Attribution::Hop => edge.source.as_str(),
        };
        self.url.insert(origin, &edge.target);
        self.cname.insert(&edge.target, origin);
    }

    pub fn merge(&mut self, other: &DomainTrees) {
        self.url.merge(&other.url);
        self.cname.merge(&other.cname);
    }
}

/// Drives discovery for a batch of domains: seeds each domain, walks every
/// seed, files the edges, and hands both trees to the sink.
///
/// Domains are processed one after another; each gets its own pair of
/// trees, so nothing is shared between domains except the counters.
pub struct Orchestrator<R, S> {
    config: Arc<Config>,
    resolver: R,
    sink: S,
    metrics: RunMetrics,
    combined: Option<DomainTrees>,
}

impl<R: CnameLookup, S: TreeSink> Orchestrator<R, S> {
    pub fn new(config: Arc<Config>, resolver: R, sink: S) -> Self {
        let combined = config.output.combined.then(DomainTrees::default);
        Self {
            config,
            resolver,
            sink,
            metrics: RunMetrics::new(),
            combined,
        }
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Seed hostnames for a domain, in prefix order, without duplicates.
    pub fn seeds(&self, domain: &str) -> Vec<String> {
        let mut seeds: Vec<String> = Vec::new();
        for prefix in &self.config.seeds.prefixes {
            let seed = name::with_prefix(prefix, domain);
            if !seed.is_empty() && !seeds.contains(&seed) {
                seeds.push(seed);
            }
        }
        seeds
    }

    /// Walk every seed of `domain` and build its trees.
    pub async fn discover(&self, domain: &str) -> DomainTrees {
        let walker = ChainWalker::new(&self.resolver, self.config.walker.max_names);
        let mut trees = DomainTrees::default();

        for seed in self.seeds(domain) {
            let walk = walker.walk(&seed).await;

            RunMetrics::add(&self.metrics.seeds, 1);
            RunMetrics::add(&self.metrics.names_expanded, walk.expanded);
            RunMetrics::add(&self.metrics.lookup_failures, walk.failures);
            RunMetrics::add(&self.metrics.edges, walk.edges.len());
            if walk.capped {
                RunMetrics::add(&self.metrics.walks_capped, 1);
            }

            for edge in &walk.edges {
                trees.record(&walk.seed, edge, self.config.seeds.attribution);
            }
        }

        trees
    }

    /// Discover, serialize and write one domain. Errors are the sink's.
    pub async fn process_domain(&mut self, domain: &str) -> anyhow::Result<DomainTrees> {
        let domain = name::normalize(domain);
        info!("Processing {}", domain);

        let trees = self.discover(&domain).await;
        RunMetrics::add(&self.metrics.domains, 1);
        if trees.url.is_empty() {
            debug!("{}: no CNAMEs found", domain);
        } else {
            info!(
                "{}: {} url leaves, {} cname leaves",
                domain,
                trees.url.leaf_count(),
                trees.cname.leaf_count()
            );
        }

        if let Some(combined) = self.combined.as_mut() {
            combined.merge(&trees);
        }

        self.emit(Some(&domain), &trees)?;
        Ok(trees)
    }

    /// Process a whole batch. A domain whose trees cannot be written is
    /// reported and skipped; the batch carries on.
    pub async fn run<I: IntoIterator<Item = String>>(&mut self, domains: I) {
        for domain in domains {
            if let Err(e) = self.process_domain(&domain).await {
                RunMetrics::add(&self.metrics.sink_failures, 1);
                warn!("Error writing trees for {}: {:#}", domain, e);
            }
        }

        if let Some(combined) = self.combined.take() {
            if let Err(e) = self.emit(None, &combined) {
                warn!("Error writing combined trees: {:#}", e);
            }
        }
    }

    /// Serialize both trees and hand them to the sink, url first. `None`
    /// addresses the combined snapshot.
    fn emit(&mut self, domain: Option<&str>, trees: &DomainTrees) -> anyhow::Result<()> {
        let label = domain.unwrap_or("combined");
        for (kind, tree) in [(TreeKind::Url, &trees.url), (TreeKind::Cname, &trees.cname)] {
            for collision in tree.collisions() {
                RunMetrics::add(&self.metrics.collisions, 1);
                warn!(
                    "{}: {} leaf '{}' at '{}' shares its key with a label and is left out of the document",
                    label, kind, collision.leaf, collision.path
                );
            }

            let document = tree.to_json()?;
            if self.config.output.print_trees {
                println!("{}", document);
            }

            match domain {
                Some(domain) => self.sink.write_tree(domain, kind, &document)?,
                None => self.sink.write_combined(kind, &document)?,
            }
            RunMetrics::add(&self.metrics.trees_written, 1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::fake::StaticResolver;
    use crate::sink::MemorySink;
    use serde_json::json;

    fn config() -> Config {
        Config::default()
    }

    fn orchestrator(config: Config, resolver: StaticResolver) -> Orchestrator<StaticResolver, MemorySink> {
        Orchestrator::new(Arc::new(config), resolver, MemorySink::default())
    }

    #[test]
    fn test_default_seeds() {
        let o = orchestrator(config(), StaticResolver::new());
        assert_eq!(
            o.seeds("Macys.com"),
            vec!["macys.com", "www.macys.com", "m.macys.com", "mobile.macys.com"]
        );
    }

    #[test]
    fn test_duplicate_prefixes_walked_once() {
        let mut config = config();
        config.seeds.prefixes = vec!["www".into(), "www.".into(), "m".into()];
        let o = orchestrator(config, StaticResolver::new());
        assert_eq!(o.seeds("macys.com"), vec!["www.macys.com", "m.macys.com"]);
    }

    #[tokio::test]
    async fn test_single_hop_lands_in_both_trees() {
        let resolver = StaticResolver::new().cname("www.example.com", "edge.example.com.net.");
        let mut o = orchestrator(config(), resolver);

        o.run(vec!["example.com".to_string()]).await;

        let sink = o.sink();
        assert_eq!(
            sink.tree("example.com", TreeKind::Url).unwrap(),
            json!({ "com": { "example": { "www": { "edge.example.com.net": null } } } })
        );
        assert_eq!(
            sink.tree("example.com", TreeKind::Cname).unwrap(),
            json!({ "net": { "com": { "example": { "edge": { "www.example.com": null } } } } })
        );
        // all four seeds were tried
        assert_eq!(o.resolver().calls_for("example.com"), 1);
        assert_eq!(o.resolver().calls_for("mobile.example.com"), 1);
    }

    #[tokio::test]
    async fn test_chain_attributed_to_seed() {
        let resolver = StaticResolver::new()
            .cname("www.foo.com", "a.akamai.net")
            .cname("a.akamai.net", "b.akamai.net");
        let mut o = orchestrator(config(), resolver);

        let trees = o.process_domain("foo.com").await.unwrap();

        let leaves = trees.url.leaves("www.foo.com").unwrap();
        assert!(leaves.contains("a.akamai.net"));
        assert!(leaves.contains("b.akamai.net"));
        assert!(trees.url.leaves("a.akamai.net").is_none());

        assert!(trees.cname.leaves("b.akamai.net").unwrap().contains("www.foo.com"));
        assert_eq!(o.metrics().snapshot()["edges"], 2);
    }

    #[tokio::test]
    async fn test_failed_lookups_do_not_stop_other_seeds() {
        let resolver = StaticResolver::new()
            .timeout("www.foo.com")
            .cname("m.foo.com", "m.foo.edgesuite.net")
            .cname("m.foo.edgesuite.net", "a1.akamai.net")
            .cname("mobile.foo.com", "x.cdn.net")
            .timeout("x.cdn.net");
        let mut o = orchestrator(config(), resolver);

        let trees = o.process_domain("foo.com").await.unwrap();

        assert!(trees.url.leaves("www.foo.com").is_none());
        let m = trees.url.leaves("m.foo.com").unwrap();
        assert!(m.contains("m.foo.edgesuite.net"));
        assert!(m.contains("a1.akamai.net"));
        // the edge found before the chain broke is kept
        assert!(trees.url.leaves("mobile.foo.com").unwrap().contains("x.cdn.net"));

        // foo.com and a1.akamai.net have no record; www.foo.com and x.cdn.net time out
        assert_eq!(o.metrics().snapshot()["lookup_failures"], 4);
        assert_eq!(o.metrics().snapshot()["edges"], 3);
        assert!(o.sink().tree("foo.com", TreeKind::Url).is_some());
    }

    #[tokio::test]
    async fn test_hop_attribution() {
        let resolver = StaticResolver::new()
            .cname("www.foo.com", "a.akamai.net")
            .cname("a.akamai.net", "b.akamai.net");
        let mut config = config();
        config.seeds.attribution = Attribution::Hop;
        let mut o = orchestrator(config, resolver);

        let trees = o.process_domain("foo.com").await.unwrap();

        assert_eq!(trees.url.leaves("www.foo.com").unwrap().len(), 1);
        assert!(trees.url.leaves("a.akamai.net").unwrap().contains("b.akamai.net"));
        assert!(trees.cname.leaves("b.akamai.net").unwrap().contains("a.akamai.net"));
    }

    #[tokio::test]
    async fn test_seeds_share_one_pair_of_trees() {
        let resolver = StaticResolver::new()
            .cname("www.macys.com", "www.macys.com.edgekey.net")
            .cname("www.macys.com.edgekey.net", "e108.a.akamaiedge.net")
            .cname("m.macys.com", "www.macys.moovdns.net");
        let mut o = orchestrator(config(), resolver);

        o.run(vec!["macys.com".to_string()]).await;

        assert_eq!(
            o.sink().tree("macys.com", TreeKind::Url).unwrap(),
            json!({
                "com": {
                    "macys": {
                        "www": {
                            "www.macys.com.edgekey.net": null,
                            "e108.a.akamaiedge.net": null
                        },
                        "m": {
                            "www.macys.moovdns.net": null
                        }
                    }
                }
            })
        );
        assert_eq!(
            o.sink().tree("macys.com", TreeKind::Cname).unwrap()["net"]["moovdns"]["macys"]["www"],
            json!({ "m.macys.com": null })
        );
    }

    #[tokio::test]
    async fn test_unresolvable_domain_still_written() {
        let mut o = orchestrator(config(), StaticResolver::new());

        o.run(vec!["nothing.example".to_string()]).await;

        assert_eq!(o.sink().trees[&("nothing.example".to_string(), TreeKind::Url)], "{}");
        assert_eq!(o.sink().trees[&("nothing.example".to_string(), TreeKind::Cname)], "{}");
        assert_eq!(o.metrics().snapshot()["trees_written"], 2);
    }

    #[tokio::test]
    async fn test_trees_not_shared_across_domains() {
        let resolver = StaticResolver::new()
            .cname("www.macys.com", "www.macys.com.edgekey.net")
            .cname("www.kohls.com", "www.kohls.com.edgekey.net");
        let mut o = orchestrator(config(), resolver);

        o.run(vec!["macys.com".to_string(), "kohls.com".to_string()]).await;

        let kohls = o.sink().tree("kohls.com", TreeKind::Url).unwrap();
        assert!(kohls["com"].get("macys").is_none());
        assert_eq!(o.metrics().snapshot()["domains"], 2);
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_abort_batch() {
        let resolver = StaticResolver::new().cname("www.kohls.com", "www.kohls.com.edgekey.net");
        let mut o = Orchestrator::new(
            Arc::new(config()),
            resolver,
            MemorySink {
                reject: Some("macys.com".into()),
                ..MemorySink::default()
            },
        );

        o.run(vec!["macys.com".to_string(), "kohls.com".to_string()]).await;

        assert!(o.sink().tree("macys.com", TreeKind::Url).is_none());
        assert!(o.sink().tree("kohls.com", TreeKind::Url).is_some());
        assert_eq!(o.metrics().snapshot()["sink_failures"], 1);
    }

    #[tokio::test]
    async fn test_combined_snapshot_merges_domains() {
        let resolver = StaticResolver::new()
            .cname("www.macys.com", "www.macys.com.edgekey.net")
            .cname("www.kohls.com", "www.kohls.com.edgekey.net");
        let mut config = config();
        config.output.combined = true;
        let mut o = orchestrator(config, resolver);

        o.run(vec!["macys.com".to_string(), "kohls.com".to_string()]).await;

        let url: serde_json::Value = serde_json::from_str(&o.sink().combined[&TreeKind::Url]).unwrap();
        assert_eq!(url["com"]["macys"]["www"], json!({ "www.macys.com.edgekey.net": null }));
        assert_eq!(url["com"]["kohls"]["www"], json!({ "www.kohls.com.edgekey.net": null }));

        let cname: serde_json::Value = serde_json::from_str(&o.sink().combined[&TreeKind::Cname]).unwrap();
        assert_eq!(cname["net"]["edgekey"]["com"]["kohls"]["www"], json!({ "www.kohls.com": null }));
    }
}
