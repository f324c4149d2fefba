use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::config::{ResolverConfig, UpstreamConfig};
use crate::dns::name;
use crate::dns::packet;
use crate::dns::types::{RecordType, ResponseCode};
use crate::journal::Journal;

const RESOLV_CONF: &str = "/etc/resolv.conf";
const FALLBACK_NAMESERVER: &str = "8.8.8.8";

/// Why a CNAME lookup produced no targets.
///
/// `NoRecord`, `NxDomain` and `InvalidName` are answers; everything else is
/// a failure to get an answer and may succeed on another try.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("no CNAME record")]
    NoRecord,
    #[error("name does not exist")]
    NxDomain,
    #[error("invalid query name: {0}")]
    InvalidName(String),
    #[error("{upstream} timed out after {timeout_ms}ms")]
    Timeout { upstream: String, timeout_ms: u64 },
    #[error("{upstream} answered {rcode}")]
    Server { upstream: String, rcode: ResponseCode },
    #[error("malformed response from {upstream}: {reason}")]
    Malformed { upstream: String, reason: String },
    #[error("I/O error talking to {upstream}: {source}")]
    Io {
        upstream: String,
        #[source]
        source: std::io::Error,
    },
}

impl LookupError {
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            LookupError::NoRecord | LookupError::NxDomain | LookupError::InvalidName(_)
        )
    }

    /// Short tag for the journal
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::NoRecord => "no_record",
            LookupError::NxDomain => "nxdomain",
            LookupError::InvalidName(_) => "invalid_name",
            LookupError::Timeout { .. } => "timeout",
            LookupError::Server { .. } => "server_failure",
            LookupError::Malformed { .. } => "malformed",
            LookupError::Io { .. } => "io",
        }
    }
}

/// Anything that can answer "what does this name CNAME to?".
pub trait CnameLookup {
    async fn lookup_cname(&self, name: &str) -> Result<Vec<String>, LookupError>;
}

/// Per-upstream address and counters
struct UpstreamState {
    config: UpstreamConfig,
    addr: SocketAddr,
    total_queries: AtomicU64,
    total_failures: AtomicU64,
}

impl UpstreamState {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    fn timed_out(&self) -> LookupError {
        LookupError::Timeout {
            upstream: self.config.name.clone(),
            timeout_ms: self.config.timeout_ms,
        }
    }

    fn io(&self, source: std::io::Error) -> LookupError {
        LookupError::Io {
            upstream: self.config.name.clone(),
            source,
        }
    }

    fn malformed(&self, reason: impl std::fmt::Display) -> LookupError {
        LookupError::Malformed {
            upstream: self.config.name.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Asks configured recursive nameservers for CNAME records over the wire.
///
/// Upstreams are tried in order; a transient failure moves on to the next
/// upstream, and the whole list is retried up to `attempts` times. A
/// definitive answer from any upstream ends the lookup. Nothing is cached.
pub struct UpstreamResolver {
    upstreams: Vec<UpstreamState>,
    attempts: u32,
    tcp_fallback: bool,
    journal: Arc<Journal>,
}

impl UpstreamResolver {
    pub fn new(config: &ResolverConfig, journal: Arc<Journal>) -> anyhow::Result<Self> {
        let configs = if config.upstreams.is_empty() {
            system_upstreams()
        } else {
            config.upstreams.clone()
        };

        let upstreams = configs
            .into_iter()
            .map(|c| -> anyhow::Result<UpstreamState> {
                let ip: IpAddr = c
                    .address
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid upstream address '{}': {}", c.address, e))?;
                Ok(UpstreamState {
                    addr: SocketAddr::new(ip, c.port),
                    config: c,
                    total_queries: AtomicU64::new(0),
                    total_failures: AtomicU64::new(0),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if upstreams.is_empty() {
            return Err(anyhow::anyhow!("At least one upstream nameserver is required"));
        }

        info!(
            "Resolver initialized with {} upstream(s): {}",
            upstreams.len(),
            upstreams.iter().map(|u| u.addr.to_string()).collect::<Vec<_>>().join(", ")
        );

        Ok(Self {
            upstreams,
            attempts: config.attempts.max(1),
            tcp_fallback: config.tcp_fallback,
            journal,
        })
    }

    async fn query_upstream(
        &self,
        upstream: &UpstreamState,
        id: u16,
        query: &[u8],
        qname: &str,
    ) -> Result<Vec<String>, LookupError> {
        upstream.total_queries.fetch_add(1, Ordering::Relaxed);

        let mut response = query_udp(upstream, query).await?;
        let mut parsed = packet::parse_packet(&response).map_err(|e| upstream.malformed(e))?;

        if parsed.header.tc && self.tcp_fallback {
            debug!("{}: truncated UDP answer from {}, retrying over TCP", qname, upstream.config.name);
            response = query_tcp(upstream, query).await?;
            parsed = packet::parse_packet(&response).map_err(|e| upstream.malformed(e))?;
        }

        let echoes_question = parsed
            .questions
            .first()
            .map_or(true, |q| name::normalize(&q.name) == qname && q.qtype == RecordType::CNAME);
        if parsed.header.id != id || !parsed.header.qr || !echoes_question {
            return Err(upstream.malformed("response does not match query"));
        }

        match parsed.header.rcode {
            ResponseCode::NoError => {}
            ResponseCode::NxDomain => return Err(LookupError::NxDomain),
            rcode => {
                return Err(LookupError::Server {
                    upstream: upstream.config.name.clone(),
                    rcode,
                })
            }
        }

        let targets = packet::cname_targets(&parsed, qname).map_err(|e| upstream.malformed(e))?;
        if targets.is_empty() {
            return Err(LookupError::NoRecord);
        }
        Ok(targets)
    }

    /// Upstream counters for the run summary
    pub fn get_stats(&self) -> serde_json::Value {
        let upstreams: Vec<serde_json::Value> = self
            .upstreams
            .iter()
            .map(|u| {
                serde_json::json!({
                    "name": u.config.name,
                    "address": u.addr.to_string(),
                    "total_queries": u.total_queries.load(Ordering::Relaxed),
                    "total_failures": u.total_failures.load(Ordering::Relaxed),
                })
            })
            .collect();

        serde_json::json!(upstreams)
    }
}

impl CnameLookup for UpstreamResolver {
    async fn lookup_cname(&self, name: &str) -> Result<Vec<String>, LookupError> {
        let qname = name::normalize(name);
        let id: u16 = rand::random();
        let query = packet::build_query(id, &qname, RecordType::CNAME)
            .map_err(|e| LookupError::InvalidName(e.to_string()))?;

        let mut last_error = LookupError::NoRecord;
        for attempt in 1..=self.attempts {
            for upstream in &self.upstreams {
                let start = Instant::now();
                let result = self.query_upstream(upstream, id, &query, &qname).await;
                self.journal.record_lookup(&qname, &upstream.config.name, &result, start.elapsed());

                match result {
                    Err(e) if e.is_transient() => {
                        upstream.total_failures.fetch_add(1, Ordering::Relaxed);
                        debug!("{}: attempt {}/{} failed: {}", qname, attempt, self.attempts, e);
                        last_error = e;
                    }
                    other => return other,
                }
            }
        }

        warn!("{}: giving up after {} attempt(s): {}", qname, self.attempts, last_error);
        Err(last_error)
    }
}

/// Send a query over UDP and wait for the reply
async fn query_udp(upstream: &UpstreamState, query: &[u8]) -> Result<Vec<u8>, LookupError> {
    let bind_addr = if upstream.addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await.map_err(|e| upstream.io(e))?;
    socket.connect(upstream.addr).await.map_err(|e| upstream.io(e))?;
    socket.send(query).await.map_err(|e| upstream.io(e))?;

    let mut buf = vec![0u8; 4096];
    let len = tokio::time::timeout(upstream.timeout(), socket.recv(&mut buf))
        .await
        .map_err(|_| upstream.timed_out())?
        .map_err(|e| upstream.io(e))?;

    buf.truncate(len);
    Ok(buf)
}

/// Send a query over TCP (2-byte length prefix) and read one reply
async fn query_tcp(upstream: &UpstreamState, query: &[u8]) -> Result<Vec<u8>, LookupError> {
    let exchange = async {
        let mut stream = TcpStream::connect(upstream.addr).await?;
        stream.write_all(&(query.len() as u16).to_be_bytes()).await?;
        stream.write_all(query).await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let mut msg_buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut msg_buf).await?;
        Ok::<_, std::io::Error>(msg_buf)
    };

    tokio::time::timeout(upstream.timeout(), exchange)
        .await
        .map_err(|_| upstream.timed_out())?
        .map_err(|e| upstream.io(e))
}

/// Nameservers from /etc/resolv.conf, or a public fallback
fn system_upstreams() -> Vec<UpstreamConfig> {
    let upstreams = std::fs::read_to_string(RESOLV_CONF)
        .map(|content| parse_resolv_conf(&content))
        .unwrap_or_default();

    if upstreams.is_empty() {
        warn!("No nameservers in {}, falling back to {}", RESOLV_CONF, FALLBACK_NAMESERVER);
        return vec![UpstreamConfig {
            name: "fallback".into(),
            address: FALLBACK_NAMESERVER.into(),
            port: 53,
            timeout_ms: 2000,
        }];
    }
    upstreams
}

fn parse_resolv_conf(content: &str) -> Vec<UpstreamConfig> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            if fields.next()? != "nameserver" {
                return None;
            }
            // Drop an IPv6 zone index (fe80::1%eth0), IpAddr can't carry it
            let address = fields.next()?.split('%').next()?.to_string();
            address.parse::<IpAddr>().ok()?;
            Some(address)
        })
        .enumerate()
        .map(|(i, address)| UpstreamConfig {
            name: format!("system-{}", i + 1),
            address,
            port: 53,
            timeout_ms: 2000,
        })
        .collect()
}

/// In-memory CNAME data for exercising the walker and orchestrator.
#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    use super::{CnameLookup, LookupError};
    use crate::dns::name;

    #[derive(Default)]
    pub(crate) struct StaticResolver {
        records: HashMap<String, Vec<String>>,
        flaky: HashSet<String>,
        calls: RefCell<Vec<String>>,
    }

    impl StaticResolver {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn cname(mut self, from: &str, to: &str) -> Self {
            self.records.entry(name::normalize(from)).or_default().push(to.to_string());
            self
        }

        /// Lookups of `name` time out
        pub(crate) fn timeout(mut self, name: &str) -> Self {
            self.flaky.insert(name::normalize(name));
            self
        }

        pub(crate) fn calls_for(&self, name: &str) -> usize {
            self.calls.borrow().iter().filter(|c| *c == name).count()
        }

        pub(crate) fn total_calls(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl CnameLookup for StaticResolver {
        async fn lookup_cname(&self, name: &str) -> Result<Vec<String>, LookupError> {
            let name = name::normalize(name);
            self.calls.borrow_mut().push(name.clone());
            if self.flaky.contains(&name) {
                return Err(LookupError::Timeout {
                    upstream: "static".into(),
                    timeout_ms: 0,
                });
            }
            match self.records.get(&name) {
                Some(targets) => Ok(targets.clone()),
                None => Err(LookupError::NxDomain),
            }
        }
    }
}
