use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::{net::TcpStream, task::JoinSet, time::timeout};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    #[default]
    Ftp,
    Sftp,
    Ssh,
    Other,
}

impl Protocol {
    pub fn port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
            Protocol::Ftp => 21,
            Protocol::Sftp | Protocol::Ssh => 22,
            Protocol::Other => 1,
        }
    }
}

/// Result of probing one candidate host.
#[derive(Clone, Debug, PartialEq)]
pub struct Probe {
    pub host: String,
    pub latency: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mirror {
    pub host: String,
    pub latency: Duration,
}

pub async fn probe(host: &str, port: u16, limit: Duration) -> Probe {
    let start = Instant::now();

    let latency = match timeout(limit, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            let latency = start.elapsed();
            drop(stream);
            debug!("mirror {} answered in {:?}", host, latency);
            Some(latency)
        }
        Ok(Err(err)) => {
            warn!("mirror {} unreachable: {}", host, err);
            None
        }
        Err(_) => {
            warn!("mirror {} timed out after {:?}", host, limit);
            None
        }
    };

    Probe {
        host: host.to_string(),
        latency,
    }
}

pub async fn probe_all(hosts: &[String], port: u16, limit: Duration) -> Vec<Probe> {
    let mut probes = JoinSet::new();

    for host in hosts {
        let host = host.clone();
        probes.spawn(async move { probe(&host, port, limit).await });
    }

    let mut results = vec![];

    while let Some(result) = probes.join_next().await {
        match result {
            Ok(probe) => results.push(probe),
            Err(err) => warn!("mirror probe task failed: {}", err),
        }
    }

    results
}

/// Picks the host at `rank` (1 = fastest) among reachable probes.
///
/// A rank past the last reachable host clamps to the slowest one.
pub fn rank_probes(probes: Vec<Probe>, rank: usize) -> Option<Mirror> {
    let mut reachable: Vec<Mirror> = probes
        .into_iter()
        .filter_map(|probe| {
            probe.latency.map(|latency| Mirror {
                host: probe.host,
                latency,
            })
        })
        .collect();

    if reachable.is_empty() {
        return None;
    }

    reachable.sort_by_key(|mirror| mirror.latency);

    let index = rank.clamp(1, reachable.len()) - 1;

    Some(reachable.swap_remove(index))
}

pub async fn select_mirror_on_port(
    hosts: &[String],
    rank: usize,
    port: u16,
    limit: Duration,
) -> Option<Mirror> {
    let mirror = rank_probes(probe_all(hosts, port, limit).await, rank);

    if mirror.is_none() {
        warn!("no mirror available");
    }

    mirror
}

pub async fn select_mirror(
    hosts: &[String],
    rank: usize,
    protocol: Protocol,
    limit: Duration,
) -> Option<Mirror> {
    select_mirror_on_port(hosts, rank, protocol.port(), limit).await
}
