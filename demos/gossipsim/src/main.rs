use anyhow::{ensure, Result};
use clap::Parser;
use rand::Rng;
use rumorkv::types::Delta;
use rumorkv::{GossipAdapter, Gossiper, Node};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "gossipsim")]
#[command(about = "Simulate a lossy gossip cluster in-process", long_about = None)]
struct Cli {
    /// Number of simulated members
    #[arg(short, long, default_value_t = 5)]
    peers: u64,

    /// Rounds of writes authored by every member during the lossy phase
    #[arg(short, long, default_value_t = 20)]
    writes: usize,

    /// Probability that any single delivery is dropped
    #[arg(short, long, default_value_t = 0.2)]
    loss: f64,

    /// Cap on lossless drain rounds before giving up
    #[arg(long, default_value_t = 64)]
    max_drain_rounds: usize,
}

/// Every member drains its queue and broadcasts the payload to every
/// other member, each delivery dropped with probability `loss`.
fn broadcast_round(adapters: &[GossipAdapter], loss: f64, rng: &mut impl Rng) {
    for (i, sender) in adapters.iter().enumerate() {
        let src = sender.node().read().id;
        let payload = sender.node().write().encode();
        for (j, receiver) in adapters.iter().enumerate() {
            if i == j || rng.random_bool(loss) {
                continue;
            }
            receiver
                .on_gossip_broadcast(src, &payload)
                .expect("payload we encoded failed to decode");
        }
    }
}

/// Queue fresh repair requests for every counter still outstanding.
///
/// The flood retries nothing on its own: if the one repair request for a
/// gap is lost, the gap stays. Feeding the requests back through merge
/// puts them on the wire again (we cannot answer them ourselves, so they
/// are queued for forwarding).
fn reissue_repair_requests(adapters: &[GossipAdapter]) {
    for adapter in adapters {
        let mut requests = Vec::new();
        {
            let state = adapter.node().read();
            for origin in state.peers() {
                if let Some(view) = state.view(origin) {
                    for &counter in view.missed() {
                        requests.push(Delta::repair_request(origin, counter));
                    }
                }
            }
        }
        if !requests.is_empty() {
            debug!(
                id = adapter.node().read().id,
                count = requests.len(),
                "re-requesting outstanding counters"
            );
            adapter.node().write().merge(requests);
        }
    }
}

fn is_quiet(adapters: &[GossipAdapter]) -> bool {
    adapters.iter().all(|adapter| {
        let state = adapter.node().read();
        state.pending().is_empty()
            && state
                .peers()
                .iter()
                .all(|&origin| state.view(origin).map_or(true, |v| v.missed().is_empty()))
    })
}

/// Every member must observe exactly what each origin holds for itself.
fn verify_convergence(adapters: &[GossipAdapter]) -> Result<()> {
    for origin in adapters {
        let origin_id = origin.node().read().id;
        let reference = origin.node().read().scan_prefix(origin_id, "");
        for member in adapters {
            let observed = member.node().read().scan_prefix(origin_id, "");
            ensure!(
                observed == reference,
                "member {} disagrees with origin {origin_id}: {} vs {} keys",
                member.node().read().id,
                observed.len(),
                reference.len()
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    ensure!(cli.peers >= 2, "need at least two peers");
    ensure!((0.0..1.0).contains(&cli.loss), "loss must be in [0, 1)");

    let adapters: Vec<GossipAdapter> = (1..=cli.peers)
        .map(|id| GossipAdapter::new(Arc::new(Node::new(id))))
        .collect();
    let mut rng = rand::rng();

    info!(
        peers = cli.peers,
        writes = cli.writes,
        loss = cli.loss,
        "starting lossy phase"
    );
    for round in 0..cli.writes {
        for adapter in &adapters {
            let id = adapter.node().read().id;
            adapter
                .node()
                .write()
                .set(format!("metric/{round}"), format!("{id}-{round}"));
        }
        broadcast_round(&adapters, cli.loss, &mut rng);
    }

    // One final write per member: the fresh counter exposes any trailing
    // gap the lossy phase left behind, once it arrives intact.
    for adapter in &adapters {
        adapter.node().write().set("epoch/final", "done");
    }

    let mut rounds = 0;
    loop {
        reissue_repair_requests(&adapters);
        broadcast_round(&adapters, 0.0, &mut rng);
        rounds += 1;
        if is_quiet(&adapters) {
            break;
        }
        ensure!(
            rounds < cli.max_drain_rounds,
            "cluster failed to quiesce after {rounds} rounds"
        );
    }
    info!(rounds, "cluster quiesced");

    verify_convergence(&adapters)?;
    for adapter in &adapters {
        let status = adapter.node().status();
        info!(
            id = status.id,
            origins = status.peers.len(),
            "member converged"
        );
    }
    info!("all members agree on every namespace");
    Ok(())
}
