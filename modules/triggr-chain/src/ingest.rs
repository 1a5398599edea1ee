//! The ingester: a supervisor that keeps one subscription task alive per
//! distinct registered contract address, reconnecting with exponential
//! backoff and full jitter. Decoded events go onto a bounded channel toward
//! the router; a full channel blocks the subscription task (backpressure,
//! never drop).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use triggr_registry::ProjectRegistry;

use crate::rpc::{BlockEvents, ChainClient};
use crate::scale;
use crate::types::DecodedEvent;

const RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Shared view of the ingester for diagnostics.
#[derive(Default)]
pub struct IngestStatus {
    connected: AtomicBool,
    blocks_seen: AtomicU64,
    decode_failures: AtomicU64,
}

impl IngestStatus {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn blocks_seen(&self) -> u64 {
        self.blocks_seen.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }
}

pub struct Ingester {
    chain_url: String,
    registry: Arc<ProjectRegistry>,
    intake: mpsc::Sender<DecodedEvent>,
    status: Arc<IngestStatus>,
}

impl Ingester {
    pub fn new(
        chain_url: String,
        registry: Arc<ProjectRegistry>,
        intake: mpsc::Sender<DecodedEvent>,
    ) -> Self {
        Self {
            chain_url,
            registry,
            intake,
            status: Arc::new(IngestStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<IngestStatus> {
        self.status.clone()
    }

    /// Supervisor loop. Periodically reconciles the set of subscription
    /// tasks against the registered contract addresses; exits when
    /// `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut tasks: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            let mut wanted: Vec<String> = self
                .registry
                .list_all()
                .await
                .iter()
                .map(|p| p.contract_address.clone())
                .collect();
            wanted.sort();
            wanted.dedup();

            tasks.retain(|contract, handle| {
                let keep = wanted.contains(contract) && !handle.is_finished();
                if !keep {
                    handle.abort();
                    info!(contract, "stopping contract subscription");
                }
                keep
            });

            for contract in wanted {
                if !tasks.contains_key(&contract) {
                    info!(contract, chain = %self.chain_url, "starting contract subscription");
                    tasks.insert(
                        contract.clone(),
                        tokio::spawn(contract_loop(
                            self.chain_url.clone(),
                            contract,
                            self.registry.clone(),
                            self.intake.clone(),
                            self.status.clone(),
                            shutdown.clone(),
                        )),
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(RESYNC_INTERVAL) => {}
                _ = shutdown.changed() => break,
            }
        }

        for (_, handle) in tasks {
            handle.abort();
        }
    }
}

/// One contract's subscription: connect, subscribe, pump blocks; on any
/// failure, back off and start over. Cancellation is observed between
/// blocks.
async fn contract_loop(
    chain_url: String,
    contract: String,
    registry: Arc<ProjectRegistry>,
    intake: mpsc::Sender<DecodedEvent>,
    status: Arc<IngestStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::default();

    loop {
        if *shutdown.borrow() {
            return;
        }

        match ChainClient::connect(&chain_url).await {
            Ok(client) => match client.subscribe_contract_events(&contract).await {
                Ok(mut subscription) => {
                    status.connected.store(true, Ordering::Relaxed);
                    backoff.reset();
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            next = subscription.next() => match next {
                                Some(Ok(block)) => {
                                    status.blocks_seen.fetch_add(1, Ordering::Relaxed);
                                    handle_block(&contract, block, &registry, &intake, &status)
                                        .await;
                                }
                                Some(Err(e)) => {
                                    warn!(contract, error = %e, "event subscription errored");
                                    break;
                                }
                                None => {
                                    warn!(contract, "event subscription closed by peer");
                                    break;
                                }
                            },
                        }
                    }
                    status.connected.store(false, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(contract, error = %e, "failed to subscribe to contract events");
                }
            },
            Err(e) => {
                warn!(contract, chain = %chain_url, error = %e, "chain connection failed");
            }
        }

        let delay = backoff.next_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Decode every event of one block for every project registered on this
/// contract. Decode failures are logged with the raw bytes and skipped; a
/// full intake channel blocks here by design.
async fn handle_block(
    contract: &str,
    block: BlockEvents,
    registry: &ProjectRegistry,
    intake: &mpsc::Sender<DecodedEvent>,
    status: &IngestStatus,
) {
    let projects = registry.find_by_contract(contract).await;
    if projects.is_empty() {
        return;
    }

    for raw in &block.events {
        if raw.contract != contract {
            continue;
        }
        let payload = match raw.payload() {
            Ok(payload) => payload,
            Err(e) => {
                status.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    contract,
                    block = block.block_number,
                    raw = %raw.data,
                    error = %e,
                    "undecodable event payload; skipping"
                );
                continue;
            }
        };

        for project in &projects {
            match scale::decode_event_payload(&project.event_schema, &payload) {
                Ok((name, fields)) => {
                    let event = DecodedEvent {
                        project: project.id,
                        name,
                        fields,
                        block_number: block.block_number,
                        extrinsic_index: raw.extrinsic_index,
                    };
                    if intake.send(event).await.is_err() {
                        // Router gone: the node is shutting down.
                        return;
                    }
                }
                Err(e) => {
                    status.decode_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        project = %project.id,
                        block = block.block_number,
                        raw = %raw.data,
                        error = %e,
                        "event decode failed; skipping"
                    );
                }
            }
        }
    }
}

/// Exponential backoff with full jitter: 1 s initial, 30 s cap.
struct Backoff {
    initial: Duration,
    cap: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            attempt: 0,
        }
    }
}

impl Backoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_delay(&mut self) -> Duration {
        let exp = self
            .initial
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        // Full jitter: uniform in [0, exp].
        let millis = rand::thread_rng().gen_range(0..=exp.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ceiling_is_respected() {
        let mut backoff = Backoff::default();
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(30));
        }
    }

    #[test]
    fn backoff_reset_restores_initial_window() {
        let mut backoff = Backoff::default();
        for _ in 0..10 {
            backoff.next_delay();
        }
        backoff.reset();
        // After reset the window is back to [0, 1s].
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_secs(1));
    }
}
