//! Threaded cluster bootstrap.
//!
//! Spawns one thread per peer, each owning its engine and a clone of the
//! protected store, and tears the cluster down once every peer has used up
//! its entry quota. A peer past its quota keeps servicing others' traffic
//! until the shared shutdown flag is raised; the flag is raised by the last
//! peer to finish, at which point no request can still be outstanding.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info};

use crate::errors::ProtocolError;
use crate::protocol::message::PeerId;
use crate::protocol::peer::{CriticalSection, PeerEngine, PeerPhase};
use crate::store::{SlotEntry, SlotStore};
use crate::trace::{shared_history, Checker, CheckResult, Recorded, SharedHistory};
use crate::transport::MeshNetwork;

/// Cluster-wide configuration, opaque to the protocol itself.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of peers, ids `1..=num_peers`.
    pub num_peers: u32,
    /// Critical-section entries each peer performs.
    pub entry_limit: u32,
    /// Bounds (milliseconds) of the simulated work per entry.
    pub hold_ms: Range<u64>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        // The demonstration scale of the toy system: three peers, five
        // entries each, work lasting 100-2000 ms.
        ClusterConfig {
            num_peers: 3,
            entry_limit: 5,
            hold_ms: 100..2000,
        }
    }
}

/// Handle to one running peer thread.
pub struct PeerHandle {
    /// The peer this handle controls.
    pub peer_id: PeerId,
    thread: Option<JoinHandle<Result<(), ProtocolError>>>,
}

impl PeerHandle {
    /// Join the peer thread, surfacing its protocol outcome.
    pub fn join(mut self) -> Result<(), ProtocolError> {
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| {
                    Err(ProtocolError::invariant(
                        self.peer_id,
                        "peer thread panicked",
                    ))
                }),
            None => Ok(()),
        }
    }
}

/// Outcome of a whole-cluster run.
pub struct ClusterOutcome {
    /// Final store rows, ordered by peer id.
    pub slots: Vec<SlotEntry>,
    /// Checker verdict over the recorded admission history.
    pub check: CheckResult,
}

/// Spawn one peer thread driving `engine` until the shutdown flag is set.
///
/// The thread services the protocol in every phase; `remaining` counts peers
/// still under quota, and the thread that drops it to zero raises the flag.
pub fn spawn_peer<S>(
    mut engine: PeerEngine,
    mut section: S,
    shutdown: Arc<AtomicBool>,
    remaining: Arc<AtomicU32>,
) -> PeerHandle
where
    S: CriticalSection + Send + 'static,
{
    let peer_id = engine.id();

    let thread = thread::Builder::new()
        .name(format!("peer-{}", peer_id))
        .spawn(move || {
            debug!("peer {} thread started", peer_id);

            while !shutdown.load(Ordering::SeqCst) {
                match engine.phase() {
                    PeerPhase::Idle => {
                        engine.request_entry()?;
                    }
                    PeerPhase::WaitingAcks => {
                        engine.process_all()?;
                        if engine.ready_to_enter() {
                            engine.enter(&mut section)?;
                            if engine.is_done()
                                && remaining.fetch_sub(1, Ordering::SeqCst) == 1
                            {
                                // Every peer has met its quota; nothing can
                                // be pending, so the whole system comes down.
                                info!("peer {} is the last to finish, shutting down", peer_id);
                                shutdown.store(true, Ordering::SeqCst);
                            }
                        } else {
                            engine.poll()?;
                        }
                    }
                    PeerPhase::Done => {
                        // Others' liveness depends on us answering their
                        // requests and applying their releases.
                        engine.poll()?;
                    }
                }
            }

            debug!("peer {} thread exiting", peer_id);
            Ok(())
        })
        .expect("failed to spawn peer thread");

    PeerHandle {
        peer_id,
        thread: Some(thread),
    }
}

/// Build the mesh, run the full cluster to completion, and check the run.
pub fn run_cluster(config: &ClusterConfig) -> Result<ClusterOutcome, ProtocolError> {
    info!(
        "starting cluster: {} peers, {} entries each",
        config.num_peers, config.entry_limit
    );

    let mut mesh = MeshNetwork::new(config.num_peers);
    let store = SlotStore::new(config.num_peers, config.hold_ms.clone());

    // With no entries to perform there is no protocol traffic at all.
    if config.entry_limit == 0 {
        return Ok(ClusterOutcome {
            slots: store.snapshot(),
            check: CheckResult::default(),
        });
    }

    let history: SharedHistory = shared_history();
    let shutdown = Arc::new(AtomicBool::new(false));
    let remaining = Arc::new(AtomicU32::new(config.num_peers));

    let mut handles = Vec::with_capacity(config.num_peers as usize);
    for peer_id in 1..=config.num_peers {
        let endpoint = mesh
            .endpoint(peer_id)
            .expect("endpoint already taken for peer");
        let engine = PeerEngine::new(peer_id, config.num_peers, config.entry_limit, endpoint);
        let section = Recorded::new(store.clone(), history.clone());
        handles.push(spawn_peer(
            engine,
            section,
            shutdown.clone(),
            remaining.clone(),
        ));
    }

    let mut first_error = None;
    for handle in handles {
        if let Err(e) = handle.join() {
            // Keep joining the rest so no thread is left dangling.
            shutdown.store(true, Ordering::SeqCst);
            first_error.get_or_insert(e);
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    let check = Checker::new(config.num_peers, config.entry_limit)
        .check(&history.lock().expect("history mutex poisoned"));

    Ok(ClusterOutcome {
        slots: store.snapshot(),
        check,
    })
}
