// src/core/membership/discovery.rs

//! Background peer discovery against the overlay.
//!
//! When no bootstrap peers are configured, the agent periodically asks the
//! overlay for reachable peers and attempts to join any that are not
//! already gossip members. Addresses that failed recently are left alone
//! for a back-off window.

use crate::core::membership::Membership;
use crate::core::overlay::OverlayProvider;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, info, warn};

/// Default interval between overlay enumerations.
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
/// An address is not retried before this much time has passed.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Runs the discovery loop until shutdown.
pub async fn run(
    membership: Arc<dyn Membership>,
    overlay: Arc<dyn OverlayProvider>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!(
        "Peer discovery loop started (interval {:?}, retry back-off {:?})",
        interval, RETRY_BACKOFF
    );
    let mut attempted: HashMap<SocketAddr, Instant> = HashMap::new();
    let mut tick = time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Peer discovery loop shutting down.");
                return;
            }
            _ = tick.tick() => {
                let peers = match overlay.peers().await {
                    Ok(peers) => peers,
                    Err(e) => {
                        warn!("Overlay peer enumeration failed: {e}");
                        continue;
                    }
                };

                let member_addrs: Vec<SocketAddr> =
                    membership.members().iter().map(|m| m.addr).collect();
                let now = Instant::now();
                attempted.retain(|_, at| now.duration_since(*at) < RETRY_BACKOFF);

                let candidates: Vec<SocketAddr> = peers
                    .into_iter()
                    .filter(|p| !member_addrs.contains(p))
                    .filter(|p| !attempted.contains_key(p))
                    .collect();
                if candidates.is_empty() {
                    continue;
                }

                debug!("Attempting to join {} discovered peer(s)", candidates.len());
                for addr in &candidates {
                    attempted.insert(*addr, now);
                }
                match membership.join(&candidates).await {
                    Ok(0) => debug!("No discovered peers answered the join"),
                    Ok(n) => info!("Joined {n} peer(s) via overlay discovery"),
                    Err(e) => warn!("Discovery join failed: {e}"),
                }
            }
        }
    }
}
