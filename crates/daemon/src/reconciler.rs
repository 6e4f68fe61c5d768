//! Reconciliation loop
//!
//! Periodically reads the persisted model and pushes the difference against
//! the last applied generation to the enforcement adapters.

use crate::adapters::{PacketFilter, PeerControl};
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use wgnet_common::db;
use wgnet_common::{AddressSet, Database, Device, Peer, PeerSet, User};

/// Result of one sub-reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied { added: usize, removed: usize },
    Failed { error: String },
}

impl SyncOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed { .. })
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Applied { added, removed } => write!(f, "+{} -{}", added, removed),
            SyncOutcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Per-set outcomes of a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub trust: SyncOutcome,
    pub managers: SyncOutcome,
    pub forward: SyncOutcome,
    pub peers: SyncOutcome,
}

impl TickReport {
    /// Names and errors of the sets that failed to apply
    pub fn failures(&self) -> Vec<(&'static str, &str)> {
        self.outcomes()
            .into_iter()
            .filter_map(|(name, outcome)| match outcome {
                SyncOutcome::Failed { error } => Some((name, error.as_str())),
                SyncOutcome::Applied { .. } => None,
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.outcomes().iter().all(|(_, o)| !o.is_failed())
    }

    fn outcomes(&self) -> [(&'static str, &SyncOutcome); 4] {
        [
            ("trust", &self.trust),
            ("manager", &self.managers),
            ("forward", &self.forward),
            ("peer", &self.peers),
        ]
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trust {}, manager {}, forward {}, peer {}",
            self.trust, self.managers, self.forward, self.peers
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum FilterSet {
    Trust,
    Managers,
    Forward,
}

impl FilterSet {
    fn name(self) -> &'static str {
        match self {
            FilterSet::Trust => "trust",
            FilterSet::Managers => "manager",
            FilterSet::Forward => "forward",
        }
    }

    async fn apply(
        self,
        filter: &dyn PacketFilter,
        removed: &[Ipv4Addr],
        added: &[Ipv4Addr],
    ) -> wgnet_common::Result<()> {
        match self {
            FilterSet::Trust => filter.update_trust(removed, added).await,
            FilterSet::Managers => filter.update_managers(removed, added).await,
            FilterSet::Forward => filter.update_forward(removed, added).await,
        }
    }
}

/// Reconciler owning the applied generation of every enforced set
pub struct Reconciler {
    db: Database,
    filter: Arc<dyn PacketFilter>,
    control: Arc<dyn PeerControl>,
    interval: Duration,
    trust: AddressSet,
    managers: AddressSet,
    forward: AddressSet,
    peers: PeerSet,
}

impl Reconciler {
    /// Create a new reconciler with empty baselines
    pub fn new(
        db: Database,
        filter: Arc<dyn PacketFilter>,
        control: Arc<dyn PeerControl>,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            filter,
            control,
            interval,
            trust: AddressSet::new(),
            managers: AddressSet::new(),
            forward: AddressSet::new(),
            peers: PeerSet::new(),
        }
    }

    /// Run the reconciliation loop until `shutdown` turns true or its
    /// sender goes away. An in-flight tick always completes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Reconciler started, interval {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                error!("Reconciliation error: {}", e);
            }
        }

        info!("Reconciler stopped");
    }

    /// One read-diff-apply-commit pass over all four sets.
    ///
    /// Adapter failures are recorded in the report and reset the affected
    /// set. A store failure ends the tick with an error; sets already
    /// applied in this tick keep their new generation.
    pub async fn tick(&mut self) -> wgnet_common::Result<TickReport> {
        let (trust, model) = self.db.read(|conn| {
            let trust = db::load_trust_set(conn)?;
            let model = db::load_users(conn).and_then(|users| Ok((users, db::load_devices(conn)?)));
            Ok((trust, model))
        })?;

        let trust = sync_addresses(&*self.filter, &mut self.trust, FilterSet::Trust, trust).await;

        let (users, devices) = match model {
            Ok(model) => model,
            Err(e) => {
                if let SyncOutcome::Failed { error } = &trust {
                    warn!("trust set not applied: {}", error);
                }
                return Err(e);
            }
        };

        let managers = sync_addresses(
            &*self.filter,
            &mut self.managers,
            FilterSet::Managers,
            manager_addresses(&users, &devices),
        )
        .await;

        let forward = sync_addresses(
            &*self.filter,
            &mut self.forward,
            FilterSet::Forward,
            forward_addresses(&devices),
        )
        .await;

        let peers = sync_peers(&*self.control, &mut self.peers, peers_from_devices(&devices)).await;

        let report = TickReport {
            trust,
            managers,
            forward,
            peers,
        };
        if report.is_clean() {
            debug!("Tick applied: {}", report);
        } else {
            warn!("Tick incomplete: {}", report);
        }
        Ok(report)
    }
}

async fn sync_addresses(
    filter: &dyn PacketFilter,
    set: &mut AddressSet,
    kind: FilterSet,
    desired: Vec<Ipv4Addr>,
) -> SyncOutcome {
    set.replace(desired);
    let added = set.added();
    let removed = set.removed();

    if added.is_empty() && removed.is_empty() {
        *set = set.copy();
        return SyncOutcome::Applied { added: 0, removed: 0 };
    }

    match kind.apply(filter, &removed, &added).await {
        Ok(()) => {
            debug!(set = kind.name(), added = added.len(), removed = removed.len(), "addresses applied");
            *set = set.copy();
            SyncOutcome::Applied {
                added: added.len(),
                removed: removed.len(),
            }
        }
        Err(e) => {
            warn!(set = kind.name(), "Failed to apply addresses: {}", e);
            *set = AddressSet::new();
            SyncOutcome::Failed { error: e.to_string() }
        }
    }
}

async fn sync_peers(control: &dyn PeerControl, set: &mut PeerSet, desired: Vec<Peer>) -> SyncOutcome {
    set.replace(desired);
    let added = set.added();
    let removed = set.removed();

    // Revoke before admitting
    let result = async {
        if !removed.is_empty() {
            control.remove_peers(&removed).await?;
        }
        if !added.is_empty() {
            control.set_peers(&added).await?;
        }
        Ok::<_, wgnet_common::Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            if !added.is_empty() || !removed.is_empty() {
                debug!(added = added.len(), removed = removed.len(), "peers applied");
            }
            *set = set.copy();
            SyncOutcome::Applied {
                added: added.len(),
                removed: removed.len(),
            }
        }
        Err(e) => {
            warn!(set = "peer", "Failed to apply peers: {}", e);
            *set = PeerSet::new();
            SyncOutcome::Failed { error: e.to_string() }
        }
    }
}

/// Addresses of devices owned by managers
pub fn manager_addresses(users: &[User], devices: &[Device]) -> Vec<Ipv4Addr> {
    let managers: HashSet<_> = users.iter().filter(|u| u.is_manager).map(|u| u.id).collect();
    devices
        .iter()
        .filter(|d| managers.contains(&d.user_id))
        .map(|d| d.address)
        .collect()
}

/// Addresses of devices allowed to forward to the WAN
pub fn forward_addresses(devices: &[Device]) -> Vec<Ipv4Addr> {
    devices.iter().filter(|d| d.wan_forward).map(|d| d.address).collect()
}

/// One peer per device, routed by its host address only
pub fn peers_from_devices(devices: &[Device]) -> Vec<Peer> {
    devices.iter().map(Device::to_peer).collect()
}
