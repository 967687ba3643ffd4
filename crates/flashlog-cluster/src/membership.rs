//! SWIM-style membership: periodic direct probes with push-pull of the whole
//! member table, indirect probes through other members, suspicion with
//! timeouts, and incarnation numbers so a node can refute rumours about itself.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use flashlog::config::GossipConfig;
use flashlog::group::Shutdown;
use futures_util::future::join_all;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::client::GossipClient;
use crate::error::ClusterError;
use crate::proto::gossip_server::GossipServer as GrpcGossipServer;
use crate::proto::{MemberState, PingReqRequest, PingRequest, PingResponse};
use crate::server::GossipServer;
use crate::traits::{GossipService, MembershipView};
use crate::types::{ClusterView, NodeId, Peer, PeerStatus, Role};

struct Entry {
    peer: Peer,
    changed_at: Instant,
}

struct MemberTable {
    members: HashMap<NodeId, Entry>,
    probe_order: Vec<NodeId>,
}

pub struct Membership {
    local_id: NodeId,
    config: GossipConfig,
    table: Mutex<MemberTable>,
    view: RwLock<Arc<ClusterView>>,
    clients: Mutex<HashMap<String, GossipClient>>,
}

impl Membership {
    pub fn new(
        node_id: NodeId,
        role: Role,
        api_addr: String,
        gossip_addr: String,
        config: GossipConfig,
    ) -> Arc<Self> {
        let local = Peer {
            node_id: node_id.clone(),
            role,
            api_addr,
            gossip_addr,
            incarnation: 0,
            status: PeerStatus::Alive,
        };
        let view = ClusterView::new(node_id.clone(), vec![local.clone()]);
        let mut members = HashMap::new();
        members.insert(
            node_id.clone(),
            Entry {
                peer: local,
                changed_at: Instant::now(),
            },
        );

        Arc::new(Membership {
            local_id: node_id,
            config,
            table: Mutex::new(MemberTable {
                members,
                probe_order: Vec::new(),
            }),
            view: RwLock::new(Arc::new(view)),
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Bind the gossip listener and create the membership for this node,
    /// advertising the bound gossip address and `api_addr`.
    #[tracing::instrument(level = "info", skip(config), fields(role = %role, bind = %config.bind_addr))]
    pub async fn bind(
        role: Role,
        api_addr: SocketAddr,
        config: GossipConfig,
    ) -> Result<(Arc<Self>, TcpListener), ClusterError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|e| ClusterError::from_io_error(e, "bind gossip listener"))?;
        let bound = listener
            .local_addr()
            .map_err(|e| ClusterError::from_io_error(e, "gossip listener address"))?;

        let gossip_addr = config.advertised(bound).to_string();
        let api_addr = config.advertised(api_addr).to_string();
        let node_id = NodeId::generate();
        info!("Node {node_id} ({role}) gossiping on {gossip_addr}, serving API on {api_addr}");

        let membership = Self::new(node_id, role, api_addr, gossip_addr, config);
        Ok((membership, listener))
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn local_peer(&self) -> Peer {
        let table = self.table.lock();
        table.members[&self.local_id].peer.clone()
    }

    fn wire_members(&self) -> Vec<MemberState> {
        self.current_view()
            .members
            .iter()
            .map(MemberState::from)
            .collect()
    }

    fn ping_request(&self) -> PingRequest {
        PingRequest {
            from_node_id: self.local_id.0.clone(),
            members: self.wire_members(),
        }
    }

    fn publish(&self, table: &MemberTable) {
        let members = table.members.values().map(|e| e.peer.clone()).collect();
        *self.view.write() = Arc::new(ClusterView::new(self.local_id.clone(), members));
    }

    /// Merge member states received from a peer. Returns how many entries changed.
    pub fn merge_remote(&self, states: Vec<MemberState>) -> usize {
        let now = Instant::now();
        let mut table = self.table.lock();
        let mut changed = 0;
        for state in states {
            match Peer::try_from(state) {
                Ok(peer) => {
                    if self.apply(&mut table, peer, now) {
                        changed += 1;
                    }
                }
                Err(e) => warn!("Ignoring member state: {e}"),
            }
        }
        if changed > 0 {
            self.publish(&table);
        }
        changed
    }

    fn apply(&self, table: &mut MemberTable, peer: Peer, now: Instant) -> bool {
        if peer.node_id == self.local_id {
            return self.refute_if_needed(table, &peer, now);
        }

        match table.members.get_mut(&peer.node_id) {
            Some(entry) => {
                if !entry.peer.is_superseded_by(&peer) {
                    return false;
                }
                if entry.peer.status != peer.status {
                    info!(
                        "Member {} ({}) is now {:?}",
                        peer.node_id, peer.role, peer.status
                    );
                }
                entry.peer = peer;
                entry.changed_at = now;
                true
            }
            None if peer.status.is_live() => {
                info!(
                    "Member {} ({}) joined at {}",
                    peer.node_id, peer.role, peer.gossip_addr
                );
                table.members.insert(
                    peer.node_id.clone(),
                    Entry {
                        peer,
                        changed_at: now,
                    },
                );
                true
            }
            None => false,
        }
    }

    fn refute_if_needed(&self, table: &mut MemberTable, rumour: &Peer, now: Instant) -> bool {
        let Some(local) = table.members.get_mut(&self.local_id) else {
            return false;
        };
        let leaving = local.peer.status == PeerStatus::Left;
        if leaving || rumour.status == PeerStatus::Alive || rumour.incarnation < local.peer.incarnation
        {
            return false;
        }
        local.peer.incarnation = rumour.incarnation + 1;
        local.changed_at = now;
        info!(
            "Refuting {:?} rumour about {}, incarnation now {}",
            rumour.status, self.local_id, local.peer.incarnation
        );
        true
    }

    fn mark_suspect(&self, node_id: &NodeId) {
        let mut table = self.table.lock();
        let Some(entry) = table.members.get_mut(node_id) else {
            return;
        };
        if entry.peer.status != PeerStatus::Alive {
            return;
        }
        entry.peer.status = PeerStatus::Suspect;
        entry.changed_at = Instant::now();
        warn!("Member {node_id} did not answer probes, marking suspect");
        self.publish(&table);
    }

    /// Promote overdue suspects to dead and forget long-dead or departed members.
    pub fn expire(&self) {
        let now = Instant::now();
        let mut table = self.table.lock();
        let mut changed = false;
        let mut forgotten = Vec::new();

        for entry in table.members.values_mut() {
            if entry.peer.node_id == self.local_id {
                continue;
            }
            let age = now.saturating_duration_since(entry.changed_at);
            if entry.peer.status == PeerStatus::Suspect && age >= self.config.suspicion_timeout {
                warn!("Member {} declared dead", entry.peer.node_id);
                entry.peer.status = PeerStatus::Dead;
                entry.changed_at = now;
                changed = true;
            } else if !entry.peer.status.is_live() && age >= self.config.dead_reap_timeout {
                forgotten.push((entry.peer.node_id.clone(), entry.peer.gossip_addr.clone()));
            }
        }

        if !forgotten.is_empty() {
            let mut clients = self.clients.lock();
            for (node_id, gossip_addr) in forgotten {
                debug!("Forgetting member {node_id}");
                table.members.remove(&node_id);
                clients.remove(&gossip_addr);
            }
            changed = true;
        }
        if changed {
            self.publish(&table);
        }
    }

    fn client_for(&self, addr: &str) -> Result<GossipClient, ClusterError> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(addr) {
            return Ok(client.clone());
        }
        // Indirect probes wait for the helper's own probe, so allow two rounds.
        let client = GossipClient::connect_lazy(addr, self.config.ping_timeout * 2)?;
        clients.insert(addr.to_string(), client.clone());
        Ok(client)
    }

    async fn ping_addr(&self, addr: &str) -> Result<PingResponse, ClusterError> {
        let mut client = self.client_for(addr)?;
        let request = self.ping_request();
        match tokio::time::timeout(self.config.ping_timeout, client.ping(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClusterError::Timeout {
                peer: addr.to_string(),
            }),
        }
    }

    fn next_probe_target(&self) -> Option<Peer> {
        let mut table = self.table.lock();
        loop {
            if table.probe_order.is_empty() {
                let mut order: Vec<NodeId> = table
                    .members
                    .values()
                    .filter(|e| e.peer.node_id != self.local_id && e.peer.status.is_live())
                    .map(|e| e.peer.node_id.clone())
                    .collect();
                if order.is_empty() {
                    return None;
                }
                order.shuffle(&mut rand::thread_rng());
                table.probe_order = order;
            }
            let candidate = table.probe_order.pop()?;
            match table.members.get(&candidate) {
                Some(entry) if entry.peer.status.is_live() => return Some(entry.peer.clone()),
                _ => continue,
            }
        }
    }

    fn indirect_helpers(&self, target: &NodeId) -> Vec<Peer> {
        let view = self.current_view();
        let mut helpers: Vec<Peer> = view
            .live_remote()
            .into_iter()
            .filter(|p| &p.node_id != target)
            .cloned()
            .collect();
        helpers.shuffle(&mut rand::thread_rng());
        helpers.truncate(self.config.indirect_probes);
        helpers
    }

    async fn indirect_probe(&self, target: &Peer) -> bool {
        let helpers = self.indirect_helpers(&target.node_id);
        if helpers.is_empty() {
            return false;
        }

        let attempts = helpers.iter().map(|helper| async move {
            let mut client = self.client_for(&helper.gossip_addr)?;
            let request = PingReqRequest {
                from_node_id: self.local_id.0.clone(),
                target_gossip_addr: target.gossip_addr.clone(),
                members: self.wire_members(),
            };
            match tokio::time::timeout(self.config.ping_timeout * 2, client.ping_req(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(ClusterError::Timeout {
                    peer: helper.gossip_addr.clone(),
                }),
            }
        });

        let mut reached = false;
        for result in join_all(attempts).await {
            if let Ok(response) = result {
                self.merge_remote(response.members);
                reached = true;
            }
        }
        reached
    }

    /// One protocol period: probe a member, fall back to indirect probes,
    /// then age suspicions.
    pub async fn probe_once(&self) {
        match self.next_probe_target() {
            None => {
                self.contact_seeds().await;
            }
            Some(target) => match self.ping_addr(&target.gossip_addr).await {
                Ok(response) => {
                    self.merge_remote(response.members);
                }
                Err(e) => {
                    debug!("Direct probe of {} failed: {e}", target.node_id);
                    if !self.indirect_probe(&target).await {
                        self.mark_suspect(&target.node_id);
                    }
                }
            },
        }
        self.expire();
    }

    /// Push-pull with every configured seed. Returns how many answered.
    pub async fn contact_seeds(&self) -> usize {
        let own = self.local_peer().gossip_addr;
        let seeds: Vec<&String> = self.config.peers.iter().filter(|s| **s != own).collect();
        let mut reached = 0;
        for seed in seeds {
            match self.ping_addr(seed).await {
                Ok(response) => {
                    self.merge_remote(response.members);
                    reached += 1;
                }
                Err(e) => debug!("Seed {seed} unreachable: {e}"),
            }
        }
        reached
    }

    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: Shutdown,
    ) -> Result<(), ClusterError> {
        Server::builder()
            .add_service(GrpcGossipServer::new(GossipServer::new(self)))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await
            })
            .await
            .map_err(|e| ClusterError::from_transport_error(e, "gossip server"))
    }

    /// Join through the seeds, then probe once per gossip interval until shutdown.
    pub async fn probe_loop(self: Arc<Self>, shutdown: Shutdown) -> Result<(), ClusterError> {
        let reached = self.contact_seeds().await;
        info!(
            "Joined cluster through {reached} of {} seeds, {} members known",
            self.config.peers.len(),
            self.current_view().members.len()
        );

        let mut ticker = tokio::time::interval(self.config.gossip_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.probe_once().await,
            }
        }
        Ok(())
    }

    /// Announce departure to every live member, bounded by the leave timeout.
    #[tracing::instrument(level = "info", skip(self), fields(node = %self.local_id))]
    pub async fn leave(&self) {
        {
            let mut table = self.table.lock();
            if let Some(local) = table.members.get_mut(&self.local_id) {
                local.peer.incarnation += 1;
                local.peer.status = PeerStatus::Left;
                local.changed_at = Instant::now();
            }
            self.publish(&table);
        }

        let view = self.current_view();
        let pushes = view.live_remote().into_iter().map(|peer| async move {
            if let Err(e) = self.ping_addr(&peer.gossip_addr).await {
                debug!("Could not announce departure to {}: {e}", peer.node_id);
            }
        });
        if tokio::time::timeout(self.config.leave_timeout, join_all(pushes))
            .await
            .is_err()
        {
            warn!("Leave announcement timed out");
        }
        info!("Left cluster");
    }

    pub fn leave_timeout(&self) -> Duration {
        self.config.leave_timeout
    }
}

impl MembershipView for Membership {
    fn current_view(&self) -> Arc<ClusterView> {
        Arc::clone(&self.view.read())
    }
}

#[async_trait]
impl GossipService for Membership {
    async fn handle_ping(&self, request: PingRequest) -> Result<PingResponse, ClusterError> {
        self.merge_remote(request.members);
        Ok(PingResponse {
            node_id: self.local_id.0.clone(),
            members: self.wire_members(),
        })
    }

    async fn handle_ping_req(&self, request: PingReqRequest) -> Result<PingResponse, ClusterError> {
        self.merge_remote(request.members);
        let response = self.ping_addr(&request.target_gossip_addr).await?;
        self.merge_remote(response.members.clone());
        Ok(response)
    }
}
