//! [`RingNode`]: one member of the ring.
//!
//! The node routes client operations to the owner of their key, runs the join
//! and leave handshakes, and answers the calls its peers make while they do
//! the same.

use {
    crate::{
        RingError,
        RingResult,
        config::NodeConfig,
        identity::NodeIdentity,
        rebalance,
        ring::{Ring, RingPos},
        service::{JoinResponse, MembershipChange, Operation, RingService},
        state::{NodeState, Phase},
        storage::StorageService,
        transport::{ServerHandle, Transport},
    },
    parking_lot::{Mutex, RwLock},
    std::{fmt, future::Future, hash::BuildHasher, sync::Arc, time::Duration},
    tokio::{sync::OwnedMutexGuard, task::JoinSet},
    tracing::{debug, error, info, warn},
};

/// A node of the ring.
///
/// Cheap to clone: clones are handles to the same node.
///
/// Ring state is guarded by a short-lived lock that is never held across a
/// call to a peer. Join and leave sequences handled by this node are
/// additionally serialized by a topology lock, which stays taken until the
/// rebalancing triggered by a join is over.
pub struct RingNode<H = crate::hash::RingHasher> {
    inner: Arc<Inner<H>>,
}

struct Inner<H> {
    config: NodeConfig,
    ring: Ring<H>,
    state: RwLock<NodeState>,
    topology: Arc<tokio::sync::Mutex<()>>,
    storage: Arc<dyn StorageService>,
    transport: Arc<dyn Transport>,
    server: Mutex<Option<ServerHandle>>,
}

impl<H> Clone for RingNode<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H> fmt::Debug for RingNode<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("RingNode")
            .field("identity", state.identity())
            .field("phase", &state.phase())
            .field("predecessor", &state.predecessor())
            .field("members", &state.membership().size())
            .finish()
    }
}

impl<H> RingNode<H>
where
    H: BuildHasher + Send + Sync + 'static,
{
    /// Assembles a node out of validated parts. See
    /// [`NodeBuilder`](crate::NodeBuilder).
    pub(crate) fn new(
        config: NodeConfig,
        ring: Ring<H>,
        storage: Arc<dyn StorageService>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let identity = NodeIdentity::new(config.host.clone(), config.port, &ring);
        Self {
            inner: Arc::new(Inner {
                config,
                ring,
                state: RwLock::new(NodeState::new(identity)),
                topology: Arc::new(tokio::sync::Mutex::new(())),
                storage,
                transport,
                server: Mutex::new(None),
            }),
        }
    }

    /// Identity this node joins the ring with.
    pub fn identity(&self) -> NodeIdentity {
        self.inner.state.read().identity().clone()
    }

    /// Configuration the node was built with.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Ring the node places identities and keys on.
    pub fn ring(&self) -> &Ring<H> {
        &self.inner.ring
    }

    /// Local store of this node.
    pub fn storage(&self) -> &Arc<dyn StorageService> {
        &self.inner.storage
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.read().phase()
    }

    /// Snapshot of the node's ring state.
    pub fn state(&self) -> NodeState {
        self.inner.state.read().clone()
    }

    /// Ring position of a key.
    pub fn position(&self, key: &str) -> RingPos {
        self.inner.ring.position(key)
    }

    /// Whether this node currently owns the given ring position.
    pub fn is_belong_me(&self, pos: RingPos) -> bool {
        self.inner.state.read().is_belong_me(pos)
    }

    /// Starts serving and takes the node into the ring.
    ///
    /// Without an introducer the node forms a new ring on its own. Otherwise
    /// it joins through the introducer and becomes stable once the
    /// introducer's answer is installed. On failure the node is back in the
    /// [`Created`](Phase::Created) phase and `start` may be called again.
    pub async fn start(&self) -> RingResult<()> {
        let me = {
            let mut state = self.inner.state.write();
            if state.phase() != Phase::Created {
                return Err(RingError::InvalidPhase {
                    phase: state.phase(),
                });
            }
            state.set_phase(Phase::Joining);
            state.identity().clone()
        };

        let service: Arc<dyn RingService> = Arc::new(self.clone());
        let server = match self.inner.transport.serve(&me, service).await {
            Ok(server) => server,
            Err(err) => {
                self.set_phase(Phase::Created);
                return Err(err.into());
            }
        };
        *self.inner.server.lock() = Some(server);

        let Some((host, port)) = self.inner.config.introducer.clone() else {
            self.set_phase(Phase::Stable);
            info!(node = %me, ring_len = self.inner.ring.len(), "started a new ring");
            return Ok(());
        };

        let introducer = NodeIdentity::new(host, port, &self.inner.ring);
        if let Err(err) = self.join_via(&introducer).await {
            warn!(node = %me, %introducer, error = %err, "failed to join the ring");
            let server = self.inner.server.lock().take();
            if let Some(server) = server {
                server.stop().await;
            }
            self.set_phase(Phase::Created);
            return Err(err);
        }
        Ok(())
    }

    async fn join_via(&self, introducer: &NodeIdentity) -> RingResult<()> {
        let me = self.identity();
        info!(node = %me, %introducer, "joining ring");

        let joining = me.clone();
        let response = self
            .remote_within(introducer, self.inner.config.join_timeout(), |peer| async move {
                peer.join_ring(joining).await
            })
            .await?;

        let mut state = self.inner.state.write();
        // Keep whatever peers announced while the answer was in flight.
        let announced = state.membership().to_vec();
        let members = response
            .membership
            .into_iter()
            .chain(announced)
            .filter(|member| *member != me);
        state.membership_mut().replace_all(members);
        // A predecessor set by a later join is newer than the answer's.
        if state.predecessor().is_none() {
            state.set_predecessor(response.predecessor.filter(|pred| *pred != me));
        }
        state.set_phase(Phase::Stable);
        info!(
            node = %me,
            members = state.membership().size(),
            predecessor = ?state.predecessor().map(NodeIdentity::addr),
            "joined ring"
        );
        Ok(())
    }

    /// Waits until the node is stable.
    ///
    /// The stability flag is checked up to `max_stable_polls` times with
    /// `stable_poll_interval` between checks. Fails with
    /// [`ClusterJoinTimeout`](RingError::ClusterJoinTimeout) right after the
    /// last pause if the node is still unstable, and with
    /// [`NodeUnavailable`](RingError::NodeUnavailable) as soon as the node is
    /// found not running.
    pub async fn wait_stable(&self) -> RingResult<()> {
        let polls = self.inner.config.max_stable_polls;
        let interval = self.inner.config.stable_poll_interval;
        for _ in 0..polls {
            if self.check_stable()? {
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }
        if self.check_stable()? {
            return Ok(());
        }
        warn!(node = %self.identity(), polls, "node did not stabilize");
        Err(RingError::ClusterJoinTimeout { polls })
    }

    fn check_stable(&self) -> RingResult<bool> {
        let phase = self.phase();
        if !phase.is_running() {
            return Err(RingError::NodeUnavailable);
        }
        Ok(phase.is_stable())
    }

    /// Leaves the ring and shuts the node down.
    ///
    /// Every known member is told to forget this node and the successor
    /// adopts this node's predecessor. Stored pairs are not handed over: keys
    /// owned by this node become unreachable.
    pub async fn leave(&self) -> RingResult<()> {
        self.wait_stable().await?;
        let _topology = self.inner.topology.lock().await;

        let (me, members, successor, predecessor) = {
            let mut state = self.inner.state.write();
            if !state.is_stable() {
                return Err(RingError::InvalidPhase {
                    phase: state.phase(),
                });
            }
            state.set_phase(Phase::Leaving);
            (
                state.identity().clone(),
                state.membership().to_vec(),
                state.successor().cloned(),
                state.predecessor().cloned(),
            )
        };
        info!(node = %me, members = members.len(), "leaving ring");

        self.broadcast(&members, MembershipChange::Leave, &me).await;
        if let Some(successor) = successor {
            let leaving = me.clone();
            let notified = self
                .remote(&successor, |peer| async move {
                    peer.leave_ring(leaving, predecessor).await
                })
                .await;
            if let Err(err) = notified {
                warn!(node = %me, %successor, error = %err, "successor not notified of leave");
            }
        }
        self.inner
            .state
            .write()
            .membership_mut()
            .replace_all(Vec::new());

        match self.inner.storage.count() {
            Ok(abandoned) if abandoned > 0 => {
                warn!(node = %me, abandoned, "stored pairs are not handed over on leave");
            }
            Ok(_) => {}
            Err(err) => warn!(node = %me, error = %err, "failed to scan storage on leave"),
        }
        self.shutdown().await
    }

    /// Stops serving and releases the storage, without telling anyone.
    ///
    /// Calling it on a node that is already shut down does nothing.
    pub async fn shutdown(&self) -> RingResult<()> {
        {
            let mut state = self.inner.state.write();
            if state.phase() == Phase::Destroyed {
                return Ok(());
            }
            state.set_phase(Phase::Destroyed);
        }
        let server = self.inner.server.lock().take();
        if let Some(server) = server {
            server.stop().await;
        }
        self.inner.storage.destroy()?;
        info!(node = %self.identity(), "node shut down");
        Ok(())
    }

    /// Stores `value` under `key`.
    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) -> RingResult<()> {
        self.exec(key.into(), Some(value.into()), Operation::Put)
            .await
            .map(|_| ())
    }

    /// Concatenates `value` onto the value stored under `key`.
    pub async fn append(&self, key: impl Into<String>, value: impl Into<String>) -> RingResult<()> {
        self.exec(key.into(), Some(value.into()), Operation::Append)
            .await
            .map(|_| ())
    }

    pub async fn get(&self, key: impl Into<String>) -> RingResult<Option<String>> {
        self.exec(key.into(), None, Operation::Get).await
    }

    pub async fn delete(&self, key: impl Into<String>) -> RingResult<()> {
        self.exec(key.into(), None, Operation::Delete)
            .await
            .map(|_| ())
    }

    /// Applies the operation on the owner of the key, bypassing the
    /// stability gate.
    ///
    /// Used by `exec` once the node is stable, and by rebalancing, which runs
    /// while the node is deliberately unstable.
    pub(crate) async fn route(
        &self,
        key: String,
        value: Option<String>,
        op: Operation,
    ) -> RingResult<Option<String>> {
        let pos = self.position(&key);
        let owner = {
            let state = self.inner.state.read();
            if state.is_belong_me(pos) {
                None
            } else {
                match state.membership().owner(pos) {
                    Ok(owner) => Some(owner.clone()),
                    Err(err) => {
                        error!(node = %state.identity(), pos, "no owner among known members");
                        return Err(err);
                    }
                }
            }
        };

        match owner {
            None => self.apply_local(&key, value, op),
            Some(owner) => {
                debug!(%key, pos, %owner, %op, "forwarding to owner");
                self.remote(&owner, |peer| async move { peer.exec(key, value, op).await })
                    .await
            }
        }
    }

    fn apply_local(
        &self,
        key: &str,
        value: Option<String>,
        op: Operation,
    ) -> RingResult<Option<String>> {
        let storage = &self.inner.storage;
        match op {
            Operation::Get => Ok(storage.get(key)?),
            Operation::Delete => {
                storage.delete(key)?;
                Ok(None)
            }
            Operation::Put | Operation::Append => {
                let value = value.ok_or(RingError::MissingValue { op })?;
                if op == Operation::Put {
                    storage.put(key, &value)?;
                } else {
                    storage.append(key, &value)?;
                }
                Ok(None)
            }
        }
    }

    /// Calls a peer, bounded by the configured RPC timeout.
    pub(crate) async fn remote<T, F, Fut>(&self, peer: &NodeIdentity, call: F) -> RingResult<T>
    where
        F: FnOnce(Arc<dyn RingService>) -> Fut,
        Fut: Future<Output = RingResult<T>>,
    {
        self.remote_within(peer, self.inner.config.rpc_timeout, call)
            .await
    }

    async fn remote_within<T, F, Fut>(
        &self,
        peer: &NodeIdentity,
        timeout: Duration,
        call: F,
    ) -> RingResult<T>
    where
        F: FnOnce(Arc<dyn RingService>) -> Fut,
        Fut: Future<Output = RingResult<T>>,
    {
        let proxy = self.inner.transport.connect(peer);
        match tokio::time::timeout(timeout, call(proxy)).await {
            Ok(result) => result,
            Err(_) => Err(RingError::RemoteCallFailure {
                peer: peer.addr(),
                reason: format!("no answer within {timeout:?}"),
            }),
        }
    }

    /// Sends a membership update to every given member.
    ///
    /// Best effort: failed deliveries are logged and otherwise ignored.
    async fn broadcast(
        &self,
        members: &[NodeIdentity],
        change: MembershipChange,
        subject: &NodeIdentity,
    ) {
        let mut calls = JoinSet::new();
        for member in members.iter().cloned() {
            let node = self.clone();
            let subject = subject.clone();
            calls.spawn(async move {
                let delivered = node
                    .remote(&member, |peer| async move {
                        peer.update_membership(change, subject).await
                    })
                    .await;
                (member, delivered)
            });
        }
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((member, Err(err))) => {
                    warn!(peer = %member, ?change, %subject, error = %err, "membership update not delivered");
                }
                Err(err) => warn!(?change, %subject, error = %err, "membership update task failed"),
            }
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.state.write().set_phase(phase);
    }

    /// Ends a topology change, unless the node left the ring meanwhile.
    fn settle(&self) {
        let mut state = self.inner.state.write();
        if state.phase() == Phase::Unstable {
            state.set_phase(Phase::Stable);
        }
    }

    /// Introducer side of a join, up to the point the joining node can be
    /// answered.
    ///
    /// Returns the answer and the node to pull misplaced pairs from.
    async fn admit(&self, joining: &NodeIdentity) -> RingResult<(JoinResponse, NodeIdentity)> {
        let me = self.identity();
        let (successor, previous) = self.place(joining).await?;
        // A successor that is still joining has no predecessor yet. The node
        // right before the joining one in this node's view is the answer then.
        let predecessor = match previous {
            Some(previous) => previous,
            None => {
                let state = self.inner.state.read();
                let mut view = state.membership().clone();
                view.append(me.clone());
                view.predecessor_of(joining.hash())
                    .cloned()
                    .unwrap_or_else(|| successor.clone())
            }
        };
        debug!(%joining, %successor, %predecessor, "placed joining node");

        let members: Vec<_> = self
            .inner
            .state
            .read()
            .membership()
            .iter()
            .filter(|member| *member != joining)
            .cloned()
            .collect();
        let mut snapshot = members.clone();
        snapshot.push(me);

        self.broadcast(&members, MembershipChange::Join, joining)
            .await;
        self.inner
            .state
            .write()
            .membership_mut()
            .append(joining.clone());

        let response = JoinResponse {
            membership: snapshot,
            predecessor: Some(predecessor),
        };
        Ok((response, successor))
    }

    /// Makes the joining node the predecessor of its successor.
    ///
    /// A successor refuses the joining node when another node took its place
    /// in between, since the successor was resolved against an older view.
    /// The successor is then resolved again, after a pause that lets the
    /// announcement of the other node arrive, up to `max_stable_polls` times.
    ///
    /// Returns the successor and its previous predecessor.
    async fn place(&self, joining: &NodeIdentity) -> RingResult<(NodeIdentity, Option<NodeIdentity>)> {
        let me = self.identity();
        let mut attempts = 0;
        loop {
            let successor = self.get_successor(joining.hash()).await?;
            let offered = if successor == me {
                let mut state = self.inner.state.write();
                state.offer_predecessor(joining.clone())
            } else {
                let pred = joining.clone();
                self.remote(&successor, |peer| async move {
                    peer.change_predecessor(pred).await
                })
                .await
            };

            match offered {
                Ok(previous) => return Ok((successor, previous)),
                Err(err @ RingError::PredecessorMismatch { .. })
                    if attempts < self.inner.config.max_stable_polls =>
                {
                    attempts += 1;
                    debug!(%joining, %successor, attempts, error = %err, "placing again");
                    tokio::time::sleep(self.inner.config.stable_poll_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Pulls misplaced pairs from `source` in the background, then ends the
    /// topology change.
    fn spawn_rebalance(&self, source: NodeIdentity, topology: OwnedMutexGuard<()>) {
        let node = self.clone();
        tokio::spawn(async move {
            let _topology = topology;
            match rebalance::pull_misplaced(&node, &source).await {
                Ok(moved) => info!(node = %node.identity(), %source, moved, "rebalancing done"),
                Err(err) => {
                    warn!(node = %node.identity(), %source, error = %err, "rebalancing aborted");
                }
            }
            node.settle();
        });
    }
}

#[async_trait::async_trait]
impl<H> RingService for RingNode<H>
where
    H: BuildHasher + Send + Sync + 'static,
{
    /// Runs a client operation.
    ///
    /// A node that is not running rejects the call. An unstable one waits for
    /// stability, then evaluates the call again from the start.
    async fn exec(
        &self,
        key: String,
        value: Option<String>,
        op: Operation,
    ) -> RingResult<Option<String>> {
        if matches!(op, Operation::Put | Operation::Append) && value.is_none() {
            return Err(RingError::MissingValue { op });
        }
        loop {
            if self.check_stable()? {
                return self.route(key, value, op).await;
            }
            self.wait_stable().await?;
        }
    }

    async fn get_successor(&self, hash: RingPos) -> RingResult<NodeIdentity> {
        let next = {
            let state = self.inner.state.read();
            if !state.is_running() {
                return Err(RingError::NodeUnavailable);
            }
            if state.is_belong_me(hash) {
                return Ok(state.identity().clone());
            }
            state.membership().owner(hash)?.clone()
        };
        debug!(hash, %next, "resolving successor remotely");
        self.remote(&next, |peer| async move { peer.get_successor(hash).await })
            .await
    }

    async fn get_predecessor_of(&self, hash: RingPos) -> RingResult<Option<NodeIdentity>> {
        let owner = self.get_successor(hash).await?;
        if owner == self.identity() {
            return Ok(self.inner.state.read().predecessor().cloned());
        }
        self.remote(&owner, |peer| async move { peer.predecessor().await })
            .await
    }

    async fn join_ring(&self, joining: NodeIdentity) -> RingResult<JoinResponse> {
        self.wait_stable().await?;
        let topology = self.inner.topology.clone().lock_owned().await;

        {
            let mut state = self.inner.state.write();
            match state.phase() {
                Phase::Stable => {}
                phase if !phase.is_running() => return Err(RingError::NodeUnavailable),
                phase => return Err(RingError::InvalidPhase { phase }),
            }
            let me = state.identity();
            let taken = if me.hash() == joining.hash() {
                Some(me)
            } else {
                state.membership().at_position(joining.hash())
            };
            if let Some(existing) = taken {
                warn!(%joining, %existing, "joining node collides with a member");
                return Err(RingError::IdentityConflict {
                    hash: joining.hash(),
                    existing: existing.addr(),
                });
            }
            state.set_phase(Phase::Unstable);
        }
        info!(node = %self.identity(), %joining, "admitting node");

        match self.admit(&joining).await {
            Ok((response, source)) => {
                self.spawn_rebalance(source, topology);
                Ok(response)
            }
            Err(err) => {
                warn!(%joining, error = %err, "join aborted");
                self.settle();
                Err(err)
            }
        }
    }

    async fn leave_ring(
        &self,
        leaving: NodeIdentity,
        predecessor: Option<NodeIdentity>,
    ) -> RingResult<()> {
        let mut state = self.inner.state.write();
        if !state.is_running() {
            return Err(RingError::NodeUnavailable);
        }
        let me = state.identity().clone();
        state.membership_mut().remove(&leaving);

        if state.predecessor().is_none_or(|pred| *pred == leaving) {
            let adopted = predecessor
                .filter(|pred| *pred != me && state.membership().contains(pred))
                .or_else(|| state.membership().predecessor_of(me.hash()).cloned());
            state.set_predecessor(adopted);
        }
        info!(
            node = %me,
            %leaving,
            predecessor = ?state.predecessor().map(NodeIdentity::addr),
            "predecessor left the ring"
        );
        Ok(())
    }

    async fn change_predecessor(
        &self,
        predecessor: NodeIdentity,
    ) -> RingResult<Option<NodeIdentity>> {
        let mut state = self.inner.state.write();
        if !state.is_running() {
            return Err(RingError::NodeUnavailable);
        }
        let me = state.identity().clone();
        match state.offer_predecessor(predecessor.clone()) {
            Ok(previous) => {
                debug!(node = %me, %predecessor, "predecessor changed");
                Ok(previous)
            }
            Err(err) => {
                debug!(node = %me, %predecessor, error = %err, "predecessor offer refused");
                Err(err)
            }
        }
    }

    async fn update_membership(
        &self,
        change: MembershipChange,
        identity: NodeIdentity,
    ) -> RingResult<()> {
        let mut state = self.inner.state.write();
        if !state.is_running() {
            return Err(RingError::NodeUnavailable);
        }
        if identity == *state.identity() {
            return Ok(());
        }

        match change {
            MembershipChange::Join => {
                if state.membership_mut().append(identity.clone()) {
                    info!(node = %state.identity(), member = %identity, "member joined");
                }
            }
            MembershipChange::Leave => {
                if state.membership_mut().remove(&identity) {
                    info!(node = %state.identity(), member = %identity, "member left");
                }
                if state.predecessor() == Some(&identity) {
                    let own = state.identity().hash();
                    let adopted = state.membership().predecessor_of(own).cloned();
                    state.set_predecessor(adopted);
                }
            }
        }
        Ok(())
    }

    async fn remote_snapshot(&self) -> RingResult<Vec<(String, String)>> {
        if !self.phase().is_running() {
            return Err(RingError::NodeUnavailable);
        }
        rebalance::take_misplaced(self)
    }

    async fn predecessor(&self) -> RingResult<Option<NodeIdentity>> {
        Ok(self.inner.state.read().predecessor().cloned())
    }

    async fn successor(&self) -> RingResult<Option<NodeIdentity>> {
        Ok(self.inner.state.read().successor().cloned())
    }

    async fn membership(&self) -> RingResult<Vec<NodeIdentity>> {
        Ok(self.inner.state.read().membership().to_vec())
    }
}
