use {
    crate::{
        RingError,
        RingResult,
        identity::NodeIdentity,
        membership::RingMembership,
        ring::{OwnedRange, RingPos},
    },
    serde::{Deserialize, Serialize},
};

/// Lifecycle phase of a node.
///
/// ```text
/// Created -> Joining -> Stable <-> Unstable
///                         |
///                         v
///                      Leaving -> Destroyed
/// ```
///
/// A failed join sends the node back to `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Not yet serving, not part of any ring.
    Created,
    /// Serving inbound calls, waiting for the introducer's answer.
    Joining,
    /// Part of the ring, topology is settled.
    Stable,
    /// Part of the ring, topology change in progress.
    Unstable,
    /// Announcing departure to the rest of the ring.
    Leaving,
    /// Shut down, storage and listener released.
    Destroyed,
}

impl Phase {
    /// Whether the node accepts operations at all.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Phase::Joining | Phase::Stable | Phase::Unstable | Phase::Leaving
        )
    }

    /// Whether the topology is settled and safe to route against.
    pub fn is_stable(self) -> bool {
        self == Phase::Stable
    }
}

/// Ring state of a node.
///
/// Owned by the node and only mutated by the membership protocol and the
/// handlers of membership calls coming from peers.
#[derive(Debug, Clone)]
pub struct NodeState {
    identity: NodeIdentity,
    predecessor: Option<NodeIdentity>,
    membership: RingMembership,
    phase: Phase,
}

impl NodeState {
    /// Fresh state: no predecessor, no known members, not running.
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            predecessor: None,
            membership: RingMembership::new(),
            phase: Phase::Created,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn predecessor(&self) -> Option<&NodeIdentity> {
        self.predecessor.as_ref()
    }

    /// Replaces the predecessor pointer, returning the previous one.
    pub fn set_predecessor(&mut self, predecessor: Option<NodeIdentity>) -> Option<NodeIdentity> {
        std::mem::replace(&mut self.predecessor, predecessor)
    }

    /// Takes `candidate` as the new predecessor, returning the previous one.
    ///
    /// The candidate is accepted only if it lies strictly between the
    /// current predecessor and this node, or if there is no predecessor yet.
    /// An accepted candidate also becomes a known member.
    pub fn offer_predecessor(&mut self, candidate: NodeIdentity) -> RingResult<Option<NodeIdentity>> {
        if let Some(pred) = &self.predecessor {
            let range = OwnedRange::new(pred.hash(), self.identity.hash());
            if candidate.hash() == self.identity.hash() || !range.contains(candidate.hash()) {
                return Err(RingError::PredecessorMismatch {
                    candidate: candidate.addr(),
                    predecessor: pred.addr(),
                });
            }
        }
        self.membership.append(candidate.clone());
        Ok(self.set_predecessor(Some(candidate)))
    }

    pub fn membership(&self) -> &RingMembership {
        &self.membership
    }

    pub fn membership_mut(&mut self) -> &mut RingMembership {
        &mut self.membership
    }

    /// Successor of this node among its known members.
    pub fn successor(&self) -> Option<&NodeIdentity> {
        self.membership.successor_of(self.identity.hash())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    pub fn is_stable(&self) -> bool {
        self.phase.is_stable()
    }

    /// Portion of the ring this node owns, `None` meaning the whole ring.
    pub fn owned_range(&self) -> Option<OwnedRange> {
        if self.membership.is_empty() {
            return None;
        }
        self.predecessor
            .as_ref()
            .map(|pred| OwnedRange::new(pred.hash(), self.identity.hash()))
    }

    /// Checks whether the given ring position is owned by this node.
    ///
    /// A node that knows no other member owns the whole ring. Otherwise it
    /// owns `(predecessor, self]`. A node with members but no predecessor
    /// yet only claims its own position.
    pub fn is_belong_me(&self, pos: RingPos) -> bool {
        if self.membership.is_empty() {
            return true;
        }
        match self.owned_range() {
            Some(range) => range.contains(pos),
            None => pos == self.identity.hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{ring::Ring, testing::DigitsHasher},
    };

    fn ring() -> Ring<DigitsHasher> {
        Ring::with_build_hasher(4, DigitsHasher).unwrap()
    }

    #[test]
    fn phases() {
        assert!(!Phase::Created.is_running());
        assert!(Phase::Joining.is_running() && !Phase::Joining.is_stable());
        assert!(Phase::Stable.is_running() && Phase::Stable.is_stable());
        assert!(Phase::Unstable.is_running() && !Phase::Unstable.is_stable());
        assert!(Phase::Leaving.is_running() && !Phase::Leaving.is_stable());
        assert!(!Phase::Destroyed.is_running());
    }

    #[test]
    fn sole_member_owns_everything() {
        let ring = ring();
        let state = NodeState::new(NodeIdentity::new("127.0.0.1", 7011, &ring));
        assert_eq!(state.phase(), Phase::Created);
        assert!(state.owned_range().is_none());
        assert!((0..ring.len()).all(|pos| state.is_belong_me(pos)));
    }

    #[test]
    fn owns_interval_after_predecessor() {
        let ring = ring();
        // hash(A) = 3, hash(B) = 9
        let a = NodeIdentity::new("127.0.0.1", 7011, &ring);
        let b = NodeIdentity::new("127.0.0.1", 7017, &ring);
        assert_eq!((a.hash(), b.hash()), (3, 9));

        let mut state_a = NodeState::new(a.clone());
        state_a.membership_mut().append(b.clone());
        state_a.set_predecessor(Some(b.clone()));

        let mut state_b = NodeState::new(b.clone());
        state_b.membership_mut().append(a.clone());
        assert!(state_b.set_predecessor(Some(a.clone())).is_none());

        assert!(state_b.is_belong_me(5));
        assert!(!state_a.is_belong_me(5));
        assert!(state_a.is_belong_me(12));
        assert!(!state_b.is_belong_me(12));

        // Exactly one owner everywhere.
        for pos in 0..ring.len() {
            assert!(state_a.is_belong_me(pos) ^ state_b.is_belong_me(pos));
        }

        assert_eq!(state_a.successor(), Some(&b));
        assert_eq!(state_b.successor(), Some(&a));
    }

    #[test]
    fn ownership_matches_interval() {
        let ring = ring();
        for self_port in 7008..7024u16 {
            for pred_port in 7008..7024u16 {
                if self_port == pred_port {
                    continue;
                }
                let me = NodeIdentity::new("10.0.0.1", self_port, &ring);
                let pred = NodeIdentity::new("10.0.0.2", pred_port, &ring);
                let mut state = NodeState::new(me.clone());
                state.membership_mut().append(pred.clone());
                state.set_predecessor(Some(pred.clone()));

                for pos in 0..ring.len() {
                    let (p, s) = (pred.hash(), me.hash());
                    let expected = if p < s {
                        pos > p && pos <= s
                    } else {
                        pos > p || pos <= s
                    };
                    assert_eq!(state.is_belong_me(pos), expected, "pred={p} self={s} pos={pos}");
                }
            }
        }
    }

    #[test]
    fn predecessor_offers() {
        let ring = ring();
        // Positions 14, 3, 10, 12.
        let s = NodeIdentity::new("127.0.0.1", 7022, &ring);
        let a = NodeIdentity::new("127.0.0.1", 7011, &ring);
        let x1 = NodeIdentity::new("127.0.0.1", 7018, &ring);
        let x2 = NodeIdentity::new("127.0.0.1", 7020, &ring);

        let mut state = NodeState::new(s);
        assert_eq!(state.offer_predecessor(a.clone()), Ok(None));
        assert_eq!(state.offer_predecessor(x2.clone()), Ok(Some(a.clone())));
        assert!(state.membership().contains(&x2));

        // 10 is no longer in (12, 14].
        assert_eq!(
            state.offer_predecessor(x1.clone()),
            Err(RingError::PredecessorMismatch {
                candidate: x1.addr(),
                predecessor: x2.addr(),
            })
        );
        assert_eq!(state.predecessor(), Some(&x2));
        assert!(!state.membership().contains(&x1));

        // Nor is the current predecessor itself.
        assert!(state.offer_predecessor(x2.clone()).is_err());
    }
}
