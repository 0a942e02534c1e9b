use {
    crate::{
        RingError,
        RingResult,
        identity::NodeIdentity,
        ring::RingPos,
    },
    std::ops::Index,
};

/// Known members of the ring, as seen by a node.
///
/// This is the node's routing table: a flat list of every other member it
/// knows about, kept sorted by ring position. Lookups are linear in the number
/// of members, but any owner is reachable in a single hop.
///
/// Members are compared by address, so appending an already known member is
/// a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingMembership {
    members: Vec<NodeIdentity>,
}

impl Index<usize> for RingMembership {
    type Output = NodeIdentity;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.members[idx]
    }
}

impl RingMembership {
    /// Creates an empty membership list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a membership list out of the given members.
    pub fn from_members<I: IntoIterator<Item = NodeIdentity>>(members: I) -> Self {
        let mut membership = Self::new();
        membership.replace_all(members);
        membership
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the member at the given index.
    pub fn get(&self, idx: usize) -> Result<&NodeIdentity, MembershipError> {
        self.members.get(idx).ok_or(MembershipError::OutOfBounds {
            idx,
            size: self.members.len(),
        })
    }

    /// Adds a member, keeping the list ordered by ring position.
    ///
    /// Returns `false` if the member was already known.
    pub fn append(&mut self, node: NodeIdentity) -> bool {
        if self.contains(&node) {
            return false;
        }
        let at = self.members.partition_point(|m| m.hash() <= node.hash());
        self.members.insert(at, node);
        true
    }

    /// Removes the first member equal to `node`.
    ///
    /// Returns `false` if there was no such member.
    pub fn remove(&mut self, node: &NodeIdentity) -> bool {
        match self.members.iter().position(|m| m == node) {
            Some(idx) => {
                self.members.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Replaces the whole list, e.g. with a snapshot received on join.
    pub fn replace_all<I: IntoIterator<Item = NodeIdentity>>(&mut self, members: I) {
        self.members.clear();
        for node in members {
            self.append(node);
        }
    }

    pub fn contains(&self, node: &NodeIdentity) -> bool {
        self.members.contains(node)
    }

    /// Returns a member placed exactly at the given position, if any.
    pub fn at_position(&self, pos: RingPos) -> Option<&NodeIdentity> {
        self.members.iter().find(|m| m.hash() == pos)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeIdentity> {
        self.members.iter()
    }

    pub fn to_vec(&self) -> Vec<NodeIdentity> {
        self.members.clone()
    }

    /// First member clockwise strictly after `pos`, wrapping around the ring.
    ///
    /// For a node's own position this is the node's successor.
    pub fn successor_of(&self, pos: RingPos) -> Option<&NodeIdentity> {
        self.members
            .iter()
            .find(|m| m.hash() > pos)
            .or_else(|| self.members.first())
    }

    /// Last member counter-clockwise strictly before `pos`, wrapping around
    /// the ring.
    pub fn predecessor_of(&self, pos: RingPos) -> Option<&NodeIdentity> {
        self.members
            .iter()
            .rev()
            .find(|m| m.hash() < pos)
            .or_else(|| self.members.last())
    }

    /// Returns the index of the member owning the given position.
    ///
    /// A member owns every position after the previous member, up to and
    /// including its own, so the owner is the first member clockwise at or
    /// after `pos`. Positions past the last member (or before the first one)
    /// wrap around to the first member.
    ///
    /// An empty list has no owner: callers are expected to check whether the
    /// local node owns the position first.
    pub fn owner_index(&self, pos: RingPos) -> RingResult<usize> {
        let (Some(first), Some(last)) = (self.members.first(), self.members.last()) else {
            return Err(RingError::RoutingLookupFailure { hash: pos });
        };

        if self.members.len() == 1 || pos == first.hash() {
            return Ok(0);
        }
        if pos > last.hash() || pos < first.hash() {
            return Ok(0);
        }

        self.members
            .windows(2)
            .position(|pair| pair[0].hash() < pos && pos <= pair[1].hash())
            .map(|idx| idx + 1)
            .ok_or(RingError::RoutingLookupFailure { hash: pos })
    }

    /// Returns the member owning the given position.
    pub fn owner(&self, pos: RingPos) -> RingResult<&NodeIdentity> {
        self.owner_index(pos).map(|idx| &self.members[idx])
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum MembershipError {
    /// Index past the end of the list.
    #[error("Index {idx} out of bounds for membership of size {size}")]
    OutOfBounds { idx: usize, size: usize },
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{ring::Ring, testing::DigitsHasher},
    };

    type TestRing = Ring<DigitsHasher>;

    /// Member placed at `port mod RING_LEN`.
    fn member(ring: &TestRing, port: u16) -> NodeIdentity {
        NodeIdentity::new("127.0.0.1", port, ring)
    }

    /// `n` members at distinct positions of a 1024-slot ring.
    fn ring_with(n: usize) -> (TestRing, RingMembership) {
        let ring = Ring::with_build_hasher(10, DigitsHasher).unwrap();
        let membership =
            RingMembership::from_members((0..n).map(|i| member(&ring, 5000 + 37 * i as u16)));
        (ring, membership)
    }

    /// Brute force: first member clockwise at or after `pos`.
    fn expected_owner(membership: &RingMembership, pos: RingPos) -> RingPos {
        membership
            .iter()
            .map(|m| m.hash())
            .filter(|h| *h >= pos)
            .min()
            .unwrap_or_else(|| membership.iter().map(|m| m.hash()).min().unwrap())
    }

    #[test]
    fn ordered_by_position() {
        let (_, membership) = ring_with(20);
        let hashes: Vec<_> = membership.iter().map(|m| m.hash()).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn append_and_remove_by_value() {
        let ring = Ring::with_build_hasher(10, DigitsHasher).unwrap();
        let mut membership = RingMembership::new();
        assert!(membership.append(member(&ring, 1)));
        assert!(membership.append(member(&ring, 2)));
        assert!(!membership.append(member(&ring, 1)));
        assert_eq!(membership.size(), 2);

        // A freshly built identity equal by address removes the entry.
        assert!(membership.remove(&NodeIdentity::new("127.0.0.1", 1, &ring)));
        assert!(!membership.remove(&member(&ring, 1)));
        assert_eq!(membership.size(), 1);
        assert_eq!(membership.get(0).unwrap(), &member(&ring, 2));
    }

    #[test]
    fn get_out_of_bounds() {
        let (_, membership) = ring_with(3);
        assert!(membership.get(2).is_ok());
        assert_eq!(
            membership.get(3),
            Err(MembershipError::OutOfBounds { idx: 3, size: 3 })
        );
        assert_eq!(
            RingMembership::new().get(0),
            Err(MembershipError::OutOfBounds { idx: 0, size: 0 })
        );
    }

    #[test]
    fn replace_all() {
        let (ring, mut membership) = ring_with(5);
        let snapshot = vec![member(&ring, 7000), member(&ring, 7001), member(&ring, 7000)];
        membership.replace_all(snapshot);
        assert_eq!(membership.size(), 2);
        assert!(membership.contains(&member(&ring, 7001)));
        assert!(!membership.contains(&member(&ring, 5000)));
    }

    #[test]
    fn single_member_owns_everything() {
        let (ring, membership) = ring_with(1);
        for pos in 0..ring.len() {
            assert_eq!(membership.owner_index(pos), Ok(0));
        }
    }

    #[test]
    fn empty_membership_has_no_owner() {
        let membership = RingMembership::new();
        assert_eq!(
            membership.owner_index(42),
            Err(RingError::RoutingLookupFailure { hash: 42 })
        );
    }

    #[test]
    fn owner_is_first_member_clockwise() {
        for n in 2..12 {
            let (ring, membership) = ring_with(n);
            for pos in 0..ring.len() {
                let owner = membership.owner(pos).unwrap();
                assert_eq!(
                    owner.hash(),
                    expected_owner(&membership, pos),
                    "wrong owner for {pos} among {n} members"
                );
            }
        }
    }

    #[test]
    fn boundaries() {
        let ring = Ring::with_build_hasher(4, DigitsHasher).unwrap();
        let membership = RingMembership::from_members([2, 5, 9, 13].map(|p| member(&ring, p)));

        assert_eq!(membership.owner_index(2), Ok(0));
        assert_eq!(membership.owner_index(13), Ok(3));
        assert_eq!(membership.owner_index(14), Ok(0));
        assert_eq!(membership.owner_index(0), Ok(0));
        assert_eq!(membership.owner_index(3), Ok(1));
        assert_eq!(membership.owner_index(6), Ok(2));
        assert_eq!(membership.owner_index(10), Ok(3));
        // Member's own position belongs to it.
        for idx in 0..4 {
            assert_eq!(membership.owner_index(membership[idx].hash()).unwrap(), idx);
        }
    }

    #[test]
    fn successor_wraps() {
        let (_, membership) = ring_with(3);
        let hashes: Vec<_> = membership.iter().map(|m| m.hash()).collect();
        assert_eq!(membership.successor_of(hashes[0]).unwrap().hash(), hashes[1]);
        assert_eq!(membership.successor_of(hashes[1]).unwrap().hash(), hashes[2]);
        assert_eq!(membership.successor_of(hashes[2]).unwrap().hash(), hashes[0]);
        assert!(RingMembership::new().successor_of(0).is_none());

        assert_eq!(membership.predecessor_of(hashes[2]).unwrap().hash(), hashes[1]);
        assert_eq!(membership.predecessor_of(hashes[0]).unwrap().hash(), hashes[2]);
        assert!(RingMembership::new().predecessor_of(0).is_none());
    }
}
