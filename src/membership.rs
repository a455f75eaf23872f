//! Cluster membership: server identity and the active configuration, per
//! spec §3/§4.7.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier of a server within a cluster. Zero is reserved and never
/// assigned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerId(pub u64);

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ServerId {
    fn from(id: u64) -> Self {
        ServerId(id)
    }
}

/// A single member of a configuration: its id, its transport address, and
/// whether it currently counts toward quorum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    pub address: String,
    /// Non-voters replicate but do not count toward quorum or vote; used
    /// during the catch-up phase of adding a server (spec §4.7).
    pub voting: bool,
}

impl ServerRecord {
    pub fn voter(id: ServerId, address: impl Into<String>) -> Self {
        Self { id, address: address.into(), voting: true }
    }

    pub fn non_voter(id: ServerId, address: impl Into<String>) -> Self {
        Self { id, address: address.into(), voting: false }
    }
}

/// The set of servers that make up a cluster at some point in the log.
///
/// Single-server changes only: at most one server is ever added or removed
/// between consecutive committed configurations (spec §4.7 Non-goals — no
/// joint consensus).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    members: BTreeMap<ServerId, ServerRecord>,
}

impl Configuration {
    pub fn empty() -> Self {
        Self { members: BTreeMap::new() }
    }

    pub fn new(records: impl IntoIterator<Item = ServerRecord>) -> Self {
        let mut members = BTreeMap::new();
        for record in records {
            members.insert(record.id, record);
        }
        Self { members }
    }

    pub fn get(&self, id: ServerId) -> Option<&ServerRecord> {
        self.members.get(&id)
    }

    pub fn contains(&self, id: ServerId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn is_voter(&self, id: ServerId) -> bool {
        self.members.get(&id).map(|r| r.voting).unwrap_or(false)
    }

    pub fn voters(&self) -> impl Iterator<Item = &ServerRecord> {
        self.members.values().filter(|r| r.voting)
    }

    pub fn all(&self) -> impl Iterator<Item = &ServerRecord> {
        self.members.values()
    }

    pub fn voter_count(&self) -> usize {
        self.voters().count()
    }

    /// Minimum number of voter acknowledgements needed for quorum.
    pub fn quorum(&self) -> usize {
        self.voter_count() / 2 + 1
    }

    pub fn with_added(&self, record: ServerRecord) -> Self {
        let mut members = self.members.clone();
        members.insert(record.id, record);
        Self { members }
    }

    pub fn with_removed(&self, id: ServerId) -> Self {
        let mut members = self.members.clone();
        members.remove(&id);
        Self { members }
    }

    pub fn with_promoted(&self, id: ServerId) -> Self {
        let mut members = self.members.clone();
        if let Some(record) = members.get_mut(&id) {
            record.voting = true;
        }
        Self { members }
    }

    /// Given the set of matched log indices for every voter (leader included),
    /// the highest index replicated to a quorum, per spec §4.3's commit rule.
    pub fn quorum_match_index(&self, matched: &BTreeMap<ServerId, u64>) -> u64 {
        let mut indices: Vec<u64> = self
            .voters()
            .map(|r| matched.get(&r.id).copied().unwrap_or(0))
            .collect();
        if indices.is_empty() {
            return 0;
        }
        indices.sort_unstable();
        indices[indices.len() - self.quorum().min(indices.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_is_majority_of_voters() {
        let config = Configuration::new(vec![
            ServerRecord::voter(1.into(), "a"),
            ServerRecord::voter(2.into(), "b"),
            ServerRecord::voter(3.into(), "c"),
            ServerRecord::non_voter(4.into(), "d"),
        ]);
        assert_eq!(config.voter_count(), 3);
        assert_eq!(config.quorum(), 2);
    }

    #[test]
    fn quorum_match_index_picks_the_median() {
        let config = Configuration::new(vec![
            ServerRecord::voter(1.into(), "a"),
            ServerRecord::voter(2.into(), "b"),
            ServerRecord::voter(3.into(), "c"),
        ]);
        let matched: BTreeMap<ServerId, u64> =
            vec![(1.into(), 10), (2.into(), 7), (3.into(), 5)].into_iter().collect();
        assert_eq!(config.quorum_match_index(&matched), 7);
    }

    #[test]
    fn non_voters_never_count_toward_quorum() {
        let config = Configuration::new(vec![
            ServerRecord::voter(1.into(), "a"),
            ServerRecord::non_voter(2.into(), "b"),
        ]);
        assert_eq!(config.quorum(), 1);
        assert!(!config.is_voter(2.into()));
    }
}
