use std::{collections::BTreeMap, path::Path};
use crate::{config::ConfigError, PeerId};

type Result<T> = std::result::Result<T, ConfigError>;

// One line of the peer list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {

    pub id: PeerId,

    pub host: String,

    pub port: u16,

    // Whether the peer starts with the complete file.
    pub has_file: bool,

}

impl std::fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Every peer of the swarm, ordered by id.
///
/// A peer connects out to every peer with a lower id and waits for
/// connections from every peer with a higher id.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: BTreeMap<PeerId, PeerDescriptor>,
}

impl PeerTable {

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    // Lines are `<id> <host> <port> <hasFile>`.
    pub fn parse(content: &str) -> Result<Self> {
        let mut table = Self::default();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let malformed = || ConfigError::MalformedLine {
                line: n + 1,
                content: line.to_string(),
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            let [id, host, port, has_file] = fields[..] else {
                return Err(malformed());
            };
            let peer = PeerDescriptor {
                id: id.parse().map_err(|_| malformed())?,
                host: host.to_string(),
                port: port.parse().map_err(|_| malformed())?,
                has_file: match has_file {
                    "1" => true,
                    "0" => false,
                    _ => return Err(malformed()),
                },
            };
            table.insert(peer)?;
        }
        Ok(table)
    }

    pub fn insert(&mut self, peer: PeerDescriptor) -> Result<()> {
        if self.peers.contains_key(&peer.id) {
            return Err(ConfigError::DuplicatePeer(peer.id));
        }
        self.peers.insert(peer.id, peer);
        Ok(())
    }

    pub fn get(&self, id: PeerId) -> Option<&PeerDescriptor> {
        self.peers.get(&id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerDescriptor> {
        self.peers.values()
    }

    // Peers this peer dials, in ascending id order.
    pub fn lower_than(&self, id: PeerId) -> impl Iterator<Item = &PeerDescriptor> {
        self.peers.range(..id).map(|(_, peer)| peer)
    }

    // Number of inbound connections this peer waits for.
    pub fn higher_count(&self, id: PeerId) -> usize {
        self.peers.range(id.saturating_add(1)..).count()
    }
}
