use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use crate::{store::StoreInfo, PeerId};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("missing key: {0}")]
    MissingKey(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        key: String,
        value: String,
    },

    #[error("malformed line {line}: {content:?}")]
    MalformedLine {
        line: usize,
        content: String,
    },

    #[error("duplicate peer id {0}")]
    DuplicatePeer(PeerId),

    #[error("peer {0} is not in the peer list")]
    UnknownPeer(PeerId),

}

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct Config {

    // Number of neighbors unchoked by download rate each interval.
    pub preferred_neighbors: usize,

    pub unchoking_interval: Duration,

    pub optimistic_unchoking_interval: Duration,

    // Name of the shared file inside each peer's directory.
    pub file_name: String,

    pub file_size: u64,

    pub piece_size: usize,

    // Delay before answering a request, zero disables it.
    pub request_delay: Duration,

    // Capacity of each connection's outgoing message queue.
    pub send_queue_len: usize,

    // Most candidate pieces considered per selection.
    pub max_candidates: usize,

    // Holds the peer_<id> directories.
    pub data_dir: PathBuf,

}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_neighbors: 3,
            unchoking_interval: Duration::from_secs(5),
            optimistic_unchoking_interval: Duration::from_secs(10),
            file_name: String::from("TheFile.dat"),
            file_size: 10_000_232,
            piece_size: 32_768,
            request_delay: Duration::ZERO,
            send_queue_len: 100,
            max_candidates: 1000,
            data_dir: PathBuf::from("."),
        }
    }
}

impl Config {

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses `Key Value` lines. The six swarm keys are required, anything
    /// not set here keeps its default.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entries = HashMap::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => {
                    entries.insert(key, value);
                }
                _ => {
                    return Err(ConfigError::MalformedLine {
                        line: n + 1,
                        content: line.to_string(),
                    })
                }
            }
        }

        let defaults = Self::default();
        let config = Self {
            preferred_neighbors: required(&entries, "NumberOfPreferredNeighbors")?,
            unchoking_interval: Duration::from_secs(required(&entries, "UnchokingInterval")?),
            optimistic_unchoking_interval: Duration::from_secs(required(
                &entries,
                "OptimisticUnchokingInterval",
            )?),
            file_name: required(&entries, "FileName")?,
            file_size: required(&entries, "FileSize")?,
            piece_size: required(&entries, "PieceSize")?,
            ..defaults
        };

        if config.piece_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PieceSize".into(),
                value: "0".into(),
            });
        }

        // Piece indices go on the wire as u32.
        if config.file_size.div_ceil(config.piece_size as u64) > u64::from(u32::MAX) {
            return Err(ConfigError::InvalidValue {
                key: "FileSize".into(),
                value: config.file_size.to_string(),
            });
        }

        for key in entries.keys().filter(|key| !KEYS.contains(key)) {
            tracing::debug!("ignoring unknown config key: {}", key);
        }

        Ok(config)
    }

    pub fn store_info(&self) -> StoreInfo {
        StoreInfo::new(self.file_size, self.piece_size)
    }

    // Location of a peer's copy of the shared file.
    pub fn file_path(&self, id: PeerId) -> PathBuf {
        self.data_dir.join(format!("peer_{}", id)).join(&self.file_name)
    }
}

const KEYS: [&str; 6] = [
    "NumberOfPreferredNeighbors",
    "UnchokingInterval",
    "OptimisticUnchokingInterval",
    "FileName",
    "FileSize",
    "PieceSize",
];

fn required<T: FromStr>(entries: &HashMap<&str, &str>, key: &'static str) -> Result<T> {
    let value = entries.get(key).ok_or(ConfigError::MissingKey(key))?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMON: &str = "\
NumberOfPreferredNeighbors 2
UnchokingInterval 5
OptimisticUnchokingInterval 15
FileName TheFile.dat
FileSize 10000232
PieceSize 32768
";

    #[test]
    fn test_parse_common() {
        let config = Config::parse(COMMON).unwrap();
        assert_eq!(config.preferred_neighbors, 2);
        assert_eq!(config.unchoking_interval, Duration::from_secs(5));
        assert_eq!(config.optimistic_unchoking_interval, Duration::from_secs(15));
        assert_eq!(config.file_name, "TheFile.dat");
        assert_eq!(config.file_size, 10_000_232);
        assert_eq!(config.piece_size, 32_768);
        assert_eq!(config.send_queue_len, 100);
        assert_eq!(config.store_info().num_pieces, 306);
    }

    #[test]
    fn test_missing_key() {
        let content = COMMON.replace("PieceSize 32768\n", "");
        assert!(matches!(Config::parse(&content), Err(ConfigError::MissingKey("PieceSize"))));
    }

    #[test]
    fn test_invalid_value() {
        let content = COMMON.replace("FileSize 10000232", "FileSize big");
        assert!(matches!(Config::parse(&content), Err(ConfigError::InvalidValue { .. })));
        let content = COMMON.replace("PieceSize 32768", "PieceSize 0");
        assert!(matches!(Config::parse(&content), Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_too_many_pieces() {
        let content = COMMON
            .replace("FileSize 10000232", "FileSize 4294967296")
            .replace("PieceSize 32768", "PieceSize 1");
        assert!(matches!(
            Config::parse(&content),
            Err(ConfigError::InvalidValue { key, .. }) if key == "FileSize"
        ));

        // Exactly u32::MAX pieces still fits.
        let content = COMMON
            .replace("FileSize 10000232", "FileSize 4294967295")
            .replace("PieceSize 32768", "PieceSize 1");
        assert_eq!(Config::parse(&content).unwrap().store_info().num_pieces, u32::MAX);
    }

    #[test]
    fn test_malformed_line() {
        let content = format!("{}Extra key value\n", COMMON);
        assert!(matches!(Config::parse(&content), Err(ConfigError::MalformedLine { line: 7, .. })));
    }

    #[test]
    fn test_file_path() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/swarm"),
            ..Config::parse(COMMON).unwrap()
        };
        assert_eq!(config.file_path(1001), PathBuf::from("/tmp/swarm/peer_1001/TheFile.dat"));
    }
}
