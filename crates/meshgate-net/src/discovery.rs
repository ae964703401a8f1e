//! Bootstrap peer loading.
//!
//! Reads a list of multiaddrs (one per line) for the swarm to dial on
//! startup. Addresses carrying a `/p2p/<peer-id>` suffix are also seeded
//! into the Kademlia routing table so channel lookups have somewhere to
//! start.

use std::fs;
use std::path::Path;

use libp2p::{multiaddr::Protocol, Multiaddr, PeerId};
use tracing::{debug, info, warn};

/// Parse bootstrap list content.
///
/// Empty lines and lines starting with `#` are ignored. Malformed lines
/// are logged and skipped.
///
/// # Example
///
/// ```text
/// # meshgate bootstrap nodes
/// /ip4/198.51.100.10/udp/4001/quic-v1/p2p/12D3KooW...
/// ```
pub fn parse_bootstrap_list(content: &str) -> Vec<Multiaddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.parse::<Multiaddr>() {
            Ok(addr) => {
                debug!(addr = %addr, "Loaded bootstrap peer");
                Some(addr)
            }
            Err(e) => {
                warn!(line = %line, error = %e, "Skipping invalid multiaddr");
                None
            }
        })
        .collect()
}

/// Load bootstrap peer multiaddrs from a file. A missing or unreadable
/// file yields an empty list.
pub fn load_bootstrap_peers(path: &Path) -> Vec<Multiaddr> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to read bootstrap peers file"
            );
            return Vec::new();
        }
    };

    let addrs = parse_bootstrap_list(&content);
    info!(
        count = addrs.len(),
        path = %path.display(),
        "Loaded bootstrap peers"
    );
    addrs
}

/// Extract a `PeerId` from a multiaddr, if one is present.
pub fn extract_peer_id(addr: &Multiaddr) -> Option<PeerId> {
    addr.iter().find_map(|p| match p {
        Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_nonexistent_file() {
        let peers = load_bootstrap_peers(Path::new("/nonexistent/bootstrap.txt"));
        assert!(peers.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# bootstrap nodes").unwrap();
        writeln!(file, "/ip4/127.0.0.1/udp/4001/quic-v1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "invalid-addr").unwrap();
        writeln!(file, "  /ip4/127.0.0.2/udp/4001/quic-v1  ").unwrap();
        file.flush().unwrap();

        let peers = load_bootstrap_peers(file.path());
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn test_extract_peer_id() {
        let peer = PeerId::random();
        let with_peer: Multiaddr = format!("/ip4/10.0.0.1/udp/4001/quic-v1/p2p/{peer}")
            .parse()
            .unwrap();
        let without: Multiaddr = "/ip4/10.0.0.1/udp/4001/quic-v1".parse().unwrap();

        assert_eq!(extract_peer_id(&with_peer), Some(peer));
        assert_eq!(extract_peer_id(&without), None);
    }
}
