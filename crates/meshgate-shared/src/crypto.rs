use subtle::ConstantTimeEq;

use crate::constants::{KDF_CONTEXT_CHANNEL_TOPIC, KDF_CONTEXT_NODE_KEYPAIR};
use crate::types::ChannelKey;

// BLAKE3 KDF with domain separation. Same name in, same key out; the
// digest is one-way so a key says nothing about other channel names.
pub fn derive_channel_key(name: &str) -> ChannelKey {
    ChannelKey(blake3::derive_key(KDF_CONTEXT_CHANNEL_TOPIC, name.as_bytes()))
}

/// Expand an operator-supplied seed into the 32-byte ed25519 secret used
/// for the node's libp2p identity.
pub fn derive_node_secret(seed: &[u8]) -> [u8; 32] {
    blake3::derive_key(KDF_CONTEXT_NODE_KEYPAIR, seed)
}

// Constant-time comparison so token checks do not leak timing
pub fn tokens_match(given: &str, expected: &str) -> bool {
    let given = given.as_bytes();
    let expected = expected.as_bytes();
    given.len() == expected.len() && given.ct_eq(expected).unwrap_u8() == 1
}
