//! Creation and verification of Ethereum signatures over commitment hashes.

use crate::abiencode::{keccak256, types::Hash};

mod signer;
pub use self::signer::{recover_signer, Error, Signer};


/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity adjudicator contracts, so a
/// commitment signed here can be enforced on-chain.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the serializer
    let mut msg = Vec::with_capacity(60);
    msg.extend_from_slice(b"\x19Ethereum Signed Message:\n32");
    msg.extend_from_slice(&hash.0);
    keccak256(&msg)
}
