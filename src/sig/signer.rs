//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::abiencode::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use sha3::{Digest, Keccak256};

use super::hash_to_eth_signed_msg_hash;

pub use k256::ecdsa::Error;

/// Offset the EVM expects on the recovery id.
const V_OFFSET: u8 = 27;

pub struct Signer {
    key: SigningKey,
    addr: Address,
}

impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print the key.
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<&VerifyingKey> for Address {
    fn from(key: &VerifyingKey) -> Self {
        // Uncompressed SEC1 encoding: 0x04 ‖ x ‖ y. The address is the last
        // 20 bytes of keccak256(x ‖ y).
        let point = key.to_encoded_point(false);
        let hash: [u8; 32] = Keccak256::digest(&point.as_bytes()[1..]).into();

        let mut addr = Address([0; 20]);
        addr.0.copy_from_slice(&hash[32 - 20..]);
        addr
    }
}

impl Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let key = SigningKey::random(&mut *rng);
        let addr = (&key.verifying_key()).into();
        Self { key, addr }
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0)?;

        // This Signature type already has the layout we need (r ‖ s ‖ v), but
        // v has to be offset by 27 for the EVM.
        let mut sig_bytes: [u8; 65] = sig.as_bytes().try_into().map_err(|_| Error::new())?;
        sig_bytes[64] += V_OFFSET;

        Ok(Signature(sig_bytes))
    }

    pub fn recover_signer(&self, msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
        recover_signer(msg, eth_sig)
    }
}

/// Recover the address that produced `eth_sig` over `msg` (before adding the
/// Ethereum prefix).
pub fn recover_signer(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let hash = hash_to_eth_signed_msg_hash(msg);

    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = sig_bytes[64].checked_sub(V_OFFSET).ok_or_else(Error::new)?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)?;
    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&hash.0.into())?;
    Ok((&verifying_key).into())
}
