//! Protocol core of a two-party state channel: the runner driving Setup,
//! Propose, Install, TakeAction, Uninstall and Withdraw, the channel store it
//! commits to and the lock service serializing runs per channel.

pub mod abiencode {
    mod de;
    mod error;
    mod hashing;
    mod ser;
    mod token;

    pub mod as_bytes;
    pub mod schema;
    pub mod types;

    pub use de::decode;
    pub use error::{Error, Result};
    pub use hashing::{keccak256, to_bytes, to_hash, token_hash};
    pub use schema::parse as parse_schema;
    pub use ser::to_token;
    pub use token::{encode, ParamType, Token};

    #[cfg(test)]
    mod tests;
}
pub mod sig;

pub mod apps;
pub mod channel;
pub mod commitment;
pub mod config;
pub mod lock;
pub mod messages;
pub mod protocol;
pub mod store;
pub mod wire;

/// Protobuf structs generated from `src/wire/perunwire.proto`.
pub mod perunwire {
    include!(concat!(env!("OUT_DIR"), "/perunwire.rs"));
}

pub use abiencode::types::{Address, Hash, Signature, U256};
pub use config::RunnerConfig;
pub use protocol::{ProtocolError, ProtocolOutcome, ProtocolRunner};
