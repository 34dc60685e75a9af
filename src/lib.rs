//! # dice-miner
//!
//! Client for mining, validating, registering and trading proof-of-work
//! units with an operator node.
//!
//! ## Architecture
//!
//! Every command is a step table driven by one ticking engine:
//! - **Engine**: runs one step handler per tick, never waiting
//! - **Correlator**: one outstanding request per operator, replies decrypted
//!   on arrival
//! - **Negotiator**: certificate handshake that walks down a ladder of
//!   security levels until the operator accepts one
//!
//! Transport, name resolution, cipher and proof-of-work sit behind traits so
//! the workflows run unchanged against in-memory doubles.

#![forbid(unsafe_code)]
#![deny(clippy::all, rust_2018_idioms)]
#![warn(clippy::pedantic, clippy::nursery, missing_docs)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::future_not_send,
    clippy::too_many_lines,
    clippy::too_many_arguments,
    // Zero-bit counts, timestamps and durations are bounded
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::cast_lossless,
    clippy::missing_const_for_fn,
    clippy::unused_self,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::struct_field_names,
    clippy::match_same_arms
)]

pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod net;
pub mod pow;
pub mod session;
pub mod store;
pub mod types;
pub mod wallet;
pub mod workflow;

pub use config::{ConfigError, MinerConfig};
pub use crypto::{
    generate_mnemonic, keypair_from_mnemonic, keypair_from_phrase, parse_mnemonic,
    CipherSession, KeyPair, SealedCipher, SecurityLevel,
};
pub use dispatch::{dispatch, DispatchError};
pub use session::{AppArgs, Notice, Reporter, Session, SessionError};
pub use types::{Address, Unit, UnitValue, ValidationTarget};
pub use wallet::{KeyFile, KeyFileError};
pub use workflow::{Command, Engine, Outcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
