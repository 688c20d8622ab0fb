//! Connection Registry Module
//!
//! This module owns the handle-to-connection table and the encryption key
//! appliers used while opening connections.

mod database;
pub mod keying;

#[cfg(test)]
mod tests;

pub use database::{Connection, ConnectionRegistry};
pub use keying::{FauxCryptKeyer, KeyApplier, SqlCipherKeyer, key_applier};
