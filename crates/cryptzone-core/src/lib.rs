//! Core library for `cryptzone`.
//!
//! Registers encryption keys and key-protected zones over storage paths,
//! keeps a small table catalog, encodes typed rows through pluggable row and
//! columnar storage formats, and verifies that a dataset written into a
//! (possibly encrypted) table reads back losslessly and in order.
//!
//! The usual entry point is [`warehouse::Warehouse`], which wires the pieces
//! together over a [`cryptzone_storage::StorageBackend`].

pub mod catalog;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod types;
pub mod verify;
pub mod warehouse;
pub mod zone;
pub mod zoned_storage;
