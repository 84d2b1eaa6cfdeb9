//! Wiring model for a logic-circuit editor: ports and the connections between them, element
//! identities that survive deletion and reload, and the registry that builds elements by type.

#![warn(clippy::all, rust_2018_idioms)]

pub mod assets;
pub mod config;
pub mod connection;
pub mod db;
pub mod element;
pub mod factory;
pub mod properties;
pub mod save_load;

pub use db::Circuit;
