//! Library core for the multi-account IMAP sync engine.

pub mod blob;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod imap;
pub mod model;
pub mod remote;
pub mod rpc;
pub mod search_index;
pub mod store;
pub mod sync;
