//! Launchpad realtime sync layer.
//!
//! Client-side mirror of the shared project tables (team members, tasks,
//! milestones, calendar events, chats, messages, investments, activity).
//! Each domain store keeps an in-memory list for one scope, writes through a
//! table gateway, and re-reads its scope whenever the change feed reports a
//! committed change from any session.

pub mod db;
pub mod error;
pub mod feed;
pub mod gateway;
mod migrations;
pub mod reconcile;
pub mod services;
pub mod state;
pub mod store;
pub mod stores;
pub mod types;

pub use error::SyncError;
pub use gateway::{Backend, Filter, Record, TableGateway};
pub use store::{DomainStore, Phase, StoreSnapshot};
pub use stores::Stores;
