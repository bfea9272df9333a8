#![doc = "vendor-sync-core: core logic library for vendor-sync."]

//! This crate holds the decision logic of the vendor file synchronisation
//! pipeline and the contracts of every collaborator it talks to.
//! Transport clients, the reporting sink and configuration loading live in
//! the `vendor-sync` binary crate.
//!
//! # Usage
//! Build a [`synchronise::Synchroniser`] from a [`contract::Connector`], a
//! [`contract::RecordValidator`] and optionally a [`report::ReportPublisher`],
//! then call [`synchronise::Synchroniser::run`] with the vendor profiles.

pub mod contract;
pub mod diff;
pub mod marc;
pub mod profile;
pub mod report;
pub mod synchronise;
pub mod validate;
