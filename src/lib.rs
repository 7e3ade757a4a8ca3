//! Selective local-cache refresh engine for RDE research-data metadata.
//!
//! The crate maintains a fixed catalog of remote metadata targets (user
//! profile, group hierarchy, instrument/template/license catalogs, dataset
//! listings and details, a derived info document) cached under a local
//! directory tree, and decides per target whether the cached copy can be
//! reused or must be re-fetched.

pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod freshness;
pub mod local;
pub mod output;
pub mod store;
pub mod sync;
