//! # nodeagent
//!
//! A node-local cluster agent: a single executable that bootstraps,
//! deploys, reconfigures, inspects, and dismantles containerized storage
//! daemons on a host, plus a long-lived local metadata exporter.
//! Modeled closely on Ceph's `cephadm` tool.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

pub mod bootstrap;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod config_json;
pub mod container;
pub mod daemon;
pub mod daemon_spec;
pub mod deploy;
pub mod error;
pub mod exporter;
pub mod firewall;
pub mod fsid;
pub mod init_system;
pub mod layout;
pub mod net;
