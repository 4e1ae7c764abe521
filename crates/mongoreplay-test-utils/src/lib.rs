//! Test utilities for mongoreplay development.
//!
//! - [`ops`] builds wire ops and recorded ops with sensible defaults
//! - [`packets`] synthesises Ethernet/IP/TCP frames and pcap files
//! - [`server`] is a scripted in-process server speaking the wire protocol
//! - [`recording`] writes throwaway recordings to disk

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod ops;
pub mod packets;
pub mod recording;
pub mod server;

pub use server::MockServer;
