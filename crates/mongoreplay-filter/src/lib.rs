//! Offline transforms over mongoreplay recordings.
//!
//! A filter run reads one recording and writes one or more new ones:
//!
//! - a time window (`start_at`, `duration`) truncates the traffic
//! - driver housekeeping commands can be removed
//! - the traffic can be split by connection into `n` files, each written
//!   by its own thread, so that several replay processes can share the
//!   load
//!
//! See [`filter`] for the file-to-file entry point and [`filter_ops`] for
//! the same pipeline over an op iterator.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod run;
pub mod select;
pub mod split;

pub use config::{FilterConfig, FilterConfigError};
pub use error::FilterError;
pub use run::{filter, filter_ops, FilterReport};
pub use select::{Rejection, Selector};
pub use split::{OutputReport, SplitWriter};
