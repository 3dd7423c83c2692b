#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # confsync
//!
//! Command-line front end for the confsync controller: argument parsing and
//! manifest loading. The controller itself lives in `confsync-reconciler`.

pub mod cli;
pub mod manifest;

pub use confsync_reconciler;
pub use confsync_store;
