//! # StopSync Testkit
//!
//! Test utilities for StopSync.
//!
//! This crate provides:
//! - An in-memory cloud backend with fault injection and scripted batches
//! - Engine fixtures that can be restarted over the same journal
//! - Helpers for damaging journals to test recovery
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stopsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn edit_reaches_cloud() {
//!     let harness = TestEngine::builder().build().ready().await;
//!     harness.engine.add_or_edit(stop_id("ABCD"), "Main St", true).unwrap()
//!         .wait().await.unwrap();
//!     assert!(harness.cloud.record(&stop_id("ABCD")).is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cloud;
pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cloud::*;
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use cloud::*;
pub use crash::*;
pub use fixtures::*;
pub use generators::*;
