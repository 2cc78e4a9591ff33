// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Mathison daemon: runtime assembly and the HTTP control plane.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// HTTP routes.
pub mod api;
/// Governed beam lifecycle operations shared by HTTP and CLI.
pub mod beams;
/// Built-in job types.
pub mod jobtypes;
/// Memory-graph writes.
pub mod memory;
/// Governed job operations shared by HTTP and CLI.
pub mod ops;
/// Runtime assembly.
pub mod runtime;

pub use api::build_app;
pub use runtime::{BootFailure, Runtime, SessionLinkedSink};
