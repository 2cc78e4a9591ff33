// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mathison: a governance-first execution substrate.
//!
//! This facade re-exports the workspace's crates under one roof. Every
//! externally observable action — model call, tool invocation, storage
//! write, job stage — runs inside the governed five-stage pipeline and
//! leaves a signed, hash-chained receipt. The substrate refuses to boot
//! without verified governance artifacts and denies anything it cannot
//! prove was governed.
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use mzn_artifact as artifact;
pub use mzn_beamstore as beamstore;
pub use mzn_boot as boot;
pub use mzn_cdi as cdi;
pub use mzn_cif as cif;
pub use mzn_config as config;
pub use mzn_core as core;
pub use mzn_daemon as daemon;
pub use mzn_error as error;
pub use mzn_gateway as gateway;
pub use mzn_governor as governor;
pub use mzn_jobs as jobs;
pub use mzn_logsink as logsink;
pub use mzn_proof as proof;
pub use mzn_receipt as receipt;
pub use mzn_token as token;
