// SPDX-License-Identifier: MIT OR Apache-2.0
//! Boot-time services: the ephemeral boot key, the persistent session
//! registry, and the prerequisite sequencer that gates the listener.
//!
//! The substrate is fail-closed: nothing binds, serves, or executes until
//! [`prereq::validate_all`] reports `ok = true`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The ephemeral per-process signing key.
pub mod bootkey;
/// Pre-boot prerequisite validation.
pub mod prereq;
/// Persistent public session metadata.
pub mod session;

pub use bootkey::BootKey;
pub use prereq::{PrereqOutcome, validate_all};
pub use session::{BootSession, SessionRegistry, SessionRegistryError};
