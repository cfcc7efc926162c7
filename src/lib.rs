//! # pcrpredict
//!
//! Predicts post-update TPM 2.0 PCR values from a firmware event log and
//! seals a secret under the resulting policy.
//!
//! The crate walks a TCG event log (component [`eventlog::reader`]),
//! decodes each event body into a typed variant ([`eventlog::parser`]),
//! recomputes the digest firmware would measure after a pending update
//! where the update touches a recognized source ([`eventlog::rehash`]),
//! folds the result into a simulated [`bank::PcrBank`] per hash algorithm,
//! and drives [`policy`] to turn the predicted bank into a TPM sealing
//! policy. [`adapters`] persists sealed blobs and signed policies in one
//! of three interchange formats a target boot chain expects.
//!
//! ## Example
//!
//! ```no_run
//! use pcrpredict::config::EngineConfig;
//! use pcrpredict::digest::AlgoRegistry;
//! use pcrpredict::eventlog::EventLogReader;
//! use pcrpredict::runtime::OsRuntimeSurface;
//!
//! let config = EngineConfig::default();
//! let raw = std::fs::read("/sys/kernel/security/tpm0/binary_bios_measurements")?;
//! let mut reader = EventLogReader::new();
//! let events = reader.read_all(&raw)?;
//! let registry = AlgoRegistry::default();
//! let _runtime = OsRuntimeSurface::new(std::path::PathBuf::from("/boot/efi"));
//! let _ = (config, registry, events);
//! # Ok::<(), pcrpredict::error::PredictError>(())
//! ```

pub mod adapters;
pub mod bank;
pub mod bootentry;
pub mod buffer;
pub mod cli;
pub mod config;
pub mod digest;
pub mod error;
pub mod eventlog;
pub mod policy;
pub mod runtime;

pub use error::{PredictError, Result};
