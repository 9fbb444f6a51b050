//! Container-based acceptance test orchestration.
//!
//! A run launches dependency containers, builds and starts the system under
//! test (SUT), waits until it reports an IP address, fires the configured HTTP
//! checks at it concurrently and writes one report line per check. Whatever
//! happens, the run ends with exactly one cleanup pass.
//!
//! - **[`core`]**: Pure logic (stages, evaluation, build output). No I/O.
//! - **[`io`]**: Config loading, the container runtime seam and its Docker
//!   implementation, HTTP and the report file.
//!
//! The stage modules ([`launcher`], [`provision`], [`acceptance`], [`cleanup`])
//! combine the two, and [`orchestrator`] sequences them.

pub mod acceptance;
pub mod cleanup;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod launcher;
pub mod logging;
pub mod orchestrator;
pub mod provision;
pub mod shutdown;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
