//! Pure orchestration logic: no filesystem, network or container access.

pub mod build_output;
pub mod evaluate;
pub mod stage;
pub mod types;
