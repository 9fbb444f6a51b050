//! Stable exit codes for testbox CLI commands.

/// Every stage succeeded (test failures alone still exit here unless `--strict`).
pub const OK: i32 = 0;
/// An orchestration stage failed; cleanup was attempted before exiting.
pub const STAGE_FAILED: i32 = 1;
/// Configuration or usage error; nothing was started.
pub const INVALID: i32 = 2;
/// `testbox run --strict` recorded at least one failing test.
pub const TESTS_FAILED: i32 = 3;
