//! Exit codes of the `hsmattest` binary. These are part of the public contract.

pub const SUCCESS: i32 = 0;
pub const NO_ATTESTATION: i32 = 1; // Module or decoder produced no attestation for at least one file
pub const STARTUP_ERROR: i32 = 2; // Config invalid or parsing module could not be loaded
pub const INPUT_ERROR: i32 = 3; // File unreadable or decompression limit exceeded
