//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Shared files under `tests/common/` are pulled in with:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Instance type used when neither configuration nor flags override it.
pub const DEFAULT_INSTANCE_TYPE: &str = "DEV1-L";

/// Instance name used when `--instance-name` is omitted.
#[expect(dead_code, reason = "not every test binary uses every constant")]
pub const DEFAULT_INSTANCE_NAME: &str = "cms-demo";
