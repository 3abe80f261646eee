//! Stable exit codes for `toolrun` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Bad input, config or arguments, or a rejected bundle.
pub const INVALID: i32 = 1;
/// `toolrun exec` or `toolrun tool` produced an error result.
pub const EXEC_FAILED: i32 = 2;
