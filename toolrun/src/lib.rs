//! Tool-execution core for a conversational mini-app builder.
//!
//! The agent runtime calls into three capabilities: a scoped component
//! bundler, a sandboxed code executor and a plan extractor for its replies.
//! The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (deny rules, plan extraction,
//!   suggestion queue, inline evaluation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (path resolution, bundling,
//!   process execution, config and instruction files).
//!
//! [`tools`] and [`session`] coordinate the two for the agent runtime and the CLI.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tools;
