//! Filesystem and process side of the runtime.

pub mod bundler;
pub mod config;
pub mod instructions;
pub mod path_guard;
pub mod process;
pub mod sandbox;
