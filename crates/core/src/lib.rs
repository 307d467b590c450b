//! Core types and traits for testkit
//!
//! This crate defines the foundations shared by every other testkit crate:
//! - Error: the error taxonomy and `Result` alias
//! - TestkitConfig: settings loaded from `testkit.toml`
//! - Lifecycle: test classes, extension hooks, contexts with a hierarchical
//!   store, and the launcher that drives them
//! - Naming: test names used for worker-thread prefixes
//! - TestInfo / MisuseCheck: small ready-made extensions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod info;
pub mod lifecycle;
pub mod misuse;
pub mod naming;
pub mod types;

pub use config::TestkitConfig;
pub use error::{panic_message, Error, Result};
pub use info::TestInfo;
pub use lifecycle::{
    AllowedThreads, Extension, ExtensionContext, Failure, Launcher, Marker, Method, MethodOrder,
    Store, TestClass, TestClassBuilder, TestExecutionSummary, TestFn,
};
pub use misuse::MisuseCheck;
pub use types::{LeakedThread, ThreadState};
