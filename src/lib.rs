//! tbxtools - reads the build description of a tbx distribution
//!
//! A tbx distribution is a tree of modules, each with an `SConscript`
//! build script and a `libtbx_config` manifest. This crate runs the build
//! scripts against an emulated build API, without building anything, and
//! extracts the modules, their targets and the libraries they link.

pub mod core;
pub mod emulator;
pub mod ops;
pub mod resolver;
pub mod script;
pub mod util;

/// Test utilities and mocks for tbxtools unit tests.
///
/// This module is only available when compiling with `--cfg test`. It
/// provides an in-memory [`SystemProbe`](emulator::intercept::SystemProbe)
/// and throwaway distribution trees.
#[cfg(test)]
pub mod test_support;

pub use core::{Distribution, Module, Target, TargetKind, TbxDistribution};
pub use emulator::Emulator;
pub use resolver::DependencyGraph;
pub use util::Config;
