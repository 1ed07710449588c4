//! Core data structures for tbxtools.
//!
//! This module contains the model extracted from a distribution:
//! - Modules and their `libtbx_config` manifests
//! - Targets recorded from build scripts
//! - The target collection view and the distribution aggregate
//! - The lazy, request-driven module loader

pub mod collection;
pub mod distribution;
pub mod module;
pub mod target;
pub mod tbx;

pub use collection::{TargetCollection, TargetCollectionMut, TargetLookupError};
pub use distribution::{DependencyError, Distribution};
pub use module::{
    DependencyKind, Module, ModuleConfig, MANIFEST_NAME, REFRESH_NAME, SCONSCRIPT_NAME,
};
pub use target::{SharedSource, Target, TargetId, TargetKind};
pub use tbx::TbxDistribution;
