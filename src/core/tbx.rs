//! The aggregate result of reading a distribution.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::core::collection::{TargetCollection, TargetCollectionMut};
use crate::core::module::Module;
use crate::core::target::{Target, TargetId};

/// All discovered modules and the targets their scripts declared.
#[derive(Debug, Clone)]
pub struct TbxDistribution {
    /// Distribution root on disk
    pub module_path: PathBuf,
    pub modules: IndexMap<String, Module>,
    /// Files generated outside of any single module
    pub other_generated: Vec<String>,
    next_target: u32,
}

impl TbxDistribution {
    pub fn new(module_path: &Path, modules: IndexMap<String, Module>) -> Self {
        TbxDistribution {
            module_path: module_path.to_path_buf(),
            modules,
            other_generated: Vec::new(),
            next_target: 0,
        }
    }

    pub fn targets(&self) -> TargetCollection<'_> {
        TargetCollection::new(&self.modules)
    }

    pub fn targets_mut(&mut self) -> TargetCollectionMut<'_> {
        TargetCollectionMut::new(&mut self.modules)
    }

    /// Allocate an identity for a new target.
    pub fn next_target_id(&mut self) -> TargetId {
        let id = TargetId::new(self.next_target);
        self.next_target += 1;
        id
    }

    /// Attach a target to `module`, recording the ownership on the target.
    /// Returns false if the module is unknown.
    pub fn add_target(&mut self, module: &str, mut target: Target) -> bool {
        match self.modules.get_mut(module) {
            Some(owner) => {
                target.module = module.to_string();
                owner.targets.push(target);
                true
            }
            None => false,
        }
    }

    /// Remove a module together with every target it owns.
    pub fn remove_module(&mut self, name: &str) -> Option<Module> {
        self.modules.shift_remove(name)
    }

    /// Every path produced by a generation step.
    pub fn all_generated(&self) -> BTreeSet<String> {
        self.other_generated
            .iter()
            .chain(self.modules.values().flat_map(|m| m.generated_sources.iter()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::TargetKind;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_removing_module_removes_its_targets() {
        let tmp = TempDir::new().unwrap();
        let mut modules = IndexMap::new();
        modules.insert(
            "m".to_string(),
            Module::open("m", "m", tmp.path(), &BTreeMap::new()).unwrap(),
        );
        let mut dist = TbxDistribution::new(tmp.path(), modules);
        let id = dist.next_target_id();
        let target = Target::new(id, TargetKind::Program, "tool", Vec::new(), Vec::new());
        assert!(dist.add_target("m", target));
        let stray = Target::new(dist.next_target_id(), TargetKind::Program, "x", Vec::new(), Vec::new());
        assert!(!dist.add_target("other", stray));

        let kept = dist.targets().find(id).cloned().unwrap();
        assert!(dist.targets().contains(&kept));
        dist.remove_module("m");
        assert!(!dist.targets().contains(&kept));
        assert!(dist.targets().is_empty());
    }

    #[test]
    fn test_all_generated_merges_sources() {
        let tmp = TempDir::new().unwrap();
        let mut module = Module::open("m", "m", tmp.path(), &BTreeMap::new()).unwrap();
        module.generated_sources = vec!["m/gen.cpp".into(), "shared.h".into()];
        let mut modules = IndexMap::new();
        modules.insert("m".to_string(), module);
        let mut dist = TbxDistribution::new(tmp.path(), modules);
        dist.other_generated = vec!["shared.h".into(), "other.h".into()];

        let all: Vec<_> = dist.all_generated().into_iter().collect();
        assert_eq!(all, vec!["m/gen.cpp", "other.h", "shared.h"]);
    }
}
