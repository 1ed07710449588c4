//! Set-like views over every target owned by a distribution's modules.
//!
//! Targets live inside their owning [`Module`]. These views never hold a
//! second copy, so a target leaves the collection exactly when it leaves
//! its module's list, and vice versa.

use indexmap::IndexMap;
use thiserror::Error;

use crate::core::module::Module;
use crate::core::target::{Target, TargetId};

/// A name lookup that did not find exactly one target.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetLookupError {
    #[error("no target named {0}")]
    NotFound(String),

    #[error("more than one target named {0}")]
    Ambiguous(String),
}

/// Read-only view over all targets.
#[derive(Clone, Copy)]
pub struct TargetCollection<'a> {
    modules: &'a IndexMap<String, Module>,
}

impl<'a> TargetCollection<'a> {
    pub fn new(modules: &'a IndexMap<String, Module>) -> Self {
        TargetCollection { modules }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Target> + 'a {
        self.modules.values().flat_map(|m| m.targets.iter())
    }

    pub fn len(&self) -> usize {
        self.modules.values().map(|m| m.targets.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Membership by identity: the owning module must still be part of the
    /// distribution and must list this very target.
    pub fn contains(&self, target: &Target) -> bool {
        self.modules
            .get(&target.module)
            .is_some_and(|m| m.targets.iter().any(|t| t.id == target.id))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.iter().any(|t| t.name == name)
    }

    pub fn find(&self, id: TargetId) -> Option<&'a Target> {
        self.iter().find(|t| t.id == id)
    }

    /// The single target called `name`.
    pub fn get(&self, name: &str) -> Result<&'a Target, TargetLookupError> {
        let mut found = self.iter().filter(|t| t.name == name);
        match (found.next(), found.next()) {
            (Some(target), None) => Ok(target),
            (None, _) => Err(TargetLookupError::NotFound(name.to_string())),
            (Some(_), Some(_)) => Err(TargetLookupError::Ambiguous(name.to_string())),
        }
    }
}

/// Mutable view over all targets.
pub struct TargetCollectionMut<'a> {
    modules: &'a mut IndexMap<String, Module>,
}

impl<'a> TargetCollectionMut<'a> {
    pub fn new(modules: &'a mut IndexMap<String, Module>) -> Self {
        TargetCollectionMut { modules }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Target> + '_ {
        self.modules.values_mut().flat_map(|m| m.targets.iter_mut())
    }

    pub fn find_mut(&mut self, id: TargetId) -> Option<&mut Target> {
        self.iter_mut().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Target, TargetLookupError> {
        let count = self.iter_mut().filter(|t| t.name == name).count();
        match count {
            0 => Err(TargetLookupError::NotFound(name.to_string())),
            1 => self
                .iter_mut()
                .find(|t| t.name == name)
                .ok_or_else(|| TargetLookupError::NotFound(name.to_string())),
            _ => Err(TargetLookupError::Ambiguous(name.to_string())),
        }
    }

    /// Remove a target from its owning module. The returned target no
    /// longer names a module.
    pub fn remove(&mut self, id: TargetId) -> Option<Target> {
        for module in self.modules.values_mut() {
            if let Some(pos) = module.targets.iter().position(|t| t.id == id) {
                let mut target = module.targets.remove(pos);
                target.module.clear();
                return Some(target);
            }
        }
        None
    }

    pub fn remove_all(&mut self, ids: impl IntoIterator<Item = TargetId>) -> Vec<Target> {
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Move a target to another module. Returns false if either is unknown.
    pub fn move_to(&mut self, id: TargetId, module: &str) -> bool {
        if !self.modules.contains_key(module) {
            return false;
        }
        let Some(mut target) = self.remove(id) else {
            return false;
        };
        target.module = module.to_string();
        match self.modules.get_mut(module) {
            Some(dest) => {
                dest.targets.push(target);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::TargetKind;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn modules_with_targets(root: &std::path::Path) -> IndexMap<String, Module> {
        let aliases = BTreeMap::new();
        let mut modules = IndexMap::new();
        for (i, name) in ["a", "b"].iter().enumerate() {
            let mut module = Module::open(name, name, root, &aliases).unwrap();
            let mut target = Target::new(
                TargetId::new(i as u32),
                TargetKind::Shared,
                "utils",
                Vec::new(),
                Vec::new(),
            );
            target.module = name.to_string();
            module.targets.push(target);
            modules.insert(name.to_string(), module);
        }
        modules
    }

    #[test]
    fn test_lookup_by_name() {
        let tmp = TempDir::new().unwrap();
        let modules = modules_with_targets(tmp.path());
        let targets = TargetCollection::new(&modules);
        assert_eq!(targets.len(), 2);
        assert_eq!(
            targets.get("utils").unwrap_err(),
            TargetLookupError::Ambiguous("utils".into())
        );
        assert_eq!(
            targets.get("nope").unwrap_err(),
            TargetLookupError::NotFound("nope".into())
        );
    }

    #[test]
    fn test_removal_updates_module_and_membership() {
        let tmp = TempDir::new().unwrap();
        let mut modules = modules_with_targets(tmp.path());
        let copy = modules["a"].targets[0].clone();

        let removed = TargetCollectionMut::new(&mut modules).remove(copy.id).unwrap();
        assert!(removed.module.is_empty());
        assert!(modules["a"].targets.is_empty());
        assert!(!TargetCollection::new(&modules).contains(&copy));
        assert_eq!(TargetCollection::new(&modules).get("utils").unwrap().module, "b");
    }

    #[test]
    fn test_membership_requires_module_presence() {
        let tmp = TempDir::new().unwrap();
        let mut modules = modules_with_targets(tmp.path());
        let target = modules["b"].targets[0].clone();
        assert!(TargetCollection::new(&modules).contains(&target));
        modules.shift_remove("b");
        assert!(!TargetCollection::new(&modules).contains(&target));
    }

    #[test]
    fn test_move_between_modules() {
        let tmp = TempDir::new().unwrap();
        let mut modules = modules_with_targets(tmp.path());
        let id = modules["a"].targets[0].id;
        assert!(TargetCollectionMut::new(&mut modules).move_to(id, "b"));
        assert_eq!(modules["b"].targets.len(), 2);
        assert!(modules["b"].targets.iter().all(|t| t.module == "b"));
    }
}
