//! Module discovery and dependency ordering.
//!
//! Discovery is pure filesystem inspection; ordering works only on the
//! discovered modules and their manifests, so the whole resolve step is
//! deterministic for a given tree.

pub mod discovery;
pub mod errors;
pub mod graph;

pub use discovery::find_modules;
pub use errors::GraphError;
pub use graph::DependencyGraph;

use std::path::Path;

use indexmap::IndexMap;

use crate::core::Module;
use crate::util::config::LayoutConfig;

/// Discovered modules together with their acyclic dependency graph.
#[derive(Debug)]
pub struct Resolve {
    pub modules: IndexMap<String, Module>,
    pub graph: DependencyGraph,
}

impl Resolve {
    /// Names of the discovered modules in processing order, dependencies
    /// first. Graph nodes for missing dependencies are left out.
    pub fn processing_order(&self) -> Vec<String> {
        self.graph
            .order()
            .into_iter()
            .filter(|name| self.modules.contains_key(name))
            .collect()
    }
}

/// Discover the modules under `root` and order them.
pub fn resolve(root: &Path, layout: &LayoutConfig) -> Result<Resolve, GraphError> {
    let modules = find_modules(root, layout)?;
    let graph = DependencyGraph::build(&modules, layout);
    tracing::debug!(
        "Resolved {} modules ({} graph nodes)",
        modules.len(),
        graph.node_count()
    );
    Ok(Resolve { modules, graph })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::DistFixture;

    #[test]
    fn test_processing_order_skips_missing_modules() {
        let fixture = DistFixture::new()
            .module("libtbx", Some("{}"))
            .module("iotbx", Some("{'modules_required_for_build': ['not_here']}"));
        let resolved = resolve(fixture.path(), &LayoutConfig::default()).unwrap();
        assert!(resolved.graph.contains_node("not_here"));
        assert_eq!(resolved.processing_order(), vec!["libtbx", "iotbx"]);
    }
}
