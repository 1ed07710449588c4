//! The `scons_targets.yml` summary of a read distribution.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::TbxDistribution;
use crate::util::fs::write_string;

/// Default file name of the summary.
pub const SUMMARY_FILE: &str = "scons_targets.yml";

/// Output directory targets are assumed to use unless they say otherwise.
const DEFAULT_OUTPUT_PATH: &str = "#/lib";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Yaml,
    Json,
}

/// Everything the summary says about the distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub modules: Vec<ModuleEntry>,
    pub targets: Vec<TargetEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub name: String,
    pub path: String,
}

/// One target. Fields equal to their usual value are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub module: String,
    pub name: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub sources: Vec<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TargetSummary {
    pub fn from_distribution(dist: &TbxDistribution) -> Self {
        let modules = dist
            .modules
            .values()
            .map(|m| ModuleEntry {
                name: m.name.clone(),
                path: m.path.clone(),
            })
            .collect();
        let targets = dist
            .targets()
            .iter()
            .map(|t| TargetEntry {
                dependencies: t.extra_libs.iter().cloned().collect(),
                filename: (t.filename != t.name).then(|| t.filename.clone()),
                module: t.module.clone(),
                name: t.name.clone(),
                origin: t.origin_path.clone(),
                output_path: (t.output_path != DEFAULT_OUTPUT_PATH).then(|| t.output_path.clone()),
                sources: t.sources.clone(),
                kind: t.kind.as_str().to_string(),
            })
            .collect();
        TargetSummary { modules, targets }
    }

    pub fn render(&self, format: ExportFormat) -> Result<String> {
        match format {
            ExportFormat::Yaml => serde_yaml::to_string(self).context("failed to serialize summary"),
            ExportFormat::Json => {
                let mut text = serde_json::to_string_pretty(self).context("failed to serialize summary")?;
                text.push('\n');
                Ok(text)
            }
        }
    }

    pub fn write(&self, path: &Path, format: ExportFormat) -> Result<()> {
        write_string(path, &self.render(format)?)?;
        tracing::info!(
            "Wrote {} modules and {} targets to {}",
            self.modules.len(),
            self.targets.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Module, Target, TargetKind};
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn summary() -> TargetSummary {
        let tmp = TempDir::new().unwrap();
        let mut modules = IndexMap::new();
        modules.insert(
            "scitbx".to_string(),
            Module::open("scitbx", "cctbx_project/scitbx", tmp.path(), &Default::default()).unwrap(),
        );
        let mut dist = TbxDistribution::new(tmp.path(), modules);

        let id = dist.next_target_id();
        let mut ext = Target::new(id, TargetKind::Module, "#/lib/scitbx_ext", vec!["ext.cpp".into()], Vec::new());
        ext.origin_path = "cctbx_project/scitbx".into();
        ext.extra_libs = ["scitbx_boost_python".to_string(), "boost_python".to_string()].into();
        dist.add_target("scitbx", ext);

        let id = dist.next_target_id();
        let mut tool = Target::new(id, TargetKind::Program, "bin/tool", vec!["tool.cpp".into()], Vec::new());
        tool.name = "tool_scitbx".into();
        tool.origin_path = "cctbx_project/scitbx/app".into();
        dist.add_target("scitbx", tool);

        TargetSummary::from_distribution(&dist)
    }

    #[test]
    fn test_usual_values_are_omitted() {
        let summary = summary();
        assert_eq!(summary.modules[0].path, "cctbx_project/scitbx");

        let ext = &summary.targets[0];
        assert_eq!(ext.kind, "module");
        assert_eq!(ext.filename, None);
        assert_eq!(ext.output_path, None);
        assert_eq!(ext.dependencies, vec!["boost_python", "scitbx_boost_python"]);

        let tool = &summary.targets[1];
        assert_eq!(tool.filename.as_deref(), Some("tool"));
        assert_eq!(tool.output_path.as_deref(), Some("bin"));
        assert!(tool.dependencies.is_empty());
    }

    #[test]
    fn test_yaml_output() {
        let yaml = summary().render(ExportFormat::Yaml).unwrap();
        assert!(yaml.contains("type: program"));
        assert!(yaml.contains("filename: tool"));
        assert!(!yaml.contains("output_path: '#/lib'"));

        let parsed: TargetSummary = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.targets[1].name, "tool_scitbx");
        assert!(parsed.targets[1].dependencies.is_empty());
    }

    #[test]
    fn test_json_output() {
        let json = summary().render(ExportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["targets"][0]["type"], "module");
        assert!(value["targets"][0].get("output_path").is_none());
    }
}
