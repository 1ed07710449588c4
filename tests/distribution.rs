//! End-to-end reads of a small distribution on disk.

mod common;

use common::{distribution, write};
use tbxtools::core::{DependencyKind, TargetKind};
use tbxtools::ops::{self, BuildInfo, ReadError};
use tbxtools::{Config, Distribution};

#[test]
fn test_processing_order_puts_root_module_first() {
    let tmp = distribution();
    let resolve = tbxtools::resolver::resolve(tmp.path(), &Config::default().layout).unwrap();
    let order = resolve.processing_order();

    assert_eq!(order[0], "libtbx");
    let position = |name: &str| order.iter().position(|m| m == name).unwrap();
    assert!(position("boost_adaptbx") < position("scitbx"));
}

#[test]
fn test_read_distribution() {
    let tmp = distribution();
    let dist = ops::read_distribution(tmp.path(), &Config::default()).unwrap();

    let modules: Vec<&str> = dist.modules.keys().map(String::as_str).collect();
    assert!(modules.contains(&"scitbx"));
    assert!(modules.contains(&"libtbx"));
    assert!(!modules.contains(&"clipper"));
    assert!(!modules.contains(&"docs"));

    let targets = dist.targets();
    assert_eq!(targets.len(), 3);

    let core = targets.get("scitbx_core").unwrap();
    assert_eq!(core.kind, TargetKind::Shared);
    assert_eq!(core.module, "scitbx");
    assert_eq!(core.output_path, "#/lib");
    assert!(core.extra_libs.is_empty());

    let ext = targets.get("scitbx_ext").unwrap();
    assert_eq!(ext.kind, TargetKind::Module);
    assert!(ext.extra_libs.contains("scitbx_core"));
    assert!(ext.extra_libs.contains("boost_python"));
    assert!(!ext.extra_libs.contains("m"));

    let show = targets.get("scitbx.show").unwrap();
    assert_eq!(show.kind, TargetKind::Program);
    assert_eq!(show.origin_path, "cctbx_project/scitbx/tools");
    assert_eq!(show.sources, vec!["show.cpp"]);
    assert!(show.extra_libs.contains("scitbx_core"));
}

#[test]
fn test_build_info_merges_into_distribution() {
    let tmp = distribution();
    let mut dist = ops::read_distribution(tmp.path(), &Config::default()).unwrap();
    let info = BuildInfo::parse(
        "dependencies:\n  scitbx_ext: [hdf5]\ndefinitions:\n  scitbx_core: SCITBX_CORE\n",
        "build_info.yaml",
    )
    .unwrap();

    ops::apply_build_info(&info, &mut dist, &Config::default().layout).unwrap();

    let targets = dist.targets();
    assert!(targets.get("scitbx_ext").unwrap().extra_libs.contains("hdf5"));
    assert!(targets
        .get("scitbx_core")
        .unwrap()
        .definitions
        .contains("SCITBX_CORE"));
}

#[test]
fn test_unexpected_library_is_reported() {
    let tmp = distribution();
    write(
        tmp.path(),
        "cctbx_project/scitbx/tools/SConscript",
        "Import(\"env_base\")\nenv_base.Program(target=\"scitbx.show\", source=[\"show.cpp\"], LIBS=[\"mystery\"])\n",
    );

    let err = ops::read_distribution(tmp.path(), &Config::default()).unwrap_err();
    match err {
        ReadError::UnexpectedLibraries(err) => assert_eq!(err.libraries, vec!["mystery"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_lazy_distribution_loads_requirements() {
    let tmp = distribution();
    let mut dist = Distribution::new(tmp.path(), Vec::new(), Config::default().layout).unwrap();
    dist.request_modules(["scitbx"]).unwrap();

    assert!(dist.requested().contains("scitbx"));
    assert!(dist.get("boost_adaptbx").is_some());
    let scitbx = dist.get("scitbx").unwrap();
    assert_eq!(
        scitbx.config.kind_of_aliased("boost_adaptbx", &Config::default().layout.module_aliases),
        Some(DependencyKind::Build)
    );
}

#[test]
fn test_lazy_distribution_missing_requirement() {
    let tmp = distribution();
    let mut dist = Distribution::new(tmp.path(), Vec::new(), Config::default().layout).unwrap();
    assert!(dist.request_modules(["no_such_module"]).is_err());
}
