//! A small distribution shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

use tempfile::TempDir;

const LIBTBX_SCONSCRIPT: &str = r#"
env_base = Environment(LIBS=["m"])
Export("env_base")
"#;

const SCITBX_SCONSCRIPT: &str = r##"
Import("env_base")
env = env_base.Clone()
env.SharedLibrary(target="#lib/scitbx_core", source=["core.cpp"])

env_ext = env.Clone(SHLIBPREFIX="")
env_ext.Append(LIBS=["scitbx_core", "boost_python"])
env_ext.SharedLibrary(target="#lib/scitbx_ext", source=["ext.cpp"])

SConscript("tools/SConscript")
"##;

const TOOLS_SCONSCRIPT: &str = r#"
Import("env_base")
env_base.Program(target="scitbx.show", source=["show.cpp"], LIBS=["scitbx_core"])
"#;

const CLIPPER_SCONSCRIPT: &str = r#"
env = Environment(LIBS=["clipper_private"])
env.StaticLibrary(target="clipper_core", source=["core.cpp"])
"#;

pub fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

pub fn distribution() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(root, "libtbx/libtbx_config", "{}\n");
    write(root, "libtbx/SConscript", LIBTBX_SCONSCRIPT);
    write(root, "cctbx_project/boost_adaptbx/libtbx_config", "{}\n");
    write(
        root,
        "cctbx_project/scitbx/libtbx_config",
        "{\n  'modules_required_for_build': ['boost_adaptbx'],\n}\n",
    );
    write(root, "cctbx_project/scitbx/SConscript", SCITBX_SCONSCRIPT);
    write(root, "cctbx_project/scitbx/core.cpp", "");
    write(root, "cctbx_project/scitbx/ext.cpp", "");
    write(root, "cctbx_project/scitbx/tools/SConscript", TOOLS_SCONSCRIPT);
    write(root, "cctbx_project/scitbx/tools/show.cpp", "");
    write(root, "clipper/SConscript", CLIPPER_SCONSCRIPT);
    fs::create_dir_all(root.join("docs")).unwrap();
    tmp
}
