//! Rust language provider, compiling with `rustup run <version> rustc`.

use std::path::{Path, PathBuf};
use std::sync::Once;

use serde::Deserialize;

use judge::Program;
use judge::languages::{
    CompilationInfo,
    ExecutionInfo,
    LanguageBranch,
    LanguageManager,
    LanguageProvider,
    LanguageProviderMetadata,
    ProgramKind,
};

use crate::utils::{make_output_file_path, Config};

static mut METADATA: Option<LanguageProviderMetadata> = None;
static METADATA_ONCE: Once = Once::new();

fn init_metadata() {
    METADATA_ONCE.call_once(|| {
        let mut metadata = LanguageProviderMetadata::new("rust", false);
        metadata.branches.push(LanguageBranch::new("stable", "2018"));
        metadata.branches.push(LanguageBranch::new("stable", "2021"));
        unsafe { METADATA = Some(metadata); }
    });
}

/// Where to find the Rust port of testlib a checker or interactor links
/// against.
#[derive(Clone, Debug, Deserialize, Default)]
struct RustLanguageConfig {
    testlib_dir: Option<PathBuf>,
}

impl Config for RustLanguageConfig { }

const RUST_LANG_CONFIG_FILE_NAME: &str = "config/rust-config.yaml";

struct RustLanguageProvider {
    config: RustLanguageConfig,
}

impl LanguageProvider for RustLanguageProvider {
    fn metadata(&self) -> &'static LanguageProviderMetadata {
        unsafe { METADATA.as_ref().unwrap() }
    }

    fn compile(&self, program: &Program, branch: &LanguageBranch, output_dir: &Path)
        -> Result<Option<CompilationInfo>, Box<dyn std::error::Error>> {
        let output_file = make_output_file_path(&program.file, Some(output_dir));

        let mut ci = CompilationInfo::new("rustup", output_file);
        ci.compiler.args.push("run".to_owned());
        ci.compiler.args.push("stable".to_owned());
        ci.compiler.args.push("rustc".to_owned());
        ci.compiler.args.push("-C".to_owned());
        ci.compiler.args.push("opt-level=2".to_owned());
        ci.compiler.args.push("--edition".to_owned());
        ci.compiler.args.push(branch.version().to_owned());
        ci.compiler.args.push("--cfg".to_owned());
        ci.compiler.args.push("online_judge".to_owned());

        if let Some(testlib_dir) = &self.config.testlib_dir {
            ci.compiler.args.push("-L".to_owned());
            ci.compiler.args.push(testlib_dir.display().to_string());
        }

        ci.compiler.args.push("-o".to_owned());
        ci.compiler.args.push(ci.output_file.display().to_string());
        ci.compiler.args.push(program.file.display().to_string());

        Ok(Some(ci))
    }

    fn execute(&self, program: &Program, _kind: ProgramKind)
        -> Result<ExecutionInfo, Box<dyn std::error::Error>> {
        Ok(ExecutionInfo::new(&program.file))
    }
}

/// Register the Rust language provider.
pub fn init_rust_providers(manager: &LanguageManager) -> Result<(), Box<dyn std::error::Error>> {
    init_metadata();
    let config = RustLanguageConfig::from_file(RUST_LANG_CONFIG_FILE_NAME)?;
    manager.register(std::sync::Arc::new(RustLanguageProvider { config }));
    Ok(())
}
