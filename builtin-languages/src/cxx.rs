//! C and C++ language providers, compiling with `gcc`/`g++`.

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

static mut C_METADATA: Option<LanguageProviderMetadata> = None;
static mut CPP_METADATA: Option<LanguageProviderMetadata> = None;
static METADATA_ONCE: Once = Once::new();

fn init_metadata() {
    METADATA_ONCE.call_once(|| {
        let mut c_metadata = LanguageProviderMetadata::new("c", false);
        c_metadata.branches.push(LanguageBranch::new("gnu", "11"));
        c_metadata.branches.push(LanguageBranch::new("gnu", "17"));
        unsafe { C_METADATA = Some(c_metadata); }

        let mut cpp_metadata = LanguageProviderMetadata::new("cpp", false);
        cpp_metadata.branches.push(LanguageBranch::new("gnu", "11"));
        cpp_metadata.branches.push(LanguageBranch::new("gnu", "14"));
        cpp_metadata.branches.push(LanguageBranch::new("gnu", "17"));
        cpp_metadata.branches.push(LanguageBranch::new("gnu", "20"));
        unsafe { CPP_METADATA = Some(cpp_metadata); }
    });
}

/// Where to find the C++ port of the testlib headers/archive a checker or
/// interactor links against.
#[derive(Clone, Debug, Deserialize, Default)]
struct CxxLanguageConfig {
    testlib_include_dir: Option<PathBuf>,
    testlib_lib_dir: Option<PathBuf>,
}

impl Config for CxxLanguageConfig { }

const CXX_LANG_CONFIG_FILE_NAME: &str = "config/cxx-config.yaml";
const TESTLIB_LIB_NAME: &str = "wavetest";

struct CxxProvider {
    compiler: &'static str,
    std_prefix: &'static str,
    config: CxxLanguageConfig,
}

impl CxxProvider {
    fn compile_with(&self, program: &Program, branch: &LanguageBranch, output_dir: &Path, kind_is_jury: bool)
        -> Result<Option<CompilationInfo>, Box<dyn std::error::Error>> {
        let output_file = make_output_file_path(&program.file, Some(output_dir));
        let mut ci = CompilationInfo::new(self.compiler, output_file.clone());
        ci.compiler.args.push("-O2".to_owned());
        ci.compiler.args.push(format!("-std={}{}", self.std_prefix, branch.version()));
        ci.compiler.args.push("-DONLINE_JUDGE".to_owned());

        if kind_is_jury {
            if let Some(include_dir) = &self.config.testlib_include_dir {
                ci.compiler.args.push(format!("-I{}", include_dir.display()));
            }
            if let Some(lib_dir) = &self.config.testlib_lib_dir {
                ci.compiler.args.push(format!("-L{}", lib_dir.display()));
            }
        }

        ci.compiler.args.push("-o".to_owned());
        ci.compiler.args.push(output_file.display().to_string());
        ci.compiler.args.push(program.file.display().to_string());

        if kind_is_jury {
            ci.compiler.args.push(format!("-l{}", TESTLIB_LIB_NAME));
        }

        Ok(Some(ci))
    }
}

fn execute_compiled(program: &Program) -> Result<ExecutionInfo, Box<dyn std::error::Error>> {
    Ok(ExecutionInfo::new(&program.file))
}

struct CLanguageProvider(CxxProvider);

impl LanguageProvider for CLanguageProvider {
    fn metadata(&self) -> &'static LanguageProviderMetadata {
        unsafe { C_METADATA.as_ref().unwrap() }
    }

    fn compile(&self, program: &Program, branch: &LanguageBranch, output_dir: &Path)
        -> Result<Option<CompilationInfo>, Box<dyn std::error::Error>> {
        self.0.compile_with(program, branch, output_dir, false)
    }

    fn execute(&self, program: &Program, _kind: ProgramKind)
        -> Result<ExecutionInfo, Box<dyn std::error::Error>> {
        execute_compiled(program)
    }
}

struct CppLanguageProvider(CxxProvider);

impl LanguageProvider for CppLanguageProvider {
    fn metadata(&self) -> &'static LanguageProviderMetadata {
        unsafe { CPP_METADATA.as_ref().unwrap() }
    }

    fn compile(&self, program: &Program, branch: &LanguageBranch, output_dir: &Path)
        -> Result<Option<CompilationInfo>, Box<dyn std::error::Error>> {
        // The checker/interactor kind isn't visible from `compile`'s
        // signature; link testlib unconditionally for C++ since it is the
        // language custom checkers are overwhelmingly written in.
        self.0.compile_with(program, branch, output_dir, true)
    }

    fn execute(&self, program: &Program, _kind: ProgramKind)
        -> Result<ExecutionInfo, Box<dyn std::error::Error>> {
        execute_compiled(program)
    }
}

/// Register the C and C++ language providers.
pub fn init_cxx_providers(manager: &LanguageManager) -> Result<(), Box<dyn std::error::Error>> {
    init_metadata();

    let config = CxxLanguageConfig::from_file(CXX_LANG_CONFIG_FILE_NAME)?;

    manager.register(std::sync::Arc::new(CLanguageProvider(CxxProvider {
        compiler: "gcc",
        std_prefix: "gnu",
        config: config.clone(),
    })));
    manager.register(std::sync::Arc::new(CppLanguageProvider(CxxProvider {
        compiler: "g++",
        std_prefix: "gnu++",
        config,
    })));

    Ok(())
}
