//! Python language provider. Interpreted: `compile` always returns `None`.

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

use crate::utils::Config;

static mut METADATA: Option<LanguageProviderMetadata> = None;
static METADATA_ONCE: Once = Once::new();

fn init_metadata() {
    METADATA_ONCE.call_once(|| {
        let mut metadata = LanguageProviderMetadata::new("python", true);
        metadata.branches.push(LanguageBranch::new("cpython", "3"));
        unsafe { METADATA = Some(metadata); }
    });
}

/// Where to find the Python port of the testlib module a checker or
/// interactor imports.
#[derive(Clone, Debug, Deserialize, Default)]
struct PythonLanguageConfig {
    testlib_module_dir: Option<PathBuf>,
}

impl Config for PythonLanguageConfig { }

const PYTHON_LANG_CONFIG_FILE_NAME: &str = "config/python-config.yaml";

struct PythonLanguageProvider {
    config: PythonLanguageConfig,
}

impl LanguageProvider for PythonLanguageProvider {
    fn metadata(&self) -> &'static LanguageProviderMetadata {
        unsafe { METADATA.as_ref().unwrap() }
    }

    fn compile(&self, _program: &Program, _branch: &LanguageBranch, _output_dir: &Path)
        -> Result<Option<CompilationInfo>, Box<dyn std::error::Error>> {
        Ok(None)
    }

    fn execute(&self, program: &Program, kind: ProgramKind)
        -> Result<ExecutionInfo, Box<dyn std::error::Error>> {
        let mut ei = ExecutionInfo::new("python3");
        ei.args.push("-OO".to_owned());
        ei.args.push("-B".to_owned());

        if kind.is_jury() {
            if let Some(module_dir) = &self.config.testlib_module_dir {
                ei.envs.push(("PYTHONPATH".to_owned(), module_dir.display().to_string()));
            }
        }

        ei.args.push(program.file.display().to_string());
        Ok(ei)
    }
}

/// Register the Python language provider.
pub fn init_py_providers(manager: &LanguageManager) -> Result<(), Box<dyn std::error::Error>> {
    init_metadata();
    let config = PythonLanguageConfig::from_file(PYTHON_LANG_CONFIG_FILE_NAME)?;
    manager.register(std::sync::Arc::new(PythonLanguageProvider { config }));
    Ok(())
}
