//! Pascal language provider, compiling with Free Pascal (`fpc`).

use std::path::Path;
use std::sync::Once;

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

use crate::utils::make_output_file_path;

static mut METADATA: Option<LanguageProviderMetadata> = None;
static METADATA_ONCE: Once = Once::new();

fn init_metadata() {
    METADATA_ONCE.call_once(|| {
        let mut metadata = LanguageProviderMetadata::new("pascal", false);
        metadata.branches.push(LanguageBranch::new("fpc", "3"));
        unsafe { METADATA = Some(metadata); }
    });
}

struct PascalLanguageProvider;

impl LanguageProvider for PascalLanguageProvider {
    fn metadata(&self) -> &'static LanguageProviderMetadata {
        unsafe { METADATA.as_ref().unwrap() }
    }

    fn compile(&self, program: &Program, _branch: &LanguageBranch, output_dir: &Path)
        -> Result<Option<CompilationInfo>, Box<dyn std::error::Error>> {
        let output_file = make_output_file_path(&program.file, Some(output_dir));

        let mut ci = CompilationInfo::new("fpc", output_file.clone());
        ci.compiler.args.push("-O2".to_owned());
        ci.compiler.args.push("-Sd".to_owned());
        ci.compiler.args.push(format!("-o{}", output_file.display()));
        ci.compiler.args.push(program.file.display().to_string());

        Ok(Some(ci))
    }

    fn execute(&self, program: &Program, _kind: ProgramKind)
        -> Result<ExecutionInfo, Box<dyn std::error::Error>> {
        Ok(ExecutionInfo::new(&program.file))
    }
}

/// Register the Pascal language provider.
pub fn init_pascal_providers(manager: &LanguageManager) -> Result<(), Box<dyn std::error::Error>> {
    init_metadata();
    manager.register(std::sync::Arc::new(PascalLanguageProvider));
    Ok(())
}
