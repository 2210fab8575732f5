//! This module implements language related facilities used in the judge.
//!

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

use super::Program;

/// Identifier of a programming language and its runtime environment.
///
/// Language identifiers are a 3-tuple (language, dialect, version) that
/// uniquely identifies a programming language and its runtime environment.
/// Language providers can be filtered out by the `language` part, and
/// `dialect`/`version` are sent to the language provider to determine and
/// initialize the corresponding environment when something needs to be
/// executed.
///
/// The last 2 fields of a language identifier, (dialect, version), are
/// called the language's branch, represented by `LanguageBranch`.
///
/// For example, suppose we have a language identifier (`cpp`, `gnu`, `17`).
/// The C++ language provider will be selected by this language identifier,
/// and the provider will choose `g++` to compile source code with C++17
/// features available.
#[derive(Clone, Debug, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LanguageIdentifier(String, LanguageBranch);

impl LanguageIdentifier {
    /// Create a new `LanguageIdentifier` instance.
    pub fn new<T>(language: T, branch: LanguageBranch) -> Self
        where T: Into<String> {
        LanguageIdentifier(language.into(), branch)
    }

    /// Get the language part of the identifier.
    pub fn language(&self) -> &str {
        &self.0
    }

    /// Get the branch of the language.
    pub fn branch(&self) -> &LanguageBranch {
        &self.1
    }

    /// Get the dialect part of the identifier.
    pub fn dialect(&self) -> &str {
        self.branch().dialect()
    }

    /// Get the version part of the identifier.
    pub fn version(&self) -> &str {
        self.branch().version()
    }
}

impl PartialEq for LanguageIdentifier {
    fn eq(&self, other: &LanguageIdentifier) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}

impl Display for LanguageIdentifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("({}, {}, {})", self.language(), self.dialect(), self.version()))
    }
}

/// A branch of a language: a 2-tuple (dialect, version).
#[derive(Clone, Eq, Debug, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LanguageBranch(String, String);

impl LanguageBranch {
    /// Create a new `LanguageBranch` instance.
    pub fn new<T1, T2>(dialect: T1, version: T2) -> Self
        where T1: Into<String>, T2: Into<String> {
        LanguageBranch(dialect.into(), version.into())
    }

    /// Get the dialect of the branch.
    pub fn dialect(&self) -> &str {
        &self.0
    }

    /// Get the version of the branch.
    pub fn version(&self) -> &str {
        &self.1
    }
}

impl PartialEq for LanguageBranch {
    fn eq(&self, other: &LanguageBranch) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}

impl Display for LanguageBranch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("({}, {})", self.dialect(), self.version()))
    }
}

/// Metadata about a language provider.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LanguageProviderMetadata {
    /// The name of the language. Corresponds to the first field of a
    /// `LanguageIdentifier`.
    pub name: String,

    /// All branches supported by this language provider.
    pub branches: Vec<LanguageBranch>,

    /// Does this language need to be compiled into some form (binary code,
    /// bytecode, etc.) by a compiler before it can be executed?
    pub interpreted: bool,
}

impl LanguageProviderMetadata {
    /// Create a new `LanguageProviderMetadata` instance.
    pub fn new<T>(name: T, interpreted: bool) -> Self
        where T: Into<String> {
        LanguageProviderMetadata {
            name: name.into(),
            branches: Vec::new(),
            interpreted,
        }
    }
}

/// Which role a program plays when it is executed. Determines which
/// resource limits and environment apply.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgramKind {
    /// The contestant's submitted program.
    Judgee,

    /// A special judge / answer checker.
    Checker,

    /// An interactor, in interactive mode.
    Interactor,
}

impl ProgramKind {
    /// Is this program run on the jury's side (checker or interactor),
    /// rather than being the contestant's own submission?
    pub fn is_jury(&self) -> bool {
        matches!(self, ProgramKind::Checker | ProgramKind::Interactor)
    }
}

/// This trait defines functions implemented by language providers: the
/// ability to compile and execute a program written in some language. This
/// trait is object safe and used behind `Arc<dyn LanguageProvider>`.
///
/// Implementors must be thread safe since the trait requires `Sync`.
pub trait LanguageProvider : Sync {
    /// Get metadata about the language provider. The returned metadata
    /// should be statically allocated.
    fn metadata(&self) -> &'static LanguageProviderMetadata;

    /// Create a `CompilationInfo` instance with the information needed to
    /// compile the source code, or `Ok(None)` if this language needs no
    /// compilation step (e.g. an interpreted language).
    fn compile(&self, program: &Program, branch: &LanguageBranch, output_dir: &std::path::Path)
        -> std::result::Result<Option<CompilationInfo>, Box<dyn std::error::Error>>;

    /// Create an `ExecutionInfo` instance with the information needed to
    /// execute the program.
    fn execute(&self, program: &Program, kind: ProgramKind)
        -> std::result::Result<ExecutionInfo, Box<dyn std::error::Error>>;
}

/// Provide centralized, thread-safe language management. Language providers
/// are registered statically at process startup (by `builtin-languages` or
/// a caller's own providers) — there is no dynamic-library loading.
pub struct LanguageManager {
    providers: RwLock<HashMap<String, Vec<Arc<dyn LanguageProvider>>>>,
}

impl LanguageManager {
    /// Create a new, empty `LanguageManager` instance.
    pub fn new() -> Self {
        LanguageManager {
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a language provider in the language manager.
    pub fn register(&self, provider: Arc<dyn LanguageProvider>) {
        let metadata = provider.metadata();
        let mut lock = self.providers.write().unwrap();
        lock.entry(metadata.name.clone()).or_insert_with(Vec::new).push(provider.clone());
        log::info!("Language provider for language \"{}\" registered.", metadata.name);
    }

    /// Find a `LanguageProvider` instance registered in this manager that is
    /// capable of handling the given language environment, or `None` if
    /// none is suitable.
    pub fn find(&self, lang: &LanguageIdentifier) -> Option<Arc<dyn LanguageProvider>> {
        let lock = self.providers.read().unwrap();
        if let Some(providers) = lock.get(lang.language()) {
            for provider in providers {
                if provider.metadata().branches.contains(lang.branch()) {
                    return Some(provider.clone());
                }
            }
        }

        None
    }

    /// Get every language identifier registered in this manager.
    pub fn languages(&self) -> Vec<LanguageIdentifier> {
        let lock = self.providers.read().unwrap();
        let mut result = Vec::new();
        for (name, providers) in lock.iter() {
            for provider in providers {
                for branch in &provider.metadata().branches {
                    result.push(LanguageIdentifier::new(name.clone(), branch.clone()));
                }
            }
        }

        result
    }
}

impl Default for LanguageManager {
    fn default() -> Self {
        LanguageManager::new()
    }
}

/// Necessary information to execute a program.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExecutionInfo {
    /// Path to the executable (or interpreter) to run.
    pub executable: PathBuf,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Environment variables to pass to the program.
    pub envs: Vec<(String, String)>,
}

impl ExecutionInfo {
    /// Create a new `ExecutionInfo` instance.
    pub fn new<T>(executable: T) -> ExecutionInfo
        where T: Into<PathBuf> {
        ExecutionInfo {
            executable: executable.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }
}

/// Necessary information to compile a source program.
#[derive(Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompilationInfo {
    /// Information needed to run the compiler.
    pub compiler: ExecutionInfo,

    /// Path to the artifact the compiler produces.
    pub output_file: PathBuf,
}

impl CompilationInfo {
    /// Create a new `CompilationInfo` instance.
    pub fn new<T1, T2>(compiler: T1, output_file: T2) -> CompilationInfo
        where T1: Into<PathBuf>, T2: Into<PathBuf> {
        CompilationInfo {
            compiler: ExecutionInfo::new(compiler),
            output_file: output_file.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LanguageBranch, LanguageIdentifier};

    #[test]
    fn identifier_equality_ignores_nothing() {
        let a = LanguageIdentifier::new("cpp", LanguageBranch::new("gnu", "17"));
        let b = LanguageIdentifier::new("cpp", LanguageBranch::new("gnu", "17"));
        let c = LanguageIdentifier::new("cpp", LanguageBranch::new("clang", "17"));
        assert_eq!(a, b);
        assert!(a != c);
    }
}
