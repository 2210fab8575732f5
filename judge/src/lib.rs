//! This crate implements the core logic of the judge: compiling submissions,
//! running them against a test suite inside the sandbox, consulting a
//! checker, scoring, and producing a structured report.
//!

#[macro_use]
extern crate error_chain;
extern crate log;
extern crate libc;
extern crate nix;
extern crate sandbox;
extern crate tempfile;
extern crate zip;

#[cfg(feature = "serde")]
extern crate serde;
#[cfg(feature = "serde")]
extern crate serde_yaml;

pub mod languages;
pub mod cache;
pub mod package;
pub mod simfile;
pub mod conver;
pub mod runner;
pub mod checker;
pub mod worker;

use std::path::PathBuf;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Serialize, Deserialize};

use sandbox::{MemorySize, SandboxResult};

use languages::LanguageIdentifier;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Sandbox(sandbox::Error, sandbox::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        Zip(::zip::result::ZipError);
    }

    errors {
        /// The problem package is malformed: missing checker for an
        /// interactive problem, missing required statement, no solution
        /// found, memory limit nowhere defined, a test missing its input
        /// (or output, for non-interactive problems), a corrupt zip, or an
        /// unreadable file.
        PackageInvalid(reason: String) {
            description("problem package is invalid")
            display("problem package is invalid: {}", reason)
        }

        /// The submitted program failed to compile. `log` is the compiler's
        /// diagnostic output, truncated to the configured bound.
        CompilationError(log: String) {
            description("compilation failed")
            display("compilation failed:\n{}", log)
        }

        /// The checker (or interactor) failed to compile.
        CheckerCompilationError(log: String) {
            description("checker compilation failed")
            display("checker compilation failed:\n{}", log)
        }

        /// An internal sandbox or I/O failure unrelated to the judgee's own
        /// code; distinct from a per-test `Verdict`, which is a reported
        /// value rather than a raised error.
        JudgeError(reason: String) {
            description("internal judge error")
            display("internal judge error: {}", reason)
        }

        /// No language provider is registered for the given language
        /// identifier.
        LanguageNotFound(lang: LanguageIdentifier) {
            description("no language provider registered for this language")
            display("no language provider registered for language {}", lang)
        }
    }
}

/// A program stored as a file on disk, along with the language environment
/// needed to compile/run it. The file may be a source file or an already
/// compiled artifact.
#[derive(Clone, Debug)]
pub struct Program {
    /// Path to the program file.
    pub file: PathBuf,

    /// Language and branch the program is written in.
    pub language: LanguageIdentifier,

    /// Whether `file` holds source code or a compiled artifact.
    pub format: ProgramFormat,
}

impl Program {
    /// Create a `Program` referring to a source file.
    pub fn source<P: Into<PathBuf>>(file: P, language: LanguageIdentifier) -> Program {
        Program { file: file.into(), language, format: ProgramFormat::Source }
    }

    /// Create a `Program` referring to an already compiled artifact.
    pub fn executable<P: Into<PathBuf>>(file: P, language: LanguageIdentifier) -> Program {
        Program { file: file.into(), language, format: ProgramFormat::Executable }
    }
}

/// The on-disk form of a `Program`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgramFormat {
    /// Source code, requiring compilation before it can run.
    Source,

    /// An already compiled artifact (machine code, bytecode, ...).
    Executable,
}

/// The problem descriptor: everything needed to judge submissions against
/// one problem.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Simfile {
    /// Full name of the problem.
    pub name: String,

    /// Short, stable identifier for the problem.
    pub label: String,

    /// Path to the problem statement within the package, if any.
    pub statement: Option<PathBuf>,

    /// Path to the checker source within the package. `None` means the
    /// default built-in checker is used.
    pub checker: Option<PathBuf>,

    /// Memory limit applied to tests that do not declare their own.
    pub memory_limit: Option<MemorySize>,

    /// Whether this problem uses the interactive protocol.
    pub interactive: bool,

    /// Candidate solutions; the first entry is the model solution.
    pub solutions: Vec<PathBuf>,

    /// Test groups, in declaration order.
    pub tgroups: Vec<TestGroup>,
}

impl Simfile {
    /// Create an empty `Simfile` with the given name and label.
    pub fn new<N, L>(name: N, label: L) -> Simfile
        where N: Into<String>, L: Into<String> {
        Simfile {
            name: name.into(),
            label: label.into(),
            statement: None,
            checker: None,
            memory_limit: None,
            interactive: false,
            solutions: Vec::new(),
            tgroups: Vec::new(),
        }
    }

    /// The model solution: the first entry of `solutions`, if any.
    pub fn model_solution(&self) -> Option<&PathBuf> {
        self.solutions.first()
    }

    /// Iterate over every test across every group, in declaration order.
    pub fn tests(&self) -> impl Iterator<Item = &Test> {
        self.tgroups.iter().flat_map(|g| g.tests.iter())
    }
}

/// A named subset of tests evaluated together. `score` is the maximum points
/// attainable for the group; group id `0` (the "initial"/sample half) is
/// always scored `0`.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TestGroup {
    /// Stable group identifier, extracted from test names by a splitter.
    /// The empty string is used for ungrouped tests; `"0"` is the initial/
    /// sample half (also the target of `ocen`-aliased tests).
    pub id: String,

    /// Maximum points attainable for this group.
    pub score: i64,

    /// Tests in this group, in declaration order.
    pub tests: Vec<Test>,
}

impl TestGroup {
    /// Is this the special "initial"/sample group?
    pub fn is_initial(&self) -> bool {
        self.id == "0"
    }
}

/// A single test case.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Test {
    /// Test name, carrying the group id as a prefix.
    pub name: String,

    /// Path to the input file, within the package.
    pub input_path: PathBuf,

    /// Path to the expected-output file. Absent for interactive problems.
    pub output_path: Option<PathBuf>,

    /// Wall-clock time limit.
    pub time_limit: Duration,

    /// Memory limit.
    pub memory_limit: MemorySize,
}

/// Outcome of one whole judge evaluation.
#[derive(Clone, Debug, Default)]
pub struct JudgeReport {
    /// Per-group reports, in declaration order.
    pub groups: Vec<GroupReport>,

    /// Human-readable judge log, one block per test plus a trailing score
    /// summary line per §6.
    pub judge_log: String,
}

impl JudgeReport {
    /// Total score across every group.
    pub fn total_score(&self) -> i64 {
        self.groups.iter().map(|g| g.score).sum()
    }

    /// Total maximum score, summing only groups with a positive `max_score`.
    pub fn total_max_score(&self) -> i64 {
        self.groups.iter().map(|g| g.max_score).filter(|s| *s > 0).sum()
    }
}

/// Report for one test group.
#[derive(Clone, Debug, Default)]
pub struct GroupReport {
    /// Points actually awarded for this group.
    pub score: i64,

    /// Maximum points attainable for this group.
    pub max_score: i64,

    /// Per-test reports, in declaration order.
    pub tests: Vec<TestReport>,
}

/// Report for one test.
#[derive(Clone, Debug)]
pub struct TestReport {
    /// Test name.
    pub name: String,

    /// Verdict of this test.
    pub status: Verdict,

    /// Wall-clock runtime of the judgee.
    pub runtime: Duration,

    /// Time limit that was in effect.
    pub time_limit: Duration,

    /// Peak memory used by the judgee.
    pub memory_used: MemorySize,

    /// Memory limit that was in effect.
    pub memory_limit: MemorySize,

    /// Comment produced by the checker, if any.
    pub comment: Option<String>,
}

impl TestReport {
    /// Build a `SKIPPED` report for a test that was never executed because
    /// skip-and-resume already determined its group's outcome.
    pub fn skipped(test: &Test) -> TestReport {
        TestReport {
            name: test.name.clone(),
            status: Verdict::Skipped,
            runtime: Duration::new(0, 0),
            time_limit: test.time_limit,
            memory_used: MemorySize::Bytes(0),
            memory_limit: test.memory_limit,
            comment: None,
        }
    }
}

/// Verdict of a single test.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Verdict {
    /// The judgee produced a correct answer.
    Ok,

    /// The judgee produced an incorrect answer.
    WrongAnswer,

    /// The judgee exceeded its time limit (wall or CPU).
    TimeLimitExceeded,

    /// The judgee exceeded its memory limit.
    MemoryLimitExceeded,

    /// The judgee exceeded its output size limit.
    OutputLimitExceeded,

    /// The judgee terminated abnormally (non-zero exit, or a signal).
    RuntimeError,

    /// The checker (or interactor) itself failed, so the test's outcome is
    /// inconclusive.
    CheckerError,

    /// The test was never run because skip-and-resume already determined
    /// the group's outcome.
    Skipped,
}

impl Verdict {
    /// Short, log-friendly name matching `spec.md` §3's status enum.
    pub fn short_name(&self) -> &'static str {
        match self {
            Verdict::Ok => "OK",
            Verdict::WrongAnswer => "WA",
            Verdict::TimeLimitExceeded => "TLE",
            Verdict::MemoryLimitExceeded => "MLE",
            Verdict::OutputLimitExceeded => "OLE",
            Verdict::RuntimeError => "RTE",
            Verdict::CheckerError => "CHECKER_ERROR",
            Verdict::Skipped => "SKIPPED",
        }
    }

    /// Is this verdict `Ok`?
    pub fn is_accepted(&self) -> bool {
        *self == Verdict::Ok
    }
}

/// Classify a completed sandbox run against the limits that were configured
/// for it. `output_exceeded` should be set by the caller when a splice-pump
/// byte cap was hit, since the sandbox itself has no notion of an output
/// size limit (§4.7 step 4).
pub fn classify_sandbox_result(
    result: &SandboxResult,
    cpu_time_limit: Duration,
    time_limit: Duration,
    memory_limit: MemorySize,
    output_exceeded: bool,
) -> Verdict {
    use sandbox::ExitCode;

    if result.cpu_time > cpu_time_limit || result.wall_runtime > time_limit {
        return Verdict::TimeLimitExceeded;
    }
    if result.peak_memory_bytes > memory_limit.bytes() {
        return Verdict::MemoryLimitExceeded;
    }
    if output_exceeded {
        return Verdict::OutputLimitExceeded;
    }
    match result.exit_code {
        ExitCode::Exited if result.status == 0 => Verdict::Ok,
        _ => Verdict::RuntimeError,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sandbox::{ExitCode, MemorySize, SandboxResult};

    use super::{classify_sandbox_result, Verdict};

    fn ok_result() -> SandboxResult {
        SandboxResult {
            exit_code: ExitCode::Exited,
            status: 0,
            wall_runtime: Duration::from_millis(10),
            cpu_time: Duration::from_millis(10),
            peak_memory_bytes: 1024,
        }
    }

    #[test]
    fn normal_fast_run_is_ok() {
        let v = classify_sandbox_result(&ok_result(), Duration::from_secs(1),
            Duration::from_secs(1), MemorySize::MegaBytes(64), false);
        assert_eq!(Verdict::Ok, v);
    }

    #[test]
    fn exceeding_cpu_time_is_tle_even_if_wall_time_is_fine() {
        let mut result = ok_result();
        result.cpu_time = Duration::from_secs(2);
        let v = classify_sandbox_result(&result, Duration::from_secs(1),
            Duration::from_secs(5), MemorySize::MegaBytes(64), false);
        assert_eq!(Verdict::TimeLimitExceeded, v);
    }

    #[test]
    fn exceeding_memory_is_mle() {
        let mut result = ok_result();
        result.peak_memory_bytes = MemorySize::MegaBytes(128).bytes();
        let v = classify_sandbox_result(&result, Duration::from_secs(1),
            Duration::from_secs(1), MemorySize::MegaBytes(64), false);
        assert_eq!(Verdict::MemoryLimitExceeded, v);
    }

    #[test]
    fn nonzero_exit_is_rte() {
        let mut result = ok_result();
        result.status = 1;
        let v = classify_sandbox_result(&result, Duration::from_secs(1),
            Duration::from_secs(1), MemorySize::MegaBytes(64), false);
        assert_eq!(Verdict::RuntimeError, v);
    }

    #[test]
    fn output_cap_hit_is_ole_even_on_clean_exit() {
        let v = classify_sandbox_result(&ok_result(), Duration::from_secs(1),
            Duration::from_secs(1), MemorySize::MegaBytes(64), true);
        assert_eq!(Verdict::OutputLimitExceeded, v);
    }
}
