//! `judge-bin`: a thin CLI wrapper exposing the `judge` crate's compile,
//! judge, and convert operations from the command line, matching the
//! teacher's `judge-bin`/`sandbox-bin` convention of a small binary crate
//! around a library.

#[macro_use]
extern crate error_chain;
extern crate builtin_languages;
extern crate clap;
extern crate judge;
extern crate sandbox;
extern crate stderrlog;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use error_chain::ChainedError;

use judge::conver::{self, ConverOptions, ConverResult, RuntimeToLimitOptions};
use judge::languages::{ExecutionInfo, LanguageBranch, LanguageIdentifier, LanguageManager, ProgramKind};
use judge::runner::{self, CheckerPlan, ProgramLimits};
use judge::{Program, ProgramFormat, Test};
use sandbox::MemorySize;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        JudgeError(::judge::Error, ::judge::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        Yaml(::serde_yaml::Error);
    }

    errors {
        InvalidArgument(reason: String) {
            description("invalid command line argument")
            display("invalid command line argument: {}", reason)
        }
    }
}

fn parse_lang(s: &str) -> Result<LanguageIdentifier> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 3 {
        bail!(ErrorKind::InvalidArgument(format!(
            "expected LANGUAGE:DIALECT:VERSION, got \"{}\"", s)));
    }
    Ok(LanguageIdentifier::new(parts[0], LanguageBranch::new(parts[1], parts[2])))
}

fn new_language_manager() -> Arc<LanguageManager> {
    let manager = Arc::new(LanguageManager::new());
    builtin_languages::register_all(&manager);
    manager
}

/// Compile (if needed) and resolve the executable form of `program`,
/// without going through `judge::cache` — a one-shot CLI invocation gains
/// nothing from caching across a process lifetime of one compile.
fn compile_one(manager: &LanguageManager, program: &Program, kind: ProgramKind, output_dir: &Path)
    -> Result<ExecutionInfo> {
    let provider = manager.find(&program.language)
        .ok_or_else(|| judge_err(judge::ErrorKind::LanguageNotFound(program.language.clone())))?;

    let compiled = match program.format {
        ProgramFormat::Executable => program.clone(),
        ProgramFormat::Source => {
            let info = provider.compile(program, program.language.branch(), output_dir)
                .map_err(|e| judge_err(judge::ErrorKind::CompilationError(e.to_string())))?;
            match info {
                Some(info) => Program::executable(info.output_file, program.language.clone()),
                None => Program::executable(program.file.clone(), program.language.clone()),
            }
        }
    };

    provider.execute(&compiled, kind)
        .map_err(|e| judge_err(judge::ErrorKind::JudgeError(e.to_string())))
}

/// Wrap a `judge::ErrorKind` as our own `Error`, going through `judge::Error`
/// so the `links` conversion generated by `error_chain!` applies.
fn judge_err(kind: judge::ErrorKind) -> Error {
    Error::from(judge::Error::from(kind))
}

fn do_compile(matches: &clap::ArgMatches<'_>) -> Result<()> {
    let lang = parse_lang(matches.value_of("lang").unwrap())?;
    let kind = match matches.value_of("kind").unwrap() {
        "JUDGEE" => ProgramKind::Judgee,
        "CHECKER" => ProgramKind::Checker,
        "INTERACTOR" => ProgramKind::Interactor,
        _ => unreachable!(),
    };
    let output_dir = matches.value_of("output").map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap());
    let source = matches.value_of("program").unwrap();
    let program = Program::source(source, lang);

    let manager = new_language_manager();
    let exec = compile_one(&manager, &program, kind, &output_dir)?;

    println!("executable: {}", exec.executable.display());
    println!("args: {:?}", exec.args);
    for (k, v) in &exec.envs {
        println!("env: {}={}", k, v);
    }
    Ok(())
}

fn parse_test_suite_entry(entry: &str, name: String) -> Result<Test> {
    let parts: Vec<&str> = entry.splitn(2, ':').collect();
    if parts.len() != 2 {
        bail!(ErrorKind::InvalidArgument(format!(
            "expected INPUT:ANSWER, got \"{}\"", entry)));
    }
    Ok(Test {
        name,
        input_path: PathBuf::from(parts[0]),
        output_path: Some(PathBuf::from(parts[1])),
        time_limit: Duration::from_secs(1),
        memory_limit: MemorySize::MegaBytes(256),
    })
}

fn do_judge(matches: &clap::ArgMatches<'_>) -> Result<()> {
    let manager = new_language_manager();
    let scratch = tempfile::tempdir()?;

    let lang = parse_lang(matches.value_of("lang").unwrap())?;
    let judgee_program = Program::source(matches.value_of("program").unwrap(), lang);
    let judgee_exec = compile_one(&manager, &judgee_program, ProgramKind::Judgee, scratch.path())?;

    let mode = matches.value_of("mode").unwrap();
    let interactive = mode == "INTERACTIVE";

    let cpu_ms: u64 = matches.value_of("cpu_time_limit").unwrap().parse()
        .chain_err(|| "invalid cpu time limit")?;
    let real_ms: u64 = matches.value_of("real_time_limit").unwrap().parse()
        .chain_err(|| "invalid real time limit")?;
    let mem_mb: usize = matches.value_of("memory_limit").unwrap().parse()
        .chain_err(|| "invalid memory limit")?;

    let program_limits = ProgramLimits {
        time_limit: Duration::from_millis(real_ms),
        cpu_time_limit: Duration::from_millis(cpu_ms),
        memory_limit: MemorySize::MegaBytes(mem_mb),
        max_stack: Some(MemorySize::MegaBytes(mem_mb)),
        output_size_limit_bytes: 64 * 1024 * 1024,
    };

    let checker_exec = match matches.value_of("checker").or_else(|| matches.value_of("interactor")) {
        Some(checker_src) => {
            let checker_lang = LanguageIdentifier::new("cpp", LanguageBranch::new("gnu", "17"));
            let checker_program = Program::source(checker_src, checker_lang);
            let kind = if interactive { ProgramKind::Interactor } else { ProgramKind::Checker };
            Some(compile_one(&manager, &checker_program, kind, scratch.path())?)
        }
        None => None,
    };
    let checker_plan = match &checker_exec {
        Some(exec) => CheckerPlan::Custom(exec),
        None => CheckerPlan::Default,
    };
    let checker_limits = ProgramLimits {
        time_limit: program_limits.time_limit * 2,
        cpu_time_limit: program_limits.cpu_time_limit * 2,
        memory_limit: program_limits.memory_limit,
        max_stack: program_limits.max_stack,
        output_size_limit_bytes: 16 * 1024 * 1024,
    };

    for (idx, entry) in matches.values_of("test_suite").unwrap().enumerate() {
        let mut test = parse_test_suite_entry(entry, format!("test{}", idx + 1))?;
        test.time_limit = program_limits.time_limit;
        test.memory_limit = program_limits.memory_limit;

        let outcome = if interactive {
            let checker = checker_exec.as_ref()
                .ok_or_else(|| Error::from("interactive judging requires --interactor"))?;

            // The interactor reports its final verdict out-of-band, in a
            // report file whose path is passed as its last argument (see
            // `judge::runner::test_on_test_interactive`); give each test its
            // own file.
            let verdict_path = scratch.path().join(format!("{}.verdict", test.name));
            let mut checker_for_test = ExecutionInfo::new(checker.executable.clone());
            checker_for_test.args = checker.args.clone();
            checker_for_test.args.push(verdict_path.to_string_lossy().into_owned());
            checker_for_test.envs = checker.envs.clone();

            runner::test_on_test_interactive(&judgee_exec, &checker_for_test, &test,
                &program_limits, &checker_limits, 512)?
        } else {
            runner::test_on_test(&judgee_exec, &checker_plan, &test, scratch.path(),
                &program_limits, &checker_limits, 512)?
        };

        print!("{}: {}", test.name, outcome.report.status.short_name());
        if let Some(comment) = &outcome.report.comment {
            print!(" ({})", comment);
        }
        println!();
    }

    Ok(())
}

fn do_convert(matches: &clap::ArgMatches<'_>) -> Result<()> {
    let package_path = PathBuf::from(matches.value_of("package").unwrap());

    let mut options = ConverOptions::default();
    options.name = matches.value_of("name").map(str::to_owned);
    options.label = matches.value_of("label").map(str::to_owned);
    options.interactive = if matches.is_present("interactive") { Some(true) } else { None };
    options.memory_limit = matches.value_of("memory_limit")
        .map(|v| v.parse::<usize>().map(MemorySize::MegaBytes))
        .transpose()
        .chain_err(|| "invalid memory limit")?;
    options.max_time_limit = matches.value_of("max_time_limit")
        .map(|v| v.parse::<u64>().map(Duration::from_millis))
        .transpose()
        .chain_err(|| "invalid max time limit")?
        .unwrap_or_else(|| Duration::from_secs(2));
    options.ignore_simfile = matches.is_present("ignore_simfile");
    options.seek_for_new_tests = matches.is_present("seek_for_new_tests");
    options.reset_scoring = matches.is_present("reset_scoring");
    options.require_statement = matches.is_present("require_statement");
    options.rtl_opts = RuntimeToLimitOptions::default();

    match conver::convert(&package_path, &options)? {
        ConverResult::Complete { simfile, main_dir } => {
            println!("# main_dir: {}", main_dir.display());
            println!("{}", serde_yaml::to_string(&simfile)?);
        }
        ConverResult::NeedModelSolutionJudgeReport { simfile, main_dir } => {
            println!("# main_dir: {}", main_dir.display());
            println!("# time limits are tentative probe values; judge the model");
            println!("# solution and feed the reports back through reset_time_limits_using_judge_reports");
            println!("{}", serde_yaml::to_string(&simfile)?);
        }
    }

    Ok(())
}

fn get_arg_matches() -> clap::ArgMatches<'static> {
    clap::App::new("judge-bin")
        .version("0.1.0")
        .author("Lancern <msrlancern@126.com>")
        .about("CLI wrapper around the judge core: compile, judge, convert")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .subcommand(clap::SubCommand::with_name("compile")
            .about("Compile a program")
            .arg(clap::Arg::with_name("lang")
                .short("l").long("lang").required(true).takes_value(true)
                .value_name("LANGUAGE:DIALECT:VERSION")
                .help("language of the source program to be compiled"))
            .arg(clap::Arg::with_name("kind")
                .long("kind").takes_value(true).value_name("KIND")
                .possible_values(&["JUDGEE", "CHECKER", "INTERACTOR"])
                .default_value("JUDGEE")
                .help("program kind"))
            .arg(clap::Arg::with_name("output")
                .short("o").long("output").takes_value(true).value_name("OUTPUT_DIR")
                .help("output directory of the compiler"))
            .arg(clap::Arg::with_name("program")
                .required(true).value_name("SOURCE_FILE")
                .help("source file of the program to be compiled")))
        .subcommand(clap::SubCommand::with_name("judge")
            .about("Judge a program against raw input/answer file pairs")
            .arg(clap::Arg::with_name("lang")
                .short("l").long("lang").required(true).takes_value(true)
                .value_name("LANGUAGE:DIALECT:VERSION")
                .help("language of the program to be judged"))
            .arg(clap::Arg::with_name("mode")
                .long("mode").takes_value(true).value_name("MODE")
                .possible_values(&["STANDARD", "SPECIAL_JUDGE", "INTERACTIVE"])
                .default_value("STANDARD")
                .help("judge mode"))
            .arg(clap::Arg::with_name("cpu_time_limit")
                .short("t").long("cpu").takes_value(true).value_name("MS")
                .default_value("1000").help("CPU time limit, in milliseconds"))
            .arg(clap::Arg::with_name("real_time_limit")
                .short("r").long("real").takes_value(true).value_name("MS")
                .default_value("3000").help("wall time limit, in milliseconds"))
            .arg(clap::Arg::with_name("memory_limit")
                .short("m").long("memory").takes_value(true).value_name("MB")
                .default_value("256").help("memory limit, in megabytes"))
            .arg(clap::Arg::with_name("checker")
                .long("checker").required_if("mode", "SPECIAL_JUDGE")
                .takes_value(true).value_name("CHECKER")
                .help("path to the answer checker source"))
            .arg(clap::Arg::with_name("interactor")
                .long("interactor").required_if("mode", "INTERACTIVE")
                .takes_value(true).value_name("INTERACTOR")
                .help("path to the interactor source"))
            .arg(clap::Arg::with_name("test_suite")
                .long("tc").required(true).multiple(true)
                .takes_value(true).value_name("INPUT:ANSWER")
                .help("test cases, as colon-separated input/answer file pairs"))
            .arg(clap::Arg::with_name("program")
                .required(true).value_name("PROGRAM")
                .help("source file of the program to be judged")))
        .subcommand(clap::SubCommand::with_name("convert")
            .about("Normalize a problem package into a Simfile")
            .arg(clap::Arg::with_name("package")
                .required(true).value_name("PACKAGE")
                .help("path to the problem package directory or zip"))
            .arg(clap::Arg::with_name("name").long("name").takes_value(true))
            .arg(clap::Arg::with_name("label").long("label").takes_value(true))
            .arg(clap::Arg::with_name("interactive").long("interactive"))
            .arg(clap::Arg::with_name("memory_limit").long("memory").takes_value(true).value_name("MB"))
            .arg(clap::Arg::with_name("max_time_limit").long("max-tl").takes_value(true).value_name("MS"))
            .arg(clap::Arg::with_name("ignore_simfile").long("ignore-simfile"))
            .arg(clap::Arg::with_name("seek_for_new_tests").long("seek-new-tests"))
            .arg(clap::Arg::with_name("reset_scoring").long("reset-scoring"))
            .arg(clap::Arg::with_name("require_statement").long("require-statement")))
        .get_matches()
}

fn do_main() -> Result<()> {
    stderrlog::new().quiet(false).verbosity(3).init().unwrap();
    let matches = get_arg_matches();

    match matches.subcommand() {
        ("compile", Some(m)) => do_compile(m),
        ("judge", Some(m)) => do_judge(m),
        ("convert", Some(m)) => do_convert(m),
        _ => unreachable!(),
    }
}

fn main() {
    if let Err(e) = do_main() {
        eprintln!("error: {}", e.display_chain().to_string());
        std::process::exit(1);
    }
}
