#[macro_use]
extern crate error_chain;
extern crate sandbox;
extern crate clap;

use std::fs::File;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use error_chain::ChainedError;

use sandbox::{
    MemorySize,
    UserId,
    ProcessBuilder,
    ExitCode,
};


error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Sandbox(sandbox::Error, sandbox::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        Clap(::clap::Error);
    }
}


struct ApplicationConfig {
    pub file: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,

    pub cpu_time_limit: Option<Duration>,
    pub real_time_limit: Option<Duration>,
    pub memory_limit: Option<MemorySize>,

    pub input_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub error_file: Option<PathBuf>,

    pub uid: Option<UserId>,
}

impl ApplicationConfig {
    fn new() -> ApplicationConfig {
        ApplicationConfig {
            file: PathBuf::new(),
            args: Vec::new(),
            envs: Vec::new(),
            cpu_time_limit: None,
            real_time_limit: None,
            memory_limit: None,
            input_file: None,
            output_file: None,
            error_file: None,
            uid: None,
        }
    }
}

fn get_app_config() -> Result<ApplicationConfig> {
    let matches = clap::App::new("Sandbox Wrapper")
        .version("0.1")
        .author("Lancern <msrlancern@126.com>")
        .about("Wrapper program for the judge core's sandbox component")
        .arg(clap::Arg::with_name("cpu_time_limit")
            .short("t")
            .long("cpu")
            .takes_value(true)
            .value_name("CPU_TIME_LIMIT")
            .help("specify the CPU time limit, in milliseconds"))
        .arg(clap::Arg::with_name("real_time_limit")
            .short("r")
            .long("real")
            .takes_value(true)
            .value_name("REAL_TIME_LIMIT")
            .help("specify the real time limit, in milliseconds (defaults to 1.5x cpu + 0.5s)"))
        .arg(clap::Arg::with_name("memory_limit")
            .short("m")
            .long("mem")
            .takes_value(true)
            .value_name("MEMORY_LIMIT")
            .help("specify the memory limit, in megabytes."))
        .arg(clap::Arg::with_name("input_file")
            .short("i")
            .long("input")
            .takes_value(true)
            .value_name("INPUT_FILE")
            .help("specify the path to the input file"))
        .arg(clap::Arg::with_name("output_file")
            .short("o")
            .long("output")
            .takes_value(true)
            .value_name("OUTPUT_FILE")
            .help("specify the path to the output file"))
        .arg(clap::Arg::with_name("error_file")
            .short("e")
            .long("error")
            .takes_value(true)
            .value_name("ERROR_FILE")
            .help("specify the path to the error file"))
        .arg(clap::Arg::with_name("uid")
            .short("u")
            .long("uid")
            .takes_value(true)
            .value_name("UID")
            .help("specify the effective uid of the sandbox process"))
        .arg(clap::Arg::with_name("envs")
            .long("env")
            .takes_value(true)
            .value_name("ENVs")
            .multiple(true)
            .help("specify the environment variables passed to the child process"))
        .arg(clap::Arg::with_name("program")
            .value_name("PROGRAM")
            .takes_value(true)
            .multiple(true)
            .required(true)
            .help("specify the program along with its arguments"))
        .get_matches();

    let mut config = ApplicationConfig::new();

    let program = matches.values_of("program").unwrap().collect::<Vec<&'_ str>>();
    config.file = PathBuf::from_str(program[0]).unwrap();
    for arg in &program[1..] {
        config.args.push((*arg).to_owned());
    }

    if let Some(arg_envs) = matches.values_of("envs") {
        for envs in arg_envs {
            if !envs.contains('=') {
                return Err(Error::from(format!("invalid environment variable: {}", envs)));
            }

            let (name, value) = envs.split_at(envs.find('=').unwrap());
            config.envs.push((name.to_owned(), value.to_owned()));
        }
    }

    if let Some(cpu_limit) = matches.value_of("cpu_time_limit") {
        let cpu_limit = u64::from_str(cpu_limit)
            .chain_err(|| Error::from(format!("invalid cpu limit value: {}", cpu_limit)))?;
        config.cpu_time_limit = Some(Duration::from_millis(cpu_limit));
    }

    if let Some(real_limit) = matches.value_of("real_time_limit") {
        let real_limit = u64::from_str(real_limit)
            .chain_err(|| Error::from(format!("invalid real time limit value: {}", real_limit)))?;
        config.real_time_limit = Some(Duration::from_millis(real_limit));
    }

    if let Some(mem_limit) = matches.value_of("memory_limit") {
        let mem_limit = usize::from_str(mem_limit)
            .chain_err(|| Error::from(format!("invalid memory limit value: {}", mem_limit)))?;
        config.memory_limit = Some(MemorySize::MegaBytes(mem_limit));
    }

    config.input_file = matches.value_of("input_file").map(|f| PathBuf::from_str(f).unwrap());
    config.output_file = matches.value_of("output_file").map(|f| PathBuf::from_str(f).unwrap());
    config.error_file = matches.value_of("error_file").map(|f| PathBuf::from_str(f).unwrap());

    if let Some(uid) = matches.value_of("uid") {
        let uid = UserId::from_str(uid)
            .chain_err(|| Error::from(format!("invalid user ID value: {}", uid)))?;
        config.uid = Some(uid);
    }

    Ok(config)
}

fn do_main() -> Result<()> {
    let config = get_app_config()?;

    let mut builder = ProcessBuilder::new(&config.file);
    for arg in &config.args {
        builder.add_arg(arg)?;
    }
    for (name, value) in &config.envs {
        builder.add_env(name, value)?;
    }

    builder.limits.cpu_time_limit = config.cpu_time_limit;
    builder.limits.real_time_limit = config.real_time_limit;
    builder.limits.memory_limit = config.memory_limit;

    if let Some(input_file) = config.input_file {
        builder.redirections.stdin = Some(File::open(input_file)
            .chain_err(|| Error::from("cannot open input file"))?);
    }

    if let Some(output_file) = config.output_file {
        builder.redirections.stdout = Some(File::create(output_file)
            .chain_err(|| Error::from("cannot open output file"))?);
    }

    if let Some(error_file) = config.error_file {
        builder.redirections.stderr = Some(File::create(error_file)
            .chain_err(|| Error::from("cannot open error file"))?);
    }

    builder.uid = config.uid;

    let handle = sandbox::async_run(builder)?;
    let result = handle.await_result()?;

    print!("Process exited: ");
    match result.exit_code {
        ExitCode::Exited => println!("normal, exit code = {}", result.status),
        ExitCode::Killed => println!("killed by signal {}", result.status),
        ExitCode::Dumped => println!("killed and dumped by signal {}", result.status),
    };

    println!("Resource usage:");
    println!("\tWall time: {} ms", result.wall_runtime.as_millis());
    println!("\tCPU time: {} ms", result.cpu_time.as_millis());
    println!("\tPeak resident set size: {} bytes", result.peak_memory_bytes);

    Ok(())
}

fn main() -> Result<()> {
    match do_main() {
        Ok(..) => Ok(()),
        Err(e) => {
            eprintln!("error: {}", e.display_chain().to_string());
            Err(e)
        }
    }
}
