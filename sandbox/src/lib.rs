//! This crate implements a sandbox for the judge. The sandbox is responsible
//! for executing tasks in a safe and monitored environment.
//!
//! The sandbox implements:
//!
//! * Normal process operations: create, start, monitor and kill a process
//!   group;
//!
//! * Resource limits: CPU time limits, real time limits, memory limits, file
//!   size limits, stack size limits and process count limits;
//!
//! * Redirections: redirects stdin, stdout and stderr of child processes to
//! specific file descriptors;
//!
//! * Mount namespace isolation: a declarative list of files to create and
//!   host paths to bind-mount into the child's view of the filesystem.
//!

#[macro_use]
extern crate error_chain;
extern crate libc;
extern crate nix;
extern crate procinfo;


mod daemon;
mod misc;
mod mount;
mod rlimits;

pub use mount::{Mount, RootfsOptions};

use std::cmp::Ordering;
use std::ffi::CString;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::IntoRawFd;

use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::unistd::{Uid, ForkResult, Pid as NixPid};

use daemon::{ProcessDaemonContext, DaemonThreadJoinHandle};
use rlimits::Resource;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
        Nix(::nix::Error);
    }

    errors {
        InvalidProcessArgument(arg: String) {
            description("invalid argv")
        }

        InvalidEnvironmentVariable(env: String) {
            description("invalid env")
        }

        DaemonJoinFailed {
            description("failed to join the daemon thread")
        }

        ChildStartupFailed {
            description("failed to launch child process")
        }

        MountFailed(path: String, reason: String) {
            description("failed to apply mount entry")
            display("failed to mount '{}': {}", path, reason)
        }
    }
}


/// Measurement of the size of a block of memory.
#[derive(Clone, Copy, Debug, Eq)]
pub enum MemorySize {
    /// Measurement in bytes.
    Bytes(usize),

    /// Measurement in kilobytes.
    KiloBytes(usize),

    /// Measurement in megabytes.
    MegaBytes(usize),

    /// Measurement in gigabytes.
    GigaBytes(usize),

    /// Measurement in terabytes.
    TeraBytes(usize)
}

impl MemorySize {
    /// Convert the current measurement to memory size in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            MemorySize::Bytes(s) => *s,
            MemorySize::KiloBytes(s) => s * 1024,
            MemorySize::MegaBytes(s) => s * 1024 * 1024,
            MemorySize::GigaBytes(s) => s * 1024 * 1024 * 1024,
            MemorySize::TeraBytes(s) => s * 1024 * 1024 * 1024 * 1024
        }
    }
}

impl PartialEq for MemorySize {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for MemorySize {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemorySize {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes().cmp(&other.bytes())
    }
}

impl From<usize> for MemorySize {
    fn from(value: usize) -> MemorySize {
        MemorySize::Bytes(value)
    }
}

impl Display for MemorySize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MemorySize::Bytes(s) => f.write_fmt(format_args!("{} B", s)),
            MemorySize::KiloBytes(s) => f.write_fmt(format_args!("{} KB", s)),
            MemorySize::MegaBytes(s) => f.write_fmt(format_args!("{} MB", s)),
            MemorySize::GigaBytes(s) => f.write_fmt(format_args!("{} GB", s)),
            MemorySize::TeraBytes(s) => f.write_fmt(format_args!("{} TB", s))
        }
    }
}

/// Specify limits on time and memory resources.
#[derive(Clone, Copy)]
pub struct ProcessResourceLimits {
    /// Limit on CPU time available for the child process. `None` if no
    /// constraits are set.
    pub cpu_time_limit: Option<Duration>,

    /// Limit on real time available for the child process. `None` if no
    /// constraits are set. If left `None` while `cpu_time_limit` is set, a
    /// default of `1.5 * cpu_time_limit + 0.5s` is applied by `async_run`:
    /// CPU time remains the authoritative limit and the wall-clock one is a
    /// safety net against a process that sleeps instead of spinning.
    pub real_time_limit: Option<Duration>,

    /// Limit on memory available for the child process. `None` if no constraits
    /// are set.
    pub memory_limit: Option<MemorySize>,

    /// Limit on the size of the process's stack. `None` if unconstrained.
    pub max_stack_size: Option<MemorySize>,

    /// Limit on the size of any single file the process creates. `None` if
    /// unconstrained.
    pub max_file_size: Option<MemorySize>,

    /// Limit on the number of processes (and threads) the sandboxed user may
    /// own at once. `None` if unconstrained.
    pub process_num_limit: Option<u32>,
}

impl ProcessResourceLimits {
    /// Create a new `ProcessResourceLimits` instance that contains no
    /// constraits.
    fn empty() -> ProcessResourceLimits {
        ProcessResourceLimits {
            cpu_time_limit: None,
            real_time_limit: None,
            memory_limit: None,
            max_stack_size: None,
            max_file_size: None,
            process_num_limit: None
        }
    }

    /// Fill in the default wall-clock limit (`1.5 * cpu_time_limit + 0.5s`)
    /// when a CPU limit is present but no real time limit was given.
    fn with_default_real_time_limit(mut self) -> Self {
        if self.real_time_limit.is_none() {
            if let Some(cpu_tl) = self.cpu_time_limit {
                self.real_time_limit = Some(cpu_tl * 3 / 2 + Duration::from_millis(500));
            }
        }
        self
    }
}

impl Default for ProcessResourceLimits {
    fn default() -> ProcessResourceLimits {
        ProcessResourceLimits::empty()
    }
}

/// Specify redirections of standard streams.
pub struct ProcessRedirection {
    /// Redirected `stdin`, or `None` if `stdin` does not need to be redirected.
    pub stdin: Option<File>,

    /// Redirected `stdout`, or `None` if `stdout` does not need to be
    /// redirected.
    pub stdout: Option<File>,

    /// Redirected `stderr`, or `None` if `stderr` does not need to be
    /// redirected.
    pub stderr: Option<File>
}

impl ProcessRedirection {
    /// Create a new `ProcessRedirection` instance representing that neither
    /// `stdin`, `stdout` nor `stderr` need to be redirected.
    fn empty() -> ProcessRedirection {
        ProcessRedirection {
            stdin: None,
            stdout: None,
            stderr: None
        }
    }
}

impl Default for ProcessRedirection {
    fn default() -> ProcessRedirection {
        ProcessRedirection::empty()
    }
}

/// Type for representing a user identification.
pub type UserId = u32;

/// Type for process identifiers.
pub type Pid = i32;

/// Provide mechanism to build a child process in sandboxed environment.
pub struct ProcessBuilder {
    /// Path to the executable file.
    file: PathBuf,

    /// Arguments passed to the child process.
    args: Vec<String>,

    /// Environment variables passed to the child process.
    envs: Vec<(String, String)>,

    /// Working directory of the child process.
    pub working_dir: Option<PathBuf>,

    /// Limits to be applied to the new child process.
    pub limits: ProcessResourceLimits,

    /// Whether to use native rlimit mechanism to limit the resource usage of
    /// the child process. If you choose to use native rlimit mechanism, then
    /// the sandbox cannot report `TimeLimitExceeded` and `MemoryLimitExceeded`
    /// error, and the real time limit will not be applied.
    pub use_native_rlimit: bool,

    /// Redirections to be applied to the new child process.
    pub redirections: ProcessRedirection,

    /// Effective user ID of the new child process.
    pub uid: Option<UserId>,

    /// Declarative mount entries applied inside the child's own mount
    /// namespace before `exec`.
    mounts: Vec<Mount>,

    /// Rootfs-wide constraints applied alongside `mounts`. `Some` implies the
    /// child unshares its mount namespace even if `mounts` is empty.
    pub rootfs: Option<RootfsOptions>,
}

impl ProcessBuilder {
    /// Create a new `ProcessBuilder` instance, given the executable file's
    /// path.
    pub fn new(file: &Path) -> ProcessBuilder {
        ProcessBuilder {
            file: file.to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,

            limits: ProcessResourceLimits::empty(),
            use_native_rlimit: false,
            redirections: ProcessRedirection::empty(),
            uid: None,

            mounts: Vec::new(),
            rootfs: None,
        }
    }

    /// Add an argument to the child process. If the given argument is not a
    /// valid C-style string, then returns `Err(e)` where the error kind of `e`
    /// is `ErrorKind::InvalidProcessArgument`.
    pub fn add_arg(&mut self, arg: &str) -> Result<()> {
        if misc::is_valid_c_string(arg) {
            self.args.push(arg.to_owned());
            Ok(())
        } else {
            bail!(ErrorKind::InvalidProcessArgument(arg.to_owned()));
        }
    }

    /// Add an environment variable to the child process.
    pub fn add_env(&mut self, name: &str, value: &str) -> Result<()> {
        if !misc::is_valid_c_string(name) {
            bail!(ErrorKind::InvalidEnvironmentVariable(name.to_owned()));
        }
        if !misc::is_valid_c_string(value) {
            bail!(ErrorKind::InvalidEnvironmentVariable(value.to_owned()));
        }
        if name.as_bytes().contains(&b'=') {
            bail!(ErrorKind::InvalidEnvironmentVariable(name.to_owned()));
        }
        if value.as_bytes().contains(&b'=') {
            bail!(ErrorKind::InvalidEnvironmentVariable(value.to_owned()));
        }

        self.envs.push((name.to_owned(), value.to_owned()));
        Ok(())
    }

    /// Add all environment variables in the calling process to the environment
    /// variables of the child process.
    pub fn inherit_env(&mut self) {
        for (name, value) in std::env::vars() {
            self.add_env(&name, &value)
                .expect("invalid environment variable in current process.");
        }
    }

    /// Add a declarative mount entry, applied inside the child's own mount
    /// namespace right before `exec`.
    pub fn add_mount(&mut self, mount: Mount) {
        self.mounts.push(mount);
    }

    /// Determine whether the child needs its own mount namespace.
    fn needs_mount_namespace(&self) -> bool {
        !self.mounts.is_empty() || self.rootfs.is_some()
    }

    /// Apply working directory changes to the calling process.
    fn apply_working_directory(&self) -> Result<()> {
        if self.working_dir.is_some() {
            nix::unistd::chdir(self.working_dir.as_ref().unwrap().as_path())?;
        }

        Ok(())
    }

    /// Apply resource limits using native `rlimit` mechanism to the calling
    /// process.
    fn apply_native_rlimits(&self) -> Result<()> {
        if self.use_native_rlimit {
            if self.limits.cpu_time_limit.is_some() {
                rlimits::setrlimit_hard(Resource::CPUTime,
                    self.limits.cpu_time_limit.unwrap().as_secs())?;
            }
            if self.limits.memory_limit.is_some() {
                rlimits::setrlimit_hard(Resource::AddressSpace,
                    self.limits.memory_limit.unwrap().bytes() as u64)?;
            }
            // The real time limit is ignored here.
        }

        Ok(())
    }

    /// Apply the always-on native limits that are not gated behind
    /// `use_native_rlimit`: stack size, output file size and process count.
    /// Unlike CPU time and memory, these are cheap for the kernel to enforce
    /// directly and the daemon thread cannot retroactively undo a file
    /// already written past the cap, so they are always applied via rlimit.
    fn apply_hard_rlimits(&self) -> Result<()> {
        if let Some(stack) = self.limits.max_stack_size {
            rlimits::setrlimit_hard(Resource::StackSize, stack.bytes() as u64)?;
        }
        if let Some(file_size) = self.limits.max_file_size {
            rlimits::setrlimit_hard(Resource::FileSize, file_size.bytes() as u64)?;
        }
        if let Some(nproc) = self.limits.process_num_limit {
            rlimits::setrlimit_hard(Resource::ProcessCount, nproc as u64)?;
        }

        Ok(())
    }

    /// Isolate the calling process into its own mount namespace and apply
    /// `self.mounts`. No-op if neither mounts nor rootfs constraints were
    /// configured.
    fn apply_mounts(&self) -> Result<()> {
        if !self.needs_mount_namespace() {
            return Ok(());
        }

        nix::sched::unshare(CloneFlags::CLONE_NEWNS)?;
        mount::apply_mounts(&self.mounts)?;

        Ok(())
    }

    /// Put the calling process into a new process group of which it is the
    /// leader, so the whole subtree spawned from it can later be killed in
    /// one `killpg` call via `Handle::kill`.
    fn apply_process_group(&self) -> Result<()> {
        nix::unistd::setpgid(NixPid::from_raw(0), NixPid::from_raw(0))?;
        Ok(())
    }

    /// Apply redirections specified in `self.redirections` to the calling
    /// process.
    fn apply_redirections(&mut self) -> Result<()> {
        if self.redirections.stdin.is_some() {
            nix::unistd::dup2(
                self.redirections.stdin.take().unwrap().into_raw_fd(),
                libc::STDIN_FILENO)?;
        }
        if self.redirections.stdout.is_some() {
            nix::unistd::dup2(
                self.redirections.stdout.take().unwrap().into_raw_fd(),
                libc::STDOUT_FILENO)?;
        }
        if self.redirections.stderr.is_some() {
            nix::unistd::dup2(
                self.redirections.stderr.take().unwrap().into_raw_fd(),
                libc::STDERR_FILENO)?;
        }

        Ok(())
    }

    /// Set the effective user ID stored in `self.uid` of the calling process.
    fn apply_uid(&self) -> Result<()> {
        if self.uid.is_some() {
            nix::unistd::setuid(Uid::from_raw(self.uid.unwrap()))?;
        }

        Ok(())
    }

    /// Start child process. This function will be called after `fork` in the
    /// child process. This function initializes necessary components in the
    /// child process (e.g. process group, mounts, redirections, `setuid`,
    /// rlimits, etc.) and then calls `execve`.
    fn start_child(mut self) -> Result<()> {
        // TODO: Change the return type of this function to Result<!> after the
        // TODO: `!` type stablizes.

        // Build argv and envs into native format.
        let native_file = CString::new(
                Vec::from(self.file.as_os_str().as_bytes()))
            .unwrap();
        let native_argv = self.args.iter()
            .map(|arg| CString::new(arg.clone()).unwrap())
            .collect::<Vec<CString>>();
        let native_envs = self.envs.iter()
            .map(|env| format!("{}={}", env.0, env.1))
            .map(|env| CString::new(env).unwrap())
            .collect::<Vec<CString>>();

        // Become the leader of a fresh process group so the whole subtree can
        // be killed at once later.
        self.apply_process_group()?;

        // Unshare the mount namespace and apply bind mounts while still
        // privileged.
        self.apply_mounts()?;

        // Apply redirections.
        self.apply_redirections()?;

        // Set current effective user ID if necessary. Must happen after mount
        // namespace setup, which generally requires privileges the sandboxed
        // identity does not have.
        self.apply_uid()?;

        // Apply working directory changes.
        self.apply_working_directory()?;

        // Apply native resource limits.
        self.apply_native_rlimits()?;
        self.apply_hard_rlimits()?;

        // Finally, execve!
        nix::unistd::execve(
            &native_file, native_argv.as_ref(), native_envs.as_ref())?;

        unreachable!()
    }

    /// Initializes any necessary components in the parent process to monitor
    /// the states of the child process. This function should be called after
    /// `fork` in the parent process.
    fn start_parent(self, child_pid: Pid) -> Process {
        let daemon_limits = if self.use_native_rlimit {
            None
        } else {
            Some(self.limits)
        };

        // The child calls `setpgid(0, 0)` as its first action, so its process
        // group id equals its pid; this holds race-free regardless of which
        // of parent/child observes it first, per POSIX semantics of
        // `setpgid`.
        Process::attach(child_pid, daemon_limits)
    }

    /// Start the process in a sandboxed environment.
    pub fn start(mut self) -> Result<Process> {
        self.limits = self.limits.with_default_real_time_limit();

        match nix::unistd::fork()? {
            ForkResult::Parent { child } =>
                Ok(self.start_parent(child.as_raw())),
            ForkResult::Child => {
                match self.start_child() {
                    Ok(..) => unreachable!(),
                    Err(e) => {
                        eprintln!("failed to start child process: {}", e);
                        // Send a `SIGUSR1` signal to self to terminate self
                        // and notify the daemon thread.
                        nix::sys::signal::kill(
                                nix::unistd::getpid(), Signal::SIGUSR1)
                            .expect("cannot kill self.");
                        // Sit in a tight loop, wait to be killed by the
                        // delivery of the `SIGUSR1` signal whose default
                        // handling behavior is killing the target process.
                        loop { }
                    }
                }
            }
        }
    }
}

/// Type for the exit codes of processes.
pub type ProcessExitCode = i32;

/// Exit status of a sandboxed process.
#[derive(Clone)]
pub enum ProcessExitStatus {
    /// The process has not exited yet.
    NotExited,

    /// The process exited normally.
    Normal(ProcessExitCode),

    /// The process was killed by the delivery of a signal. The second field
    /// is `true` if the signal also produced a core dump.
    KilledBySignal(Signal, bool),

    /// The process was killed by the daemon due to CPU time limit.
    CPUTimeLimitExceeded,

    /// The process was killed by the daemon due to real time limit.
    RealTimeLimitExceeded,

    /// The process was killed by the daemon due to memory limit.
    MemoryLimitExceeded,

    /// The process was killed by the daemon due to internal errors in the
    /// daemon.
    SandboxError { err_msg: String }
}

/// Coarse classification of how a sandboxed process stopped, mirroring the
/// `Si{code,status}` outcome shape: `EXITED` for a normal return, `KILLED`
/// for a signal without a core dump (including every daemon-enforced limit),
/// `DUMPED` for a signal that also produced a core.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitCode {
    /// The process called `exit`/returned from `main`.
    Exited,

    /// The process was terminated by a signal, no core dump.
    Killed,

    /// The process was terminated by a signal and dumped core.
    Dumped
}

/// Outcome of a completed sandbox run: what happened, and how much of each
/// resource it consumed.
#[derive(Clone, Copy, Debug)]
pub struct SandboxResult {
    /// Coarse classification of the termination.
    pub exit_code: ExitCode,

    /// The process's exit code (`ExitCode::Exited`) or terminating signal
    /// number (`ExitCode::Killed`/`ExitCode::Dumped`).
    pub status: i32,

    /// Wall-clock time elapsed between `async_run` and termination.
    pub wall_runtime: Duration,

    /// Total CPU time (user + kernel) consumed, as last observed by the
    /// monitoring daemon.
    pub cpu_time: Duration,

    /// Peak resident set size observed, in bytes.
    pub peak_memory_bytes: usize
}

impl ProcessExitStatus {
    /// Build the `SandboxResult` the caller sees once a run has terminated.
    /// Classifying a daemon-enforced limit vs. an ordinary signal is left to
    /// the caller (per §4.1: compare `cpu_time`/`peak_memory_bytes`/
    /// `wall_runtime` against the limits that were configured, not signal
    /// numbers alone); this only captures what actually happened.
    fn into_sandbox_result(self, wall_runtime: Duration, rusage: ProcessResourceUsage)
        -> SandboxResult {
        let (exit_code, status) = match self {
            ProcessExitStatus::Normal(code) => (ExitCode::Exited, code),
            ProcessExitStatus::KilledBySignal(sig, true) => (ExitCode::Dumped, sig as i32),
            ProcessExitStatus::KilledBySignal(sig, false) => (ExitCode::Killed, sig as i32),
            ProcessExitStatus::CPUTimeLimitExceeded
            | ProcessExitStatus::RealTimeLimitExceeded
            | ProcessExitStatus::MemoryLimitExceeded => (ExitCode::Killed, Signal::SIGKILL as i32),
            ProcessExitStatus::SandboxError { .. } | ProcessExitStatus::NotExited =>
                (ExitCode::Killed, Signal::SIGKILL as i32),
        };

        SandboxResult {
            exit_code,
            status,
            wall_runtime,
            cpu_time: rusage.cpu_time(),
            peak_memory_bytes: rusage.resident_set_size.bytes()
        }
    }
}

impl Default for ProcessExitStatus {
    fn default() -> ProcessExitStatus {
        ProcessExitStatus::NotExited
    }
}

/// Resource usage statistics of a sandboxed process.
#[derive(Clone, Copy)]
pub struct ProcessResourceUsage {
    /// CPU time spent in user mode.
    pub user_cpu_time: Duration,

    /// CPU time spent in kernel mode.
    pub kernel_cpu_time: Duration,

    /// Virtual memory size.
    pub virtual_mem_size: MemorySize,

    /// Resident set size.
    pub resident_set_size: MemorySize
}

impl ProcessResourceUsage {
    /// Create an empty `ProcessResourceUsage` instance.
    pub fn empty() -> ProcessResourceUsage {
        ProcessResourceUsage {
            user_cpu_time: Duration::new(0, 0),
            kernel_cpu_time: Duration::new(0, 0),
            virtual_mem_size: MemorySize::Bytes(0),
            resident_set_size: MemorySize::Bytes(0)
        }
    }

    /// Get resource usage for the specified process.
    pub fn usage_of(pid: Pid) -> std::io::Result<ProcessResourceUsage> {
        Ok(ProcessResourceUsage::from(procinfo::pid::stat(pid)?))
    }

    /// Get the total CPU time consumed, a.k.a. the sum of the user CPU time and
    /// the kernel CPU time.
    pub fn cpu_time(&self) -> Duration {
        self.user_cpu_time + self.kernel_cpu_time
    }

    /// Update the usage statistics stored in this instance to the statistics
    /// stored in the given statistics.
    pub fn update(&mut self, other: &ProcessResourceUsage) {
        if other.user_cpu_time > self.user_cpu_time {
            self.user_cpu_time = other.user_cpu_time;
        }
        if other.kernel_cpu_time > self.kernel_cpu_time {
            self.kernel_cpu_time = other.kernel_cpu_time;
        }
        if other.virtual_mem_size > self.virtual_mem_size {
            self.virtual_mem_size = other.virtual_mem_size;
        }
        if other.resident_set_size > self.resident_set_size {
            self.resident_set_size = other.resident_set_size;
        }
    }
}

impl From<procinfo::pid::Stat> for ProcessResourceUsage {
    fn from(stat: procinfo::pid::Stat) -> ProcessResourceUsage {
        ProcessResourceUsage {
            user_cpu_time: misc::duration_from_clocks(stat.utime),
            kernel_cpu_time: misc::duration_from_clocks(stat.stime),
            virtual_mem_size: MemorySize::Bytes(stat.vsize),
            resident_set_size: MemorySize::Bytes(stat.rss)
        }
    }
}

impl Default for ProcessResourceUsage {
    fn default() -> ProcessResourceUsage {
        ProcessResourceUsage::empty()
    }
}

/// A handle to the sandboxed child process.
pub struct Process {
    /// Pid of the child process, which doubles as its process group id (the
    /// child calls `setpgid(0, 0)` before `exec`).
    pid: Pid,

    /// Daemon related context.
    context: Arc<Box<ProcessDaemonContext>>,

    /// Join handle of the daemon thread. `None` if the `Process` instance has
    /// been waited for.
    daemon: Option<DaemonThreadJoinHandle>
}

impl Process {
    /// Create a new `Process` instance attaching to the specific process.
    fn attach(pid: Pid, limits: Option<ProcessResourceLimits>) -> Process {
        let mut handle = Process {
            pid,
            context: Arc::new(Box::new(ProcessDaemonContext::new(pid, limits))),
            daemon: None
        };

        let daemon_handle = daemon::start(handle.context.clone());
        handle.daemon = Some(daemon_handle);

        handle
    }

    /// Get the exit status of the process.
    pub fn exit_status(&self) -> ProcessExitStatus {
        self.context.exit_status()
    }

    /// Get the resource usage statistics of the process.
    pub fn rusage(&self) -> ProcessResourceUsage {
        self.context.rusage()
            .unwrap_or_else(|| ProcessResourceUsage::empty())
    }

    /// Wait for the child process to exit. Panics if this function has been
    /// called already on the same `Process` instance.
    pub fn wait_for_exit(&mut self) -> Result<()> {
        self.daemon.take().unwrap().join()
            .map_err(|_| Error::from(ErrorKind::DaemonJoinFailed))
    }

    /// Signal the whole process group with `SIGKILL`. Safe to call more than
    /// once and safe to call after the process has already exited (`ESRCH`
    /// is swallowed).
    fn kill_group(&self) -> Result<()> {
        let ret = unsafe { libc::killpg(self.pid, libc::SIGKILL) };
        if ret == 0 {
            Ok(())
        } else {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ESRCH) => Ok(()),
                _ => Err(Error::from(err))
            }
        }
    }
}

/// A live, not-yet-awaited sandbox run, as returned by `async_run`. Mirrors
/// the two-phase `async_run`/`await_result` contract: the caller may poll
/// other work, or call `kill` to force early termination, before collecting
/// the final `SandboxResult` via `await_result`.
pub struct Handle {
    process: Process,
    started_at: Instant
}

impl Handle {
    /// Signal the entire process group started by `async_run`. Idempotent.
    pub fn kill(&self) -> Result<()> {
        self.process.kill_group()
    }

    /// Block until the child terminates (naturally or via `kill`), then
    /// collect its outcome and resource usage. Consumes the handle: a
    /// `SandboxResult` can only be obtained once.
    pub fn await_result(mut self) -> Result<SandboxResult> {
        self.process.wait_for_exit()?;

        let wall_runtime = self.started_at.elapsed();
        let rusage = self.process.rusage();
        let status = self.process.exit_status();

        Ok(status.into_sandbox_result(wall_runtime, rusage))
    }
}

/// Spawn `builder`'s process and return immediately with a `Handle`. This is
/// the sandbox's primary entry point; `ProcessBuilder::start`/`Process`
/// remain available for callers that want direct access to the lower-level
/// polling API (`exit_status`/`rusage`/`wait_for_exit`).
pub fn async_run(builder: ProcessBuilder) -> Result<Handle> {
    let started_at = Instant::now();
    let process = builder.start()?;
    Ok(Handle { process, started_at })
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ExitCode, MemorySize, ProcessExitStatus, ProcessResourceLimits,
        ProcessResourceUsage};

    #[test]
    fn test_memory_size_to_bytes() {
        assert_eq!(2, MemorySize::Bytes(2).bytes());
        assert_eq!(2 * 1024, MemorySize::KiloBytes(2).bytes());
        assert_eq!(2 * 1024 * 1024, MemorySize::MegaBytes(2).bytes());
        assert_eq!(2 * 1024 * 1024 * 1024, MemorySize::GigaBytes(2).bytes());
        assert_eq!(2 * 1024 * 1024 * 1024,
            MemorySize::TeraBytes(2).bytes());
    }

    #[test]
    fn default_real_time_limit_is_one_and_a_half_cpu_plus_half_second() {
        let limits = ProcessResourceLimits {
            cpu_time_limit: Some(Duration::from_secs(2)),
            ..ProcessResourceLimits::empty()
        }.with_default_real_time_limit();

        assert_eq!(Some(Duration::from_millis(3500)), limits.real_time_limit);
    }

    #[test]
    fn explicit_real_time_limit_is_not_overridden() {
        let limits = ProcessResourceLimits {
            cpu_time_limit: Some(Duration::from_secs(2)),
            real_time_limit: Some(Duration::from_secs(10)),
            ..ProcessResourceLimits::empty()
        }.with_default_real_time_limit();

        assert_eq!(Some(Duration::from_secs(10)), limits.real_time_limit);
    }

    #[test]
    fn normal_exit_classifies_as_exited() {
        let status = ProcessExitStatus::Normal(0);
        let result = status.into_sandbox_result(Duration::from_millis(5),
            ProcessResourceUsage::empty());
        assert_eq!(ExitCode::Exited, result.exit_code);
        assert_eq!(0, result.status);
    }

    #[test]
    fn daemon_enforced_limits_classify_as_killed() {
        let result = ProcessExitStatus::CPUTimeLimitExceeded
            .into_sandbox_result(Duration::from_millis(5), ProcessResourceUsage::empty());
        assert_eq!(ExitCode::Killed, result.exit_code);
    }

    #[test]
    fn dumped_signal_is_distinguished_from_plain_kill() {
        let killed = ProcessExitStatus::KilledBySignal(nix::sys::signal::Signal::SIGABRT, false)
            .into_sandbox_result(Duration::from_millis(1), ProcessResourceUsage::empty());
        let dumped = ProcessExitStatus::KilledBySignal(nix::sys::signal::Signal::SIGABRT, true)
            .into_sandbox_result(Duration::from_millis(1), ProcessResourceUsage::empty());

        assert_eq!(ExitCode::Killed, killed.exit_code);
        assert_eq!(ExitCode::Dumped, dumped.exit_code);
    }
}
