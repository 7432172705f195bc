/// External compiler invocation for binary packaging

use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::collector;
use crate::error::{PackError, Result};

/// A fully built compiler command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Directory the compiler writes class files into
    pub output_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl CompilerCommand {
    /// Build `<compiler> -d <output_dir> [-cp <classpath>] <sources...>`.
    ///
    /// The classpath joins `dependency_jars` with the platform path list
    /// separator and is omitted when there are no dependencies.
    pub fn new(
        compiler: &Path,
        dependency_jars: &[PathBuf],
        output_dir: &Path,
        sources: &[PathBuf],
    ) -> Result<Self> {
        let mut args: Vec<OsString> = vec!["-d".into(), output_dir.as_os_str().to_owned()];
        if !dependency_jars.is_empty() {
            args.push("-cp".into());
            args.push(std::env::join_paths(dependency_jars)?);
        }
        args.extend(sources.iter().map(|source| source.as_os_str().to_owned()));

        Ok(Self {
            program: compiler.to_path_buf(),
            args,
            output_dir: output_dir.to_path_buf(),
            timeout: None,
        })
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What a finished compiler process reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout followed by stderr
    pub output: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn exited(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            output: output.into(),
            timed_out: false,
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Runs a compiler command to completion.
///
/// The system implementation spawns a child process; tests substitute a
/// double that writes class files directly.
pub trait CompilerProcess {
    fn invoke(&self, command: &CompilerCommand) -> io::Result<ProcessOutput>;
}

impl<T: CompilerProcess + ?Sized> CompilerProcess for &T {
    fn invoke(&self, command: &CompilerCommand) -> io::Result<ProcessOutput> {
        (**self).invoke(command)
    }
}

/// Spawns the compiler as a child process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcess;

impl CompilerProcess for SystemProcess {
    fn invoke(&self, command: &CompilerCommand) -> io::Result<ProcessOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so a timeout takes down everything the compiler started
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;

        // Drain both pipes while waiting so a chatty compiler cannot block on a full pipe
        let stdout = PipeReader::spawn(child.stdout.take());
        let stderr = PipeReader::spawn(child.stderr.take());

        let status = match command.timeout {
            Some(timeout) => child.wait_timeout(timeout),
            None => child.wait().map(Some),
        };
        let status = match status {
            Ok(Some(status)) => Some(status),
            Ok(None) => {
                kill_process_tree(&mut child);
                None
            }
            Err(e) => {
                kill_process_tree(&mut child);
                return Err(e);
            }
        };

        let deadline = Instant::now() + PIPE_GRACE;
        let mut output = stdout.finish(deadline);
        output.push_str(&stderr.finish(deadline));

        Ok(ProcessOutput {
            exit_code: status.and_then(|s| s.code()),
            output,
            timed_out: status.is_none(),
        })
    }
}

/// How long to keep reading after the compiler exits.
///
/// A descendant that left the process group can hold the pipes open
/// indefinitely; its output past this point is dropped.
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// Kill the child and every process in its group, then reap the child
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child is not reaped yet, so its pid still names the group
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Collects one output pipe on a background thread
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = pipe.map(|mut pipe| {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => match buf.lock() {
                            Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                            Err(_) => break,
                        },
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            })
        });
        Self { buf, handle }
    }

    /// Everything read so far, waiting until `deadline` for the pipe to close
    fn finish(self, deadline: Instant) -> String {
        if let Some(handle) = self.handle {
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!("compiler output pipe still open, leaving its reader behind");
            }
        }

        let bytes = match self.buf.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Extension trait to add `wait_timeout` to `Child`.
trait ChildExt {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>>;
}

impl ChildExt for Child {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);

        loop {
            match self.try_wait()? {
                Some(status) => return Ok(Some(status)),
                None => {
                    if start.elapsed() >= timeout {
                        return Ok(None);
                    }
                    thread::sleep(poll_interval);
                }
            }
        }
    }
}

/// Lifecycle of a single compiler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Idle,
    Launching,
    Running,
    Succeeded,
    Failed,
}

/// Outcome of a compiler run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    /// Every file found in the output directory after a successful run
    pub produced_class_files: Vec<PathBuf>,
    pub compiler_output: String,
    pub timed_out: bool,
}

impl CompilationResult {
    /// Convert a failed run into the matching error
    pub fn into_error(self, timeout: Option<Duration>) -> PackError {
        match timeout {
            Some(timeout) if self.timed_out => PackError::CompilerTimedOut {
                timeout,
                output: self.compiler_output,
            },
            _ => PackError::CompilationFailed {
                exit_code: self.exit_code,
                output: self.compiler_output,
            },
        }
    }
}

/// Check that `path` names an existing, executable regular file
pub fn check_compiler(path: &Path) -> Result<()> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PackError::invalid_compiler(path, "file does not exist"));
        }
        Err(e) => return Err(PackError::invalid_compiler(path, e.to_string())),
    };

    if metadata.is_dir() {
        return Err(PackError::invalid_compiler(path, "path is a directory"));
    }
    if !metadata.is_file() {
        return Err(PackError::invalid_compiler(path, "not a regular file"));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(PackError::invalid_compiler(path, "file is not executable"));
        }
    }

    Ok(())
}

/// Drives one compiler invocation through its lifecycle
pub struct CompilerInvoker<P> {
    process: P,
    state: InvocationState,
}

impl<P: CompilerProcess> CompilerInvoker<P> {
    pub fn new(process: P) -> Self {
        Self {
            process,
            state: InvocationState::Idle,
        }
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    fn transition(&mut self, next: InvocationState) {
        debug!(from = ?self.state, to = ?next, "compiler state");
        self.state = next;
    }

    /// Run the compiler once.
    ///
    /// A non-zero exit is reported as an unsuccessful [`CompilationResult`],
    /// not as an error. Errors are reserved for an unusable compiler binary
    /// and for failures reading the output directory.
    pub fn invoke(&mut self, command: &CompilerCommand) -> Result<CompilationResult> {
        self.transition(InvocationState::Launching);
        if let Err(e) = check_compiler(&command.program) {
            self.transition(InvocationState::Failed);
            return Err(e);
        }

        info!(
            compiler = %command.program.display(),
            output_dir = %command.output_dir.display(),
            "launching compiler"
        );
        self.transition(InvocationState::Running);

        let output = match self.process.invoke(command) {
            Ok(output) => output,
            Err(e) => {
                self.transition(InvocationState::Failed);
                return Err(match e.kind() {
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                        PackError::invalid_compiler(&command.program, e.to_string())
                    }
                    _ => PackError::Io(e),
                });
            }
        };

        for line in output.output.lines() {
            debug!(target: "plugin_packer::compiler::output", "{}", line);
        }

        if !output.success() {
            self.transition(InvocationState::Failed);
            info!(exit_code = ?output.exit_code, timed_out = output.timed_out, "compiler failed");
            return Ok(CompilationResult {
                succeeded: false,
                exit_code: output.exit_code,
                produced_class_files: Vec::new(),
                compiler_output: output.output,
                timed_out: output.timed_out,
            });
        }

        let produced_class_files = collector::collect_files(&command.output_dir)?;
        self.transition(InvocationState::Succeeded);
        info!(files = produced_class_files.len(), "compiler finished");

        Ok(CompilationResult {
            succeeded: true,
            exit_code: output.exit_code,
            produced_class_files,
            compiler_output: output.output,
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Records the command and writes the configured files
    struct FakeProcess {
        exit_code: i32,
        output: String,
        emits: Vec<&'static str>,
        seen: RefCell<Vec<CompilerCommand>>,
    }

    impl FakeProcess {
        fn new(exit_code: i32, output: &str, emits: Vec<&'static str>) -> Self {
            Self {
                exit_code,
                output: output.to_string(),
                emits,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl CompilerProcess for FakeProcess {
        fn invoke(&self, command: &CompilerCommand) -> io::Result<ProcessOutput> {
            self.seen.borrow_mut().push(command.clone());
            for file in &self.emits {
                let path = command.output_dir.join(file);
                fs::create_dir_all(path.parent().unwrap())?;
                fs::write(path, b"\xca\xfe\xba\xbe")?;
            }
            Ok(ProcessOutput::exited(self.exit_code, self.output.clone()))
        }
    }

    fn fake_compiler(dir: &Path) -> PathBuf {
        let path = dir.join("kotlinc");
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }

    #[test]
    fn test_command_line_layout() {
        let jars = vec![PathBuf::from("/deps/a.jar"), PathBuf::from("/deps/b.jar")];
        let sources = vec![PathBuf::from("/src/A.kt"), PathBuf::from("/src/B.kt")];
        let command =
            CompilerCommand::new(Path::new("/bin/kotlinc"), &jars, Path::new("/out"), &sources)
                .unwrap();

        let classpath = std::env::join_paths(&jars).unwrap();
        let expected: Vec<OsString> = vec![
            "-d".into(),
            "/out".into(),
            "-cp".into(),
            classpath,
            "/src/A.kt".into(),
            "/src/B.kt".into(),
        ];
        assert_eq!(command.program, PathBuf::from("/bin/kotlinc"));
        assert_eq!(command.args, expected);
        assert_eq!(command.timeout, None);
    }

    #[test]
    fn test_command_without_dependencies_omits_classpath() {
        let sources = vec![PathBuf::from("/src/A.kt")];
        let command =
            CompilerCommand::new(Path::new("/bin/kotlinc"), &[], Path::new("/out"), &sources)
                .unwrap();
        assert!(!command.args.iter().any(|arg| arg == "-cp"));
    }

    #[test]
    fn test_check_compiler_rejects_missing_and_directories() {
        let dir = TempDir::new().unwrap();

        let err = check_compiler(&dir.path().join("kotlinc")).unwrap_err();
        assert!(matches!(err, PackError::InvalidCompiler { .. }));

        let err = check_compiler(dir.path()).unwrap_err();
        assert!(err.to_string().contains("directory"));

        assert!(check_compiler(&fake_compiler(dir.path())).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_check_compiler_rejects_non_executable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kotlinc");
        fs::write(&path, "").unwrap();

        let err = check_compiler(&path).unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[test]
    fn test_invoke_success_lists_output_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("classes");
        fs::create_dir_all(&out).unwrap();
        let command = CompilerCommand::new(&fake_compiler(dir.path()), &[], &out, &[]).unwrap();

        let process = FakeProcess::new(0, "", vec!["demo/A.class", "demo/sub/B.class"]);
        let mut invoker = CompilerInvoker::new(&process);
        assert_eq!(invoker.state(), InvocationState::Idle);

        let result = invoker.invoke(&command).unwrap();
        assert!(result.succeeded);
        assert_eq!(
            result.produced_class_files,
            vec![out.join("demo/A.class"), out.join("demo/sub/B.class")]
        );
        assert_eq!(invoker.state(), InvocationState::Succeeded);
        assert_eq!(process.seen.borrow().len(), 1);
    }

    #[test]
    fn test_invoke_failure_is_a_result_not_an_error() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("classes");
        fs::create_dir_all(&out).unwrap();
        let command = CompilerCommand::new(&fake_compiler(dir.path()), &[], &out, &[]).unwrap();

        let process = FakeProcess::new(1, "A.kt:3:5: syntax error", vec![]);
        let mut invoker = CompilerInvoker::new(&process);
        let result = invoker.invoke(&command).unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.exit_code, Some(1));
        assert!(result.produced_class_files.is_empty());
        assert_eq!(invoker.state(), InvocationState::Failed);

        let err = result.into_error(None);
        assert!(matches!(err, PackError::CompilationFailed { exit_code: Some(1), .. }));
        assert!(err.compiler_output().unwrap().contains("syntax error"));
    }

    #[test]
    fn test_invoke_never_runs_an_invalid_compiler() {
        let dir = TempDir::new().unwrap();
        let command =
            CompilerCommand::new(&dir.path().join("missing"), &[], dir.path(), &[]).unwrap();

        let process = FakeProcess::new(0, "", vec![]);
        let mut invoker = CompilerInvoker::new(&process);
        let err = invoker.invoke(&command).unwrap_err();

        assert!(matches!(err, PackError::InvalidCompiler { .. }));
        assert!(process.seen.borrow().is_empty());
        assert_eq!(invoker.state(), InvocationState::Failed);
    }

    #[test]
    fn test_timed_out_result_maps_to_timeout_error() {
        let result = CompilationResult {
            succeeded: false,
            exit_code: None,
            produced_class_files: Vec::new(),
            compiler_output: "partial".to_string(),
            timed_out: true,
        };
        let err = result.into_error(Some(Duration::from_secs(5)));
        assert!(matches!(err, PackError::CompilerTimedOut { .. }));
        assert_eq!(err.compiler_output(), Some("partial"));
    }

    /// Run a shell snippet in place of a compiler
    #[cfg(unix)]
    fn shell_command(dir: &Path, script: &str, timeout: Option<Duration>) -> CompilerCommand {
        CompilerCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), script.into()],
            output_dir: dir.to_path_buf(),
            timeout,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_system_process_captures_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let command = shell_command(
            dir.path(),
            "echo compiling; echo 'syntax error' >&2; exit 3",
            None,
        );
        let output = SystemProcess.invoke(&command).unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
        assert_eq!(output.output, "compiling\nsyntax error\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_process_kills_on_timeout() {
        let dir = TempDir::new().unwrap();
        let command = shell_command(dir.path(), "exec sleep 30", Some(Duration::from_millis(200)));
        let started = Instant::now();
        let output = SystemProcess.invoke(&command).unwrap();

        assert!(output.timed_out);
        assert!(!output.success());
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_process_timeout_kills_grandchildren() {
        let dir = TempDir::new().unwrap();
        // `sleep` runs as a child of the shell and inherits its pipes
        let command = shell_command(
            dir.path(),
            "echo started; sleep 6; echo done",
            Some(Duration::from_millis(200)),
        );
        let started = Instant::now();
        let output = SystemProcess.invoke(&command).unwrap();

        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(output.output, "started\n");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_process_does_not_wait_on_detached_writers() {
        let dir = TempDir::new().unwrap();
        // The background sleep leaves the group and keeps stdout open
        let command = shell_command(dir.path(), "echo compiling; setsid sleep 6 & exit 0", None);
        let started = Instant::now();
        let output = SystemProcess.invoke(&command).unwrap();

        assert_eq!(output.exit_code, Some(0));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(output.output.starts_with("compiling\n"));
    }
}
