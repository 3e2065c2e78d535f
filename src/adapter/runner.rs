use crate::adapter::{io_error, AdapterError, AdapterKind, InvocationLog, InvocationSpec, RunOptions};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Time a pipe gets to close after the cli exits, even when the deadline is spent.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub log: InvocationLog,
}

/// Spawns one provider process and waits for it, its pipes included, until
/// the timeout. On timeout the whole process group is killed.
pub fn run_process(
    provider: AdapterKind,
    spec: &InvocationSpec,
    options: &RunOptions,
) -> Result<ProcessOutput, AdapterError> {
    let error_path = options
        .working_directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let mut log = InvocationLog {
        provider,
        command_form: spec.command_form(),
        working_directory: options.working_directory.clone(),
        exit_code: None,
        timed_out: false,
    };

    debug!(provider = %provider, binary = %spec.binary, "spawning provider cli");
    let mut child = match provider_command(spec, options).spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(AdapterError::MissingBinary {
                provider,
                binary: spec.binary.clone(),
                log: Some(Box::new(log)),
            });
        }
        Err(err) => return Err(io_error(&error_path, err)),
    };
    let deadline = Instant::now() + options.timeout;
    let (stdout, stderr) = match drain_pipes(provider, &mut child) {
        Some(pipes) => pipes,
        None => {
            terminate(&mut child);
            let missing = std::io::Error::other("provider cli pipes were not captured");
            return Err(io_error(&error_path, missing));
        }
    };

    let status = match wait_until(&mut child, deadline) {
        Ok(Some(status)) => status,
        Ok(None) => return Err(timed_out(provider, &mut child, options, log)),
        Err(err) => {
            terminate(&mut child);
            return Err(io_error(&error_path, err));
        }
    };
    log.exit_code = status.code();

    // A descendant that inherited the pipes can keep them open past the exit.
    let Some(stdout) = collect(&stdout, deadline) else {
        return Err(timed_out(provider, &mut child, options, log));
    };
    if !status.success() {
        let stderr = collect(&stderr, deadline).unwrap_or_default();
        return Err(AdapterError::NonZeroExit {
            provider,
            exit_code: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
            log: Some(Box::new(log)),
        });
    }

    Ok(ProcessOutput { stdout, log })
}

fn provider_command(spec: &InvocationSpec, options: &RunOptions) -> Command {
    let mut command = Command::new(&spec.binary);
    command
        .args(&spec.args)
        .envs(&spec.env_overrides)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &options.working_directory {
        command.current_dir(cwd);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command
}

type PipeReceivers = (Receiver<String>, Receiver<String>);

fn drain_pipes(provider: AdapterKind, child: &mut Child) -> Option<PipeReceivers> {
    let stdout: ChildStdout = child.stdout.take()?;
    let stderr: ChildStderr = child.stderr.take()?;
    Some((
        drain(stdout, provider, "stdout"),
        drain(stderr, provider, "stderr"),
    ))
}

/// Reads a pipe to its end on a detached thread. Bytes that are not UTF-8
/// are replaced rather than dropping the whole stream.
fn drain<R>(mut pipe: R, provider: AdapterKind, stream: &'static str) -> Receiver<String>
where
    R: Read + Send + 'static,
{
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut bytes) {
            debug!(provider = %provider, stream, error = %err, "provider pipe read ended early");
        }
        // The receiver is gone once the call has timed out.
        let _ = sender.send(String::from_utf8_lossy(&bytes).into_owned());
    });
    receiver
}

fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn collect(receiver: &Receiver<String>, deadline: Instant) -> Option<String> {
    let budget = deadline
        .saturating_duration_since(Instant::now())
        .max(DRAIN_GRACE);
    match receiver.recv_timeout(budget) {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

fn timed_out(
    provider: AdapterKind,
    child: &mut Child,
    options: &RunOptions,
    mut log: InvocationLog,
) -> AdapterError {
    let timeout_ms = u64::try_from(options.timeout.as_millis()).unwrap_or(u64::MAX);
    let status = terminate(child);
    log.timed_out = true;
    log.exit_code = log.exit_code.or(status.and_then(|s| s.code()));
    warn!(provider = %provider, timeout_ms, "provider cli timed out");
    AdapterError::Timeout {
        provider,
        timeout_ms,
        log: Some(Box::new(log)),
    }
}

fn terminate(child: &mut Child) -> Option<ExitStatus> {
    kill_process_group(child);
    let _ = child.kill();
    child.wait().ok()
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    // The child leads its own group, so the group id is its pid.
    if let Ok(group) = libc::pid_t::try_from(child.id()) {
        unsafe {
            libc::killpg(group, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}
