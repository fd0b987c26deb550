//! Process host module: lets a guest run allowed host commands.
//!
//! A guest builds up a command piece by piece (program name, arguments,
//! environment, stdin, timeout), runs it, then reads back the exit code and
//! captured output. Every command is checked against the session's
//! [`CommandPolicy`](wasm_bridge_common::CommandPolicy) before it is spawned.
//!
//! The pending command is cleared after every run, whether or not it was
//! allowed to execute.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use wasm_bridge_common::HostFunctionError;
use wasm_bridge_core::ProcessState;

/// Exit code reported when a command was denied, could not be spawned or
/// timed out.
pub const FAILED_EXIT_CODE: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Set the program of the pending command.
pub fn set_program(state: &mut ProcessState, program: String) {
    state.program = program;
}

/// Append an argument to the pending command.
pub fn add_arg(state: &mut ProcessState, arg: String) {
    state.args.push(arg);
}

/// Add an environment variable to the pending command.
pub fn add_env(state: &mut ProcessState, key: String, value: String) {
    state.envs.push((key, value));
}

/// Append bytes to the standard input of the pending command.
pub fn add_stdin(state: &mut ProcessState, bytes: &[u8]) {
    state.stdin.extend_from_slice(bytes);
}

/// Set the timeout of the pending command in milliseconds. Zero disables it.
pub fn set_timeout(state: &mut ProcessState, millis: u32) {
    state.timeout = (millis > 0).then(|| Duration::from_millis(u64::from(millis)));
}

/// Run the pending command and record its output.
///
/// Returns the command's exit code, or [`FAILED_EXIT_CODE`] if the command
/// was denied, could not be spawned or timed out. In those cases the reason
/// is written to the captured stderr.
#[instrument(skip(state), fields(program = %state.program))]
pub fn run(state: &mut ProcessState) -> i32 {
    let result = if state.policy.is_allowed(&state.program) {
        execute(state)
    } else {
        Err(HostFunctionError::PermissionDenied {
            command: state.program.clone(),
        })
    };

    match result {
        Ok(output) => {
            debug!(exit_code = output.exit_code, "Command finished");
            state.exit_code = output.exit_code;
            state.stdout = output.stdout;
            state.stderr = output.stderr;
        }
        Err(e) => {
            warn!(error = %e, "Command not run");
            state.exit_code = FAILED_EXIT_CODE;
            state.stdout.clear();
            state.stderr = format!("{e}\n").into_bytes();
        }
    }

    state.reset_command();
    state.exit_code
}

struct CommandOutput {
    exit_code: i32,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

fn execute(state: &ProcessState) -> Result<CommandOutput, HostFunctionError> {
    let failed = |reason: String| HostFunctionError::CommandFailed {
        command: state.program.clone(),
        reason,
    };

    let mut child = Command::new(&state.program)
        .args(&state.args)
        .envs(state.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| failed(e.to_string()))?;

    let stdin_writer = child.stdin.take().map(|mut pipe| {
        let input = state.stdin.clone();
        thread::spawn(move || {
            // A child that exits without reading its input closes the pipe.
            let _ = pipe.write_all(&input);
        })
    });
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let status = wait_with_timeout(&mut child, state.timeout).map_err(|e| failed(e.to_string()))?;

    if let Some(handle) = stdin_writer {
        let _ = handle.join();
    }
    let stdout = join_reader(stdout_reader);
    let stderr = join_reader(stderr_reader);

    let Some(status) = status else {
        return Err(failed(format!(
            "timed out after {} ms",
            state.timeout.unwrap_or_default().as_millis()
        )));
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(FAILED_EXIT_CODE),
        stdout,
        stderr,
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Wait for `child`, killing it once `timeout` elapses.
///
/// Returns `None` if the child was killed.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
) -> std::io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}
