//! External commands with a hard deadline.
//!
//! Diagnostic tools such as `ioreg` can stall on some machines; a probe
//! request must never wait on them longer than its budget.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub enum SubprocessResult {
    Success(Vec<u8>),
    /// Exited with a non-zero status.
    Failed(ExitStatus),
    /// Still running at the deadline; the child was killed.
    Timeout,
    SpawnError(String),
}

impl SubprocessResult {
    pub fn into_stdout(self, program: &str) -> Result<String, String> {
        match self {
            Self::Success(bytes) => Ok(decode_cmd_stdout(&bytes)),
            Self::Failed(status) => Err(format!("{program} exited with {status}")),
            Self::Timeout => Err(format!("{program} timed out")),
            Self::SpawnError(err) => Err(format!("{program}: {err}")),
        }
    }
}

pub fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> SubprocessResult {
    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => return SubprocessResult::SpawnError(err.to_string()),
    };

    // Drain stdout on a side thread so a chatty tool cannot block on a full pipe.
    let (tx, rx) = mpsc::channel();
    if let Some(mut stdout) = child.stdout.take() {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    } else {
        let _ = tx.send(Vec::new());
    }

    let deadline = Instant::now() + timeout;
    let status = match wait_until(&mut child, deadline) {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return SubprocessResult::Timeout;
        }
    };

    if !status.success() {
        return SubprocessResult::Failed(status);
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining.max(POLL_INTERVAL)) {
        Ok(bytes) => SubprocessResult::Success(bytes),
        Err(_) => SubprocessResult::Timeout,
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> Option<ExitStatus> {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(_) => return None,
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Decodes tool output that may be UTF-8 or UTF-16LE, replacing anything
/// undecodable.
pub fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_handles_utf16_and_garbage() {
        assert_eq!(decode_cmd_stdout(b"plain"), "plain");
        let utf16: Vec<u8> = "Hé".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_cmd_stdout(&utf16), "Hé");
        assert_eq!(decode_cmd_stdout(&[0x66, 0xff, 0x6f]), "f\u{fffd}o");
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let result = run_with_timeout(
            "performstat_no_such_tool_12345",
            &[],
            Duration::from_millis(200),
        );
        assert!(matches!(result, SubprocessResult::SpawnError(_)));
        assert!(result
            .into_stdout("performstat_no_such_tool_12345")
            .unwrap_err()
            .starts_with("performstat_no_such_tool_12345: "));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout() {
        let result = run_with_timeout("echo", &["hello"], Duration::from_secs(2));
        assert_eq!(result.into_stdout("echo").unwrap().trim(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_failure() {
        let result = run_with_timeout("false", &[], Duration::from_secs(2));
        assert!(matches!(result, SubprocessResult::Failed(_)));
    }

    #[cfg(unix)]
    #[test]
    fn slow_command_is_killed_at_deadline() {
        let start = Instant::now();
        let result = run_with_timeout("sleep", &["10"], Duration::from_millis(100));
        assert!(matches!(result, SubprocessResult::Timeout));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
