//! One ZipponDB process lifetime, driven over its standard streams.
//!
//! Requests are single lines (`run "<command>"\n`). The process answers each
//! with arbitrary text terminated by a single ETX byte. A background thread
//! forwards raw stdout chunks over an `mpsc` channel; the session buffers
//! them and splits frames at the ETX. That lets [`ProcessSession::run`] bound
//! its wait with an optional timeout, and throw away anything the process
//! wrote between requests (including bytes after an ETX) before sending the
//! next one.
//!
//! A session is always reaped: [`ProcessSession::close`] does it explicitly,
//! and `Drop` does it for sessions that were never closed (early `?` returns,
//! panics unwinding through the driver).

use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// End-of-response sentinel.
pub const ETX: u8 = 0x03;

pub const ZIPPON_BIN_ENV: &str = "ZIPPON_BIN";
pub const DEFAULT_PROGRAM: &str = "zig-out/bin/zippon";

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Upper bound on the wait for one response frame. `None` blocks forever.
    pub response_timeout_ms: Option<u64>,
    /// How long to let the process honor `quit` before killing it.
    pub shutdown_grace_ms: u64,
    pub send_quit: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        let program = std::env::var_os(ZIPPON_BIN_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROGRAM));
        Self {
            program,
            args: Vec::new(),
            response_timeout_ms: None,
            shutdown_grace_ms: 0,
            send_quit: true,
        }
    }
}

impl ChannelConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout_ms = Some(duration_ms(timeout));
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = duration_ms(grace);
        self
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// One response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Frame text with the ETX removed and surrounding whitespace trimmed.
    pub text: String,
    /// `false` when the output stream ended before an ETX arrived.
    pub complete: bool,
}

impl Response {
    fn from_bytes(bytes: &[u8], complete: bool) -> Self {
        Self {
            text: String::from_utf8_lossy(bytes).trim().to_string(),
            complete,
        }
    }
}

/// Split the first ETX-terminated frame off the front of `pending`.
fn take_frame(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = pending.iter().position(|&b| b == ETX)?;
    let mut frame: Vec<u8> = pending.drain(..=end).collect();
    frame.pop();
    Some(frame)
}

pub struct ProcessSession {
    config: ChannelConfig,
    child: Child,
    stdin: Option<ChildStdin>,
    chunks: Receiver<Vec<u8>>,
    /// Stdout bytes received but not yet consumed by a response.
    pending: Vec<u8>,
    desynchronized: bool,
    status: Option<ExitStatus>,
}

impl ProcessSession {
    pub fn open(config: ChannelConfig) -> Result<Self, ChannelError> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ChannelError::Spawn {
                program: config.program.clone(),
                source,
            })?;
        let pid = child.id();

        // From here on the child exists; any early return must reap it.
        let pipes = (|| -> Result<_, ChannelError> {
            let stdin = child.stdin.take().ok_or(ChannelError::MissingPipe("stdin"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or(ChannelError::MissingPipe("stdout"))?;
            let stderr = child
                .stderr
                .take()
                .ok_or(ChannelError::MissingPipe("stderr"))?;

            let (tx, rx) = mpsc::channel();
            spawn_stdout_reader(pid, stdout, tx)?;
            spawn_stderr_drain(pid, stderr)?;
            Ok((stdin, rx))
        })();

        let (stdin, chunks) = match pipes {
            Ok(v) => v,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };

        tracing::debug!(pid, program = %config.program.display(), "spawned collaborator");
        Ok(Self {
            config,
            child,
            stdin: Some(stdin),
            chunks,
            pending: Vec::new(),
            desynchronized: false,
            status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Send one command and return the trimmed response text.
    ///
    /// If the process closes its output before answering, whatever it wrote
    /// so far is returned (possibly empty).
    pub fn run(&mut self, command: &str) -> Result<String, ChannelError> {
        self.run_frame(command).map(|response| response.text)
    }

    /// Like [`run`](Self::run), but reports whether the frame ended with ETX.
    pub fn run_frame(&mut self, command: &str) -> Result<Response, ChannelError> {
        if command.contains(['"', '\n', '\r']) {
            return Err(ChannelError::InvalidCommand(command.to_string()));
        }
        if self.desynchronized {
            return Err(ChannelError::Desynchronized);
        }
        self.discard_stale_output();

        let stdin = self
            .stdin
            .as_mut()
            .ok_or(ChannelError::MissingPipe("stdin"))?;
        let line = format!("run \"{command}\"\n");
        stdin
            .write_all(line.as_bytes())
            .and_then(|()| stdin.flush())
            .map_err(ChannelError::Write)?;

        let deadline = self
            .config
            .response_timeout()
            .map(|timeout| (timeout, Instant::now() + timeout));
        loop {
            if let Some(frame) = take_frame(&mut self.pending) {
                return Ok(Response::from_bytes(&frame, true));
            }

            let chunk = match deadline {
                Some((timeout, deadline)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match self.chunks.recv_timeout(remaining) {
                        Ok(chunk) => Some(chunk),
                        Err(RecvTimeoutError::Disconnected) => None,
                        Err(RecvTimeoutError::Timeout) => {
                            self.desynchronized = true;
                            return Err(ChannelError::Timeout(timeout));
                        }
                    }
                }
                None => self.chunks.recv().ok(),
            };

            match chunk {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                // End of stream: whatever arrived so far is the answer.
                None => {
                    let partial = std::mem::take(&mut self.pending);
                    return Ok(Response::from_bytes(&partial, false));
                }
            }
        }
    }

    /// Drop everything received since the last response, partial bytes included.
    fn discard_stale_output(&mut self) {
        while let Ok(chunk) = self.chunks.try_recv() {
            self.pending.extend_from_slice(&chunk);
        }
        if !self.pending.is_empty() {
            tracing::debug!(
                pid = self.child.id(),
                bytes = self.pending.len(),
                text = %String::from_utf8_lossy(&self.pending),
                "discarding output received between requests"
            );
            self.pending.clear();
        }
    }

    /// Request `quit`, then kill and reap the process.
    pub fn close(mut self) -> Result<ExitStatus, ChannelError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<ExitStatus, ChannelError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let pid = self.child.id();

        if let Some(mut stdin) = self.stdin.take() {
            if self.config.send_quit {
                if let Err(err) = stdin.write_all(b"quit\n").and_then(|()| stdin.flush()) {
                    tracing::debug!(pid, error = %err, "could not send quit");
                }
            }
        }

        let grace = self.config.shutdown_grace();
        if !grace.is_zero() {
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                match self.child.try_wait() {
                    Ok(Some(_)) | Err(_) => break,
                    Ok(None) => thread::sleep(SHUTDOWN_POLL),
                }
            }
        }

        // Fails only when the process is already gone, which is fine.
        if let Err(err) = self.child.kill() {
            tracing::debug!(pid, error = %err, "kill skipped");
        }
        let status = self
            .child
            .wait()
            .map_err(|source| ChannelError::Wait { pid, source })?;

        tracing::debug!(pid, %status, "collaborator reaped");
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Err(err) = self.shutdown() {
                tracing::warn!(pid = self.child.id(), error = %err, "failed to reap collaborator");
            }
        }
    }
}

/// Open a session, hand it to `f`, and close it whatever `f` returns.
///
/// The closure's error wins over a close error; a close error after a
/// successful closure is returned as-is.
pub fn with_session<T, E, F>(config: ChannelConfig, f: F) -> Result<(T, ExitStatus), E>
where
    F: FnOnce(&mut ProcessSession) -> Result<T, E>,
    E: From<ChannelError>,
{
    let mut session = ProcessSession::open(config)?;
    match f(&mut session) {
        Ok(value) => {
            let status = session.close()?;
            Ok((value, status))
        }
        Err(err) => {
            let pid = session.pid();
            if let Err(close_err) = session.close() {
                tracing::warn!(pid, error = %close_err, "close failed after session error");
            }
            Err(err)
        }
    }
}

// Readers are detached: they exit on end-of-stream, and a grandchild holding
// a pipe open must not be able to block shutdown.

fn spawn_stdout_reader(
    pid: u32,
    mut stdout: ChildStdout,
    tx: mpsc::Sender<Vec<u8>>,
) -> Result<(), ChannelError> {
    thread::Builder::new()
        .name(format!("zippon-stdout-{pid}"))
        .spawn(move || {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        tracing::debug!(pid, error = %err, "stdout read failed");
                        break;
                    }
                }
            }
        })
        .map(drop)
        .map_err(|source| ChannelError::Reader {
            stream: "stdout",
            source,
        })
}

fn spawn_stderr_drain(pid: u32, stderr: impl io::Read + Send + 'static) -> Result<(), ChannelError> {
    thread::Builder::new()
        .name(format!("zippon-stderr-{pid}"))
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        tracing::debug!(
                            target: "zippon_loadgen::stderr",
                            pid,
                            "{}",
                            text.trim_end()
                        );
                    }
                }
            }
        })
        .map(drop)
        .map_err(|source| ChannelError::Reader {
            stream: "stderr",
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_frames_are_trimmed() {
        let response = Response::from_bytes(b"\n  {id: 1}\n", true);
        assert_eq!(response.text, "{id: 1}");
        assert!(response.complete);
    }

    #[test]
    fn truncated_frames_keep_partial_text() {
        let response = Response::from_bytes(b"partial out", false);
        assert_eq!(response.text, "partial out");
        assert!(!response.complete);
    }

    #[test]
    fn frames_split_at_etx_and_leave_the_tail_pending() {
        let mut pending = b"first\x03trailing noise".to_vec();
        assert_eq!(take_frame(&mut pending), Some(b"first".to_vec()));
        assert_eq!(pending, b"trailing noise".to_vec());
        assert_eq!(take_frame(&mut pending), None);

        pending.extend_from_slice(b"\x03\x03");
        assert_eq!(take_frame(&mut pending), Some(b"trailing noise".to_vec()));
        assert_eq!(take_frame(&mut pending), Some(Vec::new()));
        assert!(pending.is_empty());
    }

    #[test]
    fn config_roundtrips_through_json_with_defaults() {
        let config: ChannelConfig =
            serde_json::from_str(r#"{"program": "/opt/zippon", "response_timeout_ms": 250}"#)
                .unwrap();
        assert_eq!(config.program, PathBuf::from("/opt/zippon"));
        assert!(config.args.is_empty());
        assert_eq!(config.response_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.shutdown_grace(), Duration::ZERO);
        assert!(config.send_quit);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = ProcessSession::open(ChannelConfig::new("/nonexistent/zippon-bin"))
            .err()
            .expect("spawn should fail");
        assert!(matches!(err, ChannelError::Spawn { .. }));
        assert!(err.to_string().contains("/nonexistent/zippon-bin"));
    }
}
