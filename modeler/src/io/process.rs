//! Child processes with a deadline and bounded output capture.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Human-readable log of both streams, bounded to `limit` bytes.
    pub fn render_log(&self, label: &str, limit: usize) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&self.stdout_lossy());
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&self.stderr_lossy());
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        truncate_text(&buf, limit)
    }
}

/// Which end of an over-long stream stays in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    /// The first `output_limit_bytes`.
    Head,
    /// The last `output_limit_bytes`; what a script prints last survives.
    Tail,
}

/// Limits and optional plumbing for one child invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunLimits<'a> {
    pub timeout: Duration,
    /// Bytes of stdout and of stderr kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
    pub keep: Keep,
    /// When set, every stdout line is appended and flushed here as it arrives.
    pub stream_path: Option<&'a Path>,
}

/// Run `cmd`, feeding `stdin` if given, and kill it once `limits.timeout` passes.
///
/// Both pipes are drained on reader threads, started before stdin is written,
/// so a chatty child cannot deadlock on a full pipe.
#[instrument(
    skip_all,
    fields(timeout_secs = limits.timeout.as_secs(), streaming = limits.stream_path.is_some())
)]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: RunLimits<'_>,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let tee = match limits.stream_path {
        Some(path) => Some(open_stream_file(path)?),
        None => None,
    };

    debug!(program = ?cmd.get_program(), "spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, program = ?cmd.get_program(), "failed to spawn command");
            return Err(err).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (keep, limit) = (limits.keep, limits.output_limit_bytes);
    let stdout_handle =
        thread::spawn(move || read_lines_limited(stdout, Capture::new(keep, limit), tee));
    let stderr_handle = thread::spawn(move || read_limited(stderr, Capture::new(keep, limit)));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping the handle closes the pipe so the child sees EOF.
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed: started.elapsed(),
    })
}

/// Truncate `text` to at most `limit` bytes on a char boundary, noting the cut.
pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated {} bytes]\n", &text[..cut], text.len() - cut)
}

fn open_stream_file(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("create stream file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

type ReaderHandle = thread::JoinHandle<Result<(Vec<u8>, usize)>>;

fn join_reader(handle: ReaderHandle) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Bounded in-memory copy of one stream; bytes outside the window are counted.
struct Capture {
    keep: Keep,
    limit: usize,
    buf: VecDeque<u8>,
    dropped: usize,
}

impl Capture {
    fn new(keep: Keep, limit: usize) -> Self {
        Self {
            keep,
            limit,
            buf: VecDeque::new(),
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        match self.keep {
            Keep::Head => {
                let room = self.limit.saturating_sub(self.buf.len());
                let take = chunk.len().min(room);
                self.buf.extend(&chunk[..take]);
                self.dropped += chunk.len() - take;
            }
            Keep::Tail => {
                self.buf.extend(chunk);
                let excess = self.buf.len().saturating_sub(self.limit);
                if excess > 0 {
                    self.buf.drain(..excess);
                    self.dropped += excess;
                }
            }
        }
    }

    fn finish(self) -> (Vec<u8>, usize) {
        (Vec::from(self.buf), self.dropped)
    }
}

fn read_lines_limited<R: Read>(
    reader: R,
    mut capture: Capture,
    mut tee: Option<BufWriter<File>>,
) -> Result<(Vec<u8>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }
        if let Some(writer) = tee.as_mut() {
            if let Err(err) = writer.write_all(&line) {
                warn!(err = %err, "failed to write to stream file");
            } else if let Err(err) = writer.flush() {
                warn!(err = %err, "failed to flush stream file");
            }
        }
        capture.push(&line);
    }

    Ok(capture.finish())
}

fn read_limited<R: Read>(mut reader: R, mut capture: Capture) -> Result<(Vec<u8>, usize)> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        capture.push(&chunk[..n]);
    }
    Ok(capture.finish())
}
