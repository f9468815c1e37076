//! ffmpeg-backed HLS bridge
//!
//! One encoder process per broadcast. Chunks reach its stdin through a
//! bounded queue drained by a pump task, so a slow or dead encoder costs
//! dropped chunks and never a stalled dispatcher.
//!
//! ```text
//! Coordinator --push()--> mpsc<Bytes> --> session task --> ffmpeg stdin
//!                                                             |
//!                                                 output_dir/index.m3u8
//!                                                 output_dir/index*.ts
//! ```
//!
//! Sessions are chained: a new session task first kills the previous
//! encoder and waits for it to exit, then purges the directory and spawns.
//! Two encoders never share the output directory.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::config::LiveConfig;
use crate::constants::PLAYLIST_NAME;
use crate::error::LiveError;
use crate::live::LiveSink;

/// Everything needed to launch one encoder
#[derive(Debug, Clone)]
struct Launch {
    program: String,
    args: Vec<String>,
    output_dir: PathBuf,
    grace: Duration,
}

/// A session task that may still own a live encoder
struct Retiring {
    task: JoinHandle<()>,
    kill: Arc<Notify>,
}

/// The current broadcast's encoder
struct Session {
    input: mpsc::Sender<Bytes>,
    alive: Arc<AtomicBool>,
    pid: Arc<AtomicU32>,
    retire: Retiring,
}

pub struct HlsBridge {
    launch: Launch,
    queue_capacity: usize,
    running: Option<Session>,
    retiring: Option<Retiring>,
}

impl HlsBridge {
    pub fn new(config: &LiveConfig) -> Self {
        Self::with_command(
            config.ffmpeg_path.clone(),
            encoder_args(config),
            config.output_dir.clone(),
            config.queue_capacity,
            config.shutdown_grace(),
        )
    }

    /// Bridge around an arbitrary encoder command.
    ///
    /// The process runs with `output_dir` as its working directory and
    /// receives the raw chunk stream on stdin.
    pub fn with_command(
        program: impl Into<String>,
        args: Vec<String>,
        output_dir: impl Into<PathBuf>,
        queue_capacity: usize,
        grace: Duration,
    ) -> Self {
        Self {
            launch: Launch {
                program: program.into(),
                args,
                output_dir: output_dir.into(),
                grace,
            },
            queue_capacity: queue_capacity.max(1),
            running: None,
            retiring: None,
        }
    }

    /// OS pid of the current encoder once it has been spawned
    pub fn pid(&self) -> Option<u32> {
        self.running
            .as_ref()
            .map(|s| s.pid.load(Ordering::SeqCst))
            .filter(|&pid| pid != 0)
    }
}

impl LiveSink for HlsBridge {
    fn start(&mut self) {
        if self.is_running() {
            tracing::trace!("Encoder already running");
            return;
        }

        let previous = match self.running.take() {
            Some(dead) => Some(dead.retire),
            None => self.retiring.take(),
        };

        let (input, rx) = mpsc::channel(self.queue_capacity);
        let alive = Arc::new(AtomicBool::new(true));
        let pid = Arc::new(AtomicU32::new(0));
        let kill = Arc::new(Notify::new());

        let task = tokio::spawn(run_session(
            self.launch.clone(),
            previous,
            rx,
            kill.clone(),
            alive.clone(),
            pid.clone(),
        ));

        self.running = Some(Session {
            input,
            alive,
            pid,
            retire: Retiring { task, kill },
        });
    }

    fn push(&mut self, chunk: &Bytes) {
        let Some(session) = &self.running else {
            return;
        };
        match session.input.try_send(chunk.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(size = chunk.len(), "Encoder queue full, chunk dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Encoder gone, chunk dropped");
            }
        }
    }

    fn stop(&mut self) {
        // Dropping the sender closes the queue; the pump then closes stdin
        // and gives the encoder its grace period.
        if let Some(session) = self.running.take() {
            tracing::info!(pid = session.pid.load(Ordering::SeqCst), "Stopping live encoder");
            self.retiring = Some(session.retire);
        }
    }

    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|s| s.alive.load(Ordering::SeqCst))
    }
}

/// ffmpeg arguments for a rolling HLS window fed from stdin
pub fn encoder_args(config: &LiveConfig) -> Vec<String> {
    vec![
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        config.input_format.clone(),
        "-i".into(),
        "pipe:0".into(),
        "-acodec".into(),
        config.audio_codec.clone(),
        "-ar".into(),
        config.sample_rate.to_string(),
        "-b:a".into(),
        config.bitrate.clone(),
        "-ac".into(),
        "1".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        config.segment_seconds.to_string(),
        "-hls_list_size".into(),
        config.playlist_size.to_string(),
        "-hls_flags".into(),
        "delete_segments+append_list".into(),
        PLAYLIST_NAME.into(),
    ]
}

/// Remove every file in `dir`, creating the directory if needed.
/// Returns the number of files removed.
pub fn purge_dir(dir: &Path) -> Result<usize, LiveError> {
    let err = |source| LiveError::Purge {
        path: dir.display().to_string(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(err)?;

    let mut removed = 0;
    for entry in std::fs::read_dir(dir).map_err(err)? {
        let entry = entry.map_err(err)?;
        if entry.file_type().map_err(err)?.is_file() {
            std::fs::remove_file(entry.path()).map_err(err)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn spawn_encoder(launch: &Launch) -> Result<(Child, ChildStdin), LiveError> {
    let mut child = Command::new(&launch.program)
        .args(&launch.args)
        .current_dir(&launch.output_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| LiveError::Spawn {
            program: launch.program.clone(),
            source,
        })?;

    let stdin = child.stdin.take().ok_or(LiveError::PipeUnavailable)?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr(stderr));
    }
    Ok((child, stdin))
}

async fn run_session(
    launch: Launch,
    previous: Option<Retiring>,
    input: mpsc::Receiver<Bytes>,
    kill: Arc<Notify>,
    alive: Arc<AtomicBool>,
    pid: Arc<AtomicU32>,
) {
    if let Some(old) = previous {
        old.kill.notify_one();
        if let Err(e) = old.task.await {
            tracing::debug!(error = %e, "Previous encoder task failed");
        }
    }

    // Stale segments from an earlier session must never be served under this one
    match purge_dir(&launch.output_dir) {
        Ok(0) => {}
        Ok(removed) => {
            tracing::debug!(removed, dir = %launch.output_dir.display(), "Purged old segments")
        }
        Err(e) => tracing::warn!(error = %e, "Could not purge live directory"),
    }

    let (child, stdin) = match spawn_encoder(&launch) {
        Ok(spawned) => spawned,
        Err(e) => {
            alive.store(false, Ordering::SeqCst);
            tracing::warn!(error = %e, "Live stream unavailable for this broadcast");
            return;
        }
    };

    if let Some(id) = child.id() {
        pid.store(id, Ordering::SeqCst);
    }
    tracing::info!(pid = ?child.id(), program = %launch.program, "Live encoder started");

    pump(child, stdin, input, kill, launch.grace).await;
    alive.store(false, Ordering::SeqCst);
}

enum PumpExit {
    QueueClosed,
    Exited(std::io::Result<ExitStatus>),
    Killed,
}

async fn pump(
    mut child: Child,
    stdin: ChildStdin,
    mut input: mpsc::Receiver<Bytes>,
    kill: Arc<Notify>,
    grace: Duration,
) {
    let mut stdin = Some(stdin);

    let exit = loop {
        tokio::select! {
            chunk = input.recv() => match chunk {
                Some(chunk) => {
                    if let Some(pipe) = stdin.as_mut() {
                        if let Err(e) = pipe.write_all(&chunk).await {
                            tracing::debug!(error = %e, "Encoder stdin write failed");
                            stdin = None;
                        }
                    }
                }
                None => break PumpExit::QueueClosed,
            },
            status = child.wait() => break PumpExit::Exited(status),
            _ = kill.notified() => break PumpExit::Killed,
        }
    };

    match exit {
        PumpExit::Exited(Ok(status)) => {
            tracing::warn!(%status, "Live encoder exited during broadcast")
        }
        PumpExit::Exited(Err(e)) => tracing::warn!(error = %e, "Lost track of live encoder"),
        PumpExit::Killed => {
            tracing::debug!("Encoder replaced by a new session");
            kill_encoder(&mut child).await;
        }
        PumpExit::QueueClosed => {
            // EOF on stdin lets the encoder finalize the playlist
            drop(stdin);
            let finished = tokio::select! {
                res = tokio::time::timeout(grace, child.wait()) => Some(res),
                _ = kill.notified() => None,
            };
            match finished {
                Some(Ok(Ok(status))) => tracing::debug!(%status, "Live encoder finished"),
                Some(Ok(Err(e))) => tracing::warn!(error = %e, "Waiting for live encoder failed"),
                Some(Err(_)) => {
                    tracing::warn!("Live encoder ignored EOF, killing it");
                    kill_encoder(&mut child).await;
                }
                None => {
                    tracing::debug!("New session started, cutting encoder shutdown short");
                    kill_encoder(&mut child).await;
                }
            }
        }
    }
}

async fn kill_encoder(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Kill failed (already exited?)");
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(target: "ptt_relay::encoder", "{line}");
    }
}
