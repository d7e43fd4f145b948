//! Console host adapter.
//!
//! Runs the server as a child process and implements the `tgb-core` Host port
//! over its console: commands go to stdin, every stdout/stderr line lands in a
//! bounded log buffer, and join/leave lines drive the online-user list.

use async_trait::async_trait;

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use regex::Regex;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, Command},
    sync::broadcast,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use tgb_core::{
    capture::CommandSender,
    config::BridgeConfig,
    domain::OnlineUser,
    errors::Error,
    ports::Host,
    report::NOMINAL_TPS,
    state::{read_json_or_default, write_json_atomic},
    Result,
};

const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Regexes applied to every console line.
#[derive(Clone, Debug)]
pub struct ConsolePatterns {
    /// Must capture `name`.
    pub join: Regex,
    /// Must capture `name`.
    pub leave: Regex,
    /// Optional; must capture `tps`.
    pub tps: Option<Regex>,
}

impl ConsolePatterns {
    pub fn from_config(cfg: &BridgeConfig) -> Result<Self> {
        Ok(Self {
            join: compile_with_group(&cfg.join_pattern, "name")?,
            leave: compile_with_group(&cfg.leave_pattern, "name")?,
            tps: cfg
                .tps_pattern
                .as_deref()
                .map(|p| compile_with_group(p, "tps"))
                .transpose()?,
        })
    }
}

fn compile_with_group(pattern: &str, group: &str) -> Result<Regex> {
    let re = Regex::new(pattern)
        .map_err(|e| Error::Config(format!("invalid console pattern {pattern:?}: {e}")))?;
    if !re.capture_names().flatten().any(|n| n == group) {
        return Err(Error::Config(format!(
            "console pattern {pattern:?} has no `{group}` group"
        )));
    }
    Ok(re)
}

/// Everything derived from console output.
#[derive(Debug)]
struct ConsoleState {
    patterns: ConsolePatterns,
    log: VecDeque<String>,
    capacity: usize,
    /// name → had played before this session started
    online: BTreeMap<String, bool>,
    known: HashSet<String>,
    tps: Option<f64>,
}

impl ConsoleState {
    fn new(patterns: ConsolePatterns, capacity: usize, known: Vec<String>) -> Self {
        Self {
            patterns,
            log: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            online: BTreeMap::new(),
            known: known.into_iter().collect(),
            tps: None,
        }
    }

    /// Returns `true` when the line introduced a never-seen user.
    fn ingest(&mut self, line: &str) -> bool {
        if self.log.len() == self.capacity {
            self.log.pop_front();
        }
        self.log.push_back(line.to_string());

        let mut new_user = false;
        if let Some(name) = capture(&self.patterns.join, line, "name") {
            let played_before = self.known.contains(&name);
            if !played_before {
                self.known.insert(name.clone());
                new_user = true;
            }
            self.online.entry(name).or_insert(played_before);
        } else if let Some(name) = capture(&self.patterns.leave, line, "name") {
            self.online.remove(&name);
        }

        if let Some(re) = &self.patterns.tps {
            if let Some(tps) = capture(re, line, "tps").and_then(|v| v.parse::<f64>().ok()) {
                self.tps = Some(tps);
            }
        }

        new_user
    }

    fn drain_last(&mut self) -> Option<String> {
        self.log.pop_back()
    }

    fn online_users(&self) -> Vec<OnlineUser> {
        self.online
            .iter()
            .map(|(name, played_before)| OnlineUser {
                name: name.clone(),
                played_before: *played_before,
            })
            .collect()
    }

    fn known_sorted(&self) -> Vec<String> {
        let mut v: Vec<String> = self.known.iter().cloned().collect();
        v.sort();
        v
    }

    /// Server restarted: nobody is online any more.
    fn reset_sessions(&mut self) {
        self.online.clear();
    }
}

fn capture(re: &Regex, line: &str, group: &str) -> Option<String> {
    re.captures(line)
        .and_then(|c| c.name(group))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

struct Shared {
    state: Mutex<ConsoleState>,
    lines: broadcast::Sender<String>,
    known_users_file: PathBuf,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ingest(&self, line: String) {
        let known = {
            let mut st = self.state();
            if st.ingest(&line) {
                Some(st.known_sorted())
            } else {
                None
            }
        };
        if let Some(known) = known {
            if let Err(e) = write_json_atomic(&self.known_users_file, &known) {
                warn!(error = %e, "failed to persist known users");
            }
        }
        debug!(target: "tgb_console::server", "{line}");
        // No subscribers outside of a running dispatch.
        let _ = self.lines.send(line);
    }
}

pub struct ConsoleHost {
    shared: Arc<Shared>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Option<Child>>,
    settle: Duration,
    motd: String,
}

impl ConsoleHost {
    /// Start the server process described by `cfg.server_command`.
    pub fn spawn(cfg: &BridgeConfig) -> Result<Self> {
        let (program, args) = cfg
            .server_command
            .split_first()
            .ok_or_else(|| Error::Config("bridge.server-command is empty".to_string()))?;

        let patterns = ConsolePatterns::from_config(cfg)?;
        let known: Vec<String> = read_json_or_default(&cfg.known_users_file)?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cfg.server_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::External("server stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("server stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();

        let (lines, _) = broadcast::channel(LINE_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            state: Mutex::new(ConsoleState::new(patterns, cfg.log_buffer_lines, known)),
            lines,
            known_users_file: cfg.known_users_file.clone(),
        });

        info!(program = %program, pid = ?child.id(), "server process started");

        tokio::spawn(pump(BufReader::new(stdout), shared.clone(), true));
        if let Some(stderr) = stderr {
            tokio::spawn(pump(BufReader::new(stderr), shared.clone(), false));
        }

        Ok(Self {
            shared,
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(Some(child)),
            settle: cfg.command_settle,
            motd: cfg.motd.clone(),
        })
    }

    /// Kill the server process (if still running) and reap it.
    pub async fn shutdown(&self) -> Result<()> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_none() {
            child.kill().await?;
        }
        info!("server process stopped");
        Ok(())
    }
}

/// Feed console lines into the shared state until the stream closes.
async fn pump<R>(reader: R, shared: Arc<Shared>, is_stdout: bool)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => shared.ingest(line),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "failed to read server console");
                break;
            }
        }
    }
    if is_stdout {
        shared.state().reset_sessions();
        info!("server console closed");
    }
}

#[async_trait]
impl Host for ConsoleHost {
    /// Console output is not attributed to a sender, so everything printed
    /// within the settle window after the command is written counts as its output.
    async fn dispatch(&self, sender: &mut dyn CommandSender, command: &str) -> Result<()> {
        let mut rx = self.shared.lines.subscribe();
        {
            let mut stdin = self.stdin.lock().await;
            stdin.write_all(command.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }
        debug!(sender = sender.name(), command, "command written to server console");

        let deadline = Instant::now() + self.settle;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                line = rx.recv() => match line {
                    Ok(line) => sender.send_line(&line),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "console output outran capture");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        Ok(())
    }

    fn drain_last_log_line(&self) -> Option<String> {
        self.shared.state().drain_last()
    }

    fn online_users(&self) -> Vec<OnlineUser> {
        self.shared.state().online_users()
    }

    fn ticks_per_second(&self) -> f64 {
        self.shared
            .state()
            .tps
            .unwrap_or(f64::from(NOMINAL_TPS))
    }

    fn motd(&self) -> String {
        self.motd.clone()
    }
}
