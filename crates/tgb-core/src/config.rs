use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{domain::ChatId, errors::Error, Result};

const DEFAULT_CONFIG_FILE: &str = "tgb.json";

/// Bot credentials and access list. Immutable once loaded.
#[derive(Clone, Debug, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub token: String,

    #[serde(rename = "allow-user", default)]
    pub users: Vec<String>,

    #[serde(default)]
    pub passwords: HashMap<String, String>,

    /// Chat receiving the daily report.
    #[serde(rename = "chat-id", default)]
    pub report_chat_id: Option<ChatId>,
}

impl BotConfig {
    /// Startup checks. Any failure disables the whole bridge.
    pub fn validate(&self) -> Result<()> {
        if self.users.is_empty() {
            return Err(Error::Config("allow-user is empty".to_string()));
        }
        if self.token.trim().is_empty() {
            return Err(Error::Config("bot token is empty".to_string()));
        }

        let missing: Vec<&str> = self
            .users
            .iter()
            .filter(|u| !self.passwords.contains_key(u.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "no password for user(s): {}",
                missing.join(", ")
            )));
        }

        if self.users.len() != self.passwords.len() {
            return Err(Error::Config(format!(
                "user count ({}) and password count ({}) do not match",
                self.users.len(),
                self.passwords.len()
            )));
        }

        Ok(())
    }

    /// Password of an authorized user. `None` for users not in `allow-user`.
    pub fn password_for(&self, username: &str) -> Option<&str> {
        if !self.users.iter().any(|u| u == username) {
            return None;
        }
        self.passwords.get(username).map(String::as_str)
    }
}

/// Runtime tuning for the control loop and the console host.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Length of one control-loop tick.
    pub tick: Duration,
    /// Ticks between two `getUpdates` polls.
    pub check_interval_ticks: u32,
    /// Ticks between two stat samples (and rollover checks).
    pub stat_interval_ticks: u32,
    pub workers: usize,
    pub state_file: PathBuf,

    // Console host
    pub server_command: Vec<String>,
    pub server_dir: Option<PathBuf>,
    /// Usernames ever seen online, used to tell first-time joins apart.
    pub known_users_file: PathBuf,
    pub join_pattern: String,
    pub leave_pattern: String,
    /// Console line carrying the current tick rate; nominal rate when unset.
    pub tps_pattern: Option<String>,
    pub motd: String,
    pub log_buffer_lines: usize,
    /// How long a dispatched command may keep printing before its output is collected.
    pub command_settle: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            check_interval_ticks: 30,
            stat_interval_ticks: 20,
            workers: 4,
            state_file: PathBuf::from("tgb-state.json"),
            server_command: Vec::new(),
            server_dir: None,
            known_users_file: PathBuf::from("tgb-known-users.json"),
            join_pattern: r"(?P<name>\w+) joined the game".to_string(),
            leave_pattern: r"(?P<name>\w+) left the game".to_string(),
            tps_pattern: None,
            motd: "server".to_string(),
            log_buffer_lines: 256,
            command_settle: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BridgeSection {
    tick_ms: Option<u64>,
    check_interval_ticks: Option<u32>,
    stat_interval_ticks: Option<u32>,
    workers: Option<usize>,
    state_file: Option<PathBuf>,
    server_command: Option<Vec<String>>,
    server_dir: Option<PathBuf>,
    known_users_file: Option<PathBuf>,
    join_pattern: Option<String>,
    leave_pattern: Option<String>,
    tps_pattern: Option<String>,
    motd: Option<String>,
    log_buffer_lines: Option<usize>,
    command_settle_ms: Option<u64>,
}

impl BridgeSection {
    fn into_config(self) -> BridgeConfig {
        let d = BridgeConfig::default();
        BridgeConfig {
            tick: self.tick_ms.map(Duration::from_millis).unwrap_or(d.tick),
            check_interval_ticks: self
                .check_interval_ticks
                .unwrap_or(d.check_interval_ticks)
                .max(1),
            stat_interval_ticks: self
                .stat_interval_ticks
                .unwrap_or(d.stat_interval_ticks)
                .max(1),
            workers: self.workers.unwrap_or(d.workers).max(1),
            state_file: self.state_file.unwrap_or(d.state_file),
            server_command: self.server_command.unwrap_or(d.server_command),
            server_dir: self.server_dir,
            known_users_file: self.known_users_file.unwrap_or(d.known_users_file),
            join_pattern: self.join_pattern.unwrap_or(d.join_pattern),
            leave_pattern: self.leave_pattern.unwrap_or(d.leave_pattern),
            tps_pattern: self.tps_pattern,
            motd: self.motd.unwrap_or(d.motd),
            log_buffer_lines: self.log_buffer_lines.unwrap_or(d.log_buffer_lines).max(1),
            command_settle: self
                .command_settle_ms
                .map(Duration::from_millis)
                .unwrap_or(d.command_settle),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    bot: BotConfig,
    #[serde(default)]
    bridge: BridgeSection,
}

/// Typed configuration for the bridge.
#[derive(Clone, Debug)]
pub struct Config {
    pub bot: BotConfig,
    pub bridge: BridgeConfig,
}

impl Config {
    /// Load `.env`, then the JSON config file (`TGB_CONFIG`, default `tgb.json`),
    /// apply environment overrides and validate.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let path = env_path("TGB_CONFIG").unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let raw = fs::read_to_string(&path).map_err(|e| Error::InvalidPath {
            path: path.clone(),
            reason: format!("cannot read config: {e}"),
        })?;

        let mut cfg = Self::parse(&raw)?;
        cfg.apply_env();
        cfg.bot.validate()?;
        Ok(cfg)
    }

    /// Parse a config document without validating it.
    pub fn parse(raw: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(raw)?;
        Ok(Self {
            bot: file.bot,
            bridge: file.bridge.into_config(),
        })
    }

    fn apply_env(&mut self) {
        if let Some(token) = env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty) {
            self.bot.token = token;
        }
        if let Some(path) = env_path("TGB_STATE_FILE") {
            self.bridge.state_file = path;
        }
        if let Some(cmd) = env_str("TGB_SERVER_COMMAND").and_then(non_empty) {
            self.bridge.server_command = cmd.split_whitespace().map(str::to_string).collect();
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bot(users: &[&str], passwords: &[(&str, &str)]) -> BotConfig {
        BotConfig {
            token: "123:abc".to_string(),
            users: users.iter().map(|u| u.to_string()).collect(),
            passwords: passwords
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
            report_chat_id: None,
        }
    }

    #[test]
    fn missing_password_names_the_user() {
        let cfg = bot(&["a", "b"], &[("a", "x")]);
        let err = cfg.validate().unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.ends_with("user(s): b"), "{msg}"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_users_token_and_extra_passwords() {
        assert!(matches!(
            bot(&[], &[]).validate(),
            Err(Error::Config(_))
        ));

        let mut no_token = bot(&["a"], &[("a", "x")]);
        no_token.token = "  ".to_string();
        assert!(matches!(no_token.validate(), Err(Error::Config(_))));

        let extra = bot(&["a"], &[("a", "x"), ("z", "y")]);
        assert!(matches!(extra.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn password_lookup_requires_allowed_user() {
        let mut cfg = bot(&["alice"], &[("alice", "p1")]);
        assert_eq!(cfg.password_for("alice"), Some("p1"));
        assert_eq!(cfg.password_for("mallory"), None);

        cfg.passwords.insert("mallory".to_string(), "x".to_string());
        assert_eq!(cfg.password_for("mallory"), None);
    }

    #[test]
    fn parses_plugin_keys_and_bridge_defaults() {
        let raw = r#"{
            "token": "123:abc",
            "allow-user": ["alice", "bob"],
            "passwords": {"alice": "p1", "bob": "p2"},
            "chat-id": -100200,
            "bridge": {"check-interval-ticks": 10, "server-command": ["./start.sh"]}
        }"#;
        let cfg = Config::parse(raw).unwrap();
        cfg.bot.validate().unwrap();
        assert_eq!(cfg.bot.report_chat_id, Some(ChatId(-100200)));
        assert_eq!(cfg.bridge.check_interval_ticks, 10);
        assert_eq!(cfg.bridge.stat_interval_ticks, 20);
        assert_eq!(cfg.bridge.tick, Duration::from_millis(50));
        assert_eq!(cfg.bridge.server_command, vec!["./start.sh"]);
    }

    #[test]
    fn unquote_strips_matching_quotes_only() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"abc'"), "\"abc'");
        assert_eq!(unquote("x"), "x");
    }
}
