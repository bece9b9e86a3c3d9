//! Session 設定
//!
//! 每個連線一份，以 JSON 存放在主程式設定檔的 `sessions` 清單中。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::encoding::Charset;
use crate::ringlog::{DEFAULT_CAPACITY, DEFAULT_COMMIT_EVERY};
use crate::telnet::TelnetConfig;

/// 環形日誌設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingLogConfig {
    /// 不設定時只保存在記憶體
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    #[serde(default = "default_commit_every")]
    pub commit_every: usize,
}

fn default_capacity() -> u64 {
    DEFAULT_CAPACITY
}

fn default_commit_every() -> usize {
    DEFAULT_COMMIT_EVERY
}

impl Default for RingLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            capacity: DEFAULT_CAPACITY,
            commit_every: DEFAULT_COMMIT_EVERY,
        }
    }
}

/// 單一 session 的設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub encoding: Charset,
    #[serde(default = "default_command_char")]
    pub command_char: char,
    #[serde(default = "default_line_ending")]
    pub line_ending: String,
    /// 收到資料後閒置多久視為提示字元
    #[serde(default = "default_prompt_idle_ms")]
    pub prompt_idle_ms: u64,
    #[serde(default = "default_active_poll_ms")]
    pub active_poll_ms: u64,
    #[serde(default = "default_keepalive_interval_s")]
    pub keepalive_interval_s: u64,
    /// 超過這段時間沒有送出任何東西才送空行
    #[serde(default = "default_keepalive_idle_s")]
    pub keepalive_idle_s: u64,
    #[serde(default)]
    pub ringlog: RingLogConfig,
    /// 別名表檔案；不設定時別名不落地
    #[serde(default)]
    pub alias_file: Option<PathBuf>,
    /// 搜尋 `*.plugin.json` 的目錄
    #[serde(default)]
    pub plugin_roots: Vec<PathBuf>,
    /// 第一階段載入的內建外掛
    #[serde(default = "default_core_plugins")]
    pub core_plugins: Vec<String>,
    /// TTYPE 回報的客戶端名稱
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// 回顯輸入的 ANSI 顏色碼
    #[serde(default = "default_echo_color")]
    pub echo_color: String,
}

fn default_port() -> u16 {
    23
}

fn default_command_char() -> char {
    '#'
}

fn default_line_ending() -> String {
    "\n".to_string()
}

fn default_prompt_idle_ms() -> u64 {
    50
}

fn default_active_poll_ms() -> u64 {
    1
}

fn default_keepalive_interval_s() -> u64 {
    60
}

fn default_keepalive_idle_s() -> u64 {
    300
}

fn default_core_plugins() -> Vec<String> {
    vec!["CoreCommands".to_string()]
}

fn default_client_name() -> String {
    "MUDHOST".to_string()
}

fn default_echo_color() -> String {
    "\x1b[33m".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

impl SessionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: String::new(),
            port: default_port(),
            encoding: Charset::default(),
            command_char: default_command_char(),
            line_ending: default_line_ending(),
            prompt_idle_ms: default_prompt_idle_ms(),
            active_poll_ms: default_active_poll_ms(),
            keepalive_interval_s: default_keepalive_interval_s(),
            keepalive_idle_s: default_keepalive_idle_s(),
            ringlog: RingLogConfig::default(),
            alias_file: None,
            plugin_roots: Vec::new(),
            core_plugins: default_core_plugins(),
            client_name: default_client_name(),
            echo_color: default_echo_color(),
        }
    }

    /// 設定連線位址
    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_s)
    }

    pub fn keepalive_idle(&self) -> Duration {
        Duration::from_secs(self.keepalive_idle_s)
    }

    /// 給連線任務的設定
    pub fn telnet(&self) -> TelnetConfig {
        TelnetConfig {
            prompt_idle: Duration::from_millis(self.prompt_idle_ms),
            ..TelnetConfig::default()
        }
    }
}
