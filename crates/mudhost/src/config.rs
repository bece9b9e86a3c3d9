//! 設定檔
//!
//! 單一 JSON 檔，預設位置 `~/.config/mudhost/config.json`：
//! - 全域命令字元、共享地圖位置、地形權重
//! - 各連線的 `SessionConfig`
//! - 啟動時自動連線的名稱

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mudcore::atlas::TerrainWeights;
use mudcore::SessionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("無法讀取設定檔 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("設定檔格式錯誤 {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// 客戶端設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 套用到所有連線的命令字元
    pub command_char: Option<char>,
    /// 共享地圖的資料目錄；不設定時地圖只存在記憶體
    pub atlas_path: Option<PathBuf>,
    /// 覆蓋預設地形權重，`null` 表示無法通行
    pub terrain_weights: TerrainWeights,
    pub sessions: Vec<SessionConfig>,
    /// 啟動時自動連線
    pub auto_connect: Vec<String>,
}

impl ClientConfig {
    /// 預設設定檔路徑
    pub fn default_path() -> PathBuf {
        config_dir().join("config.json")
    }

    /// 載入設定；檔案不存在時使用預設值
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_globals(&self, mut config: SessionConfig) -> SessionConfig {
        if let Some(c) = self.command_char {
            config.command_char = c;
        }
        config
    }

    /// 套用全域設定後的所有連線設定
    pub fn profiles(&self) -> Vec<SessionConfig> {
        self.sessions
            .iter()
            .cloned()
            .map(|s| self.apply_globals(s))
            .collect()
    }

    /// 指定名稱的連線設定；沒有時使用預設值
    pub fn session(&self, name: &str) -> SessionConfig {
        let config = self
            .sessions
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .unwrap_or_else(|| SessionConfig::new(name));
        self.apply_globals(config)
    }
}

/// 設定目錄
pub fn config_dir() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("mudhost")
    } else {
        PathBuf::from(".")
    }
}
