//! 腳本與命令執行期錯誤
//!
//! 各引擎在呼叫使用者程式碼的邊界捕捉 `ScriptError`，交給 session 的錯誤輸出。

use thiserror::Error;

use crate::alias::AliasError;
use crate::atlas::AtlasError;
use crate::command::ArgumentError;
use crate::plugin::PluginError;
use crate::queue::QueueError;
use crate::store::StoreError;

/// 帶標題的執行期錯誤（未知房間、無效別名等）
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{title}: {message}")]
pub struct CommandError {
    pub title: String,
    pub message: String,
}

impl CommandError {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// 處理器（action、命令、ticker、事件）回傳的錯誤
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("參數錯誤: {0}")]
    Argument(#[from] ArgumentError),

    #[error("別名錯誤: {0}")]
    Alias(#[from] AliasError),

    #[error("佇列錯誤: {0}")]
    Queue(#[from] QueueError),

    #[error("儲存錯誤: {0}")]
    Store(#[from] StoreError),

    #[error("外掛錯誤: {0}")]
    Plugin(#[from] PluginError),

    #[error("地圖錯誤: {0}")]
    Atlas(#[from] AtlasError),

    #[error("輸入遞迴過深（超過 {0} 層）")]
    RecursionLimit(usize),
}

impl ScriptError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// 錯誤面板的標題
    pub fn title(&self) -> &str {
        match self {
            Self::Command(e) => &e.title,
            Self::Argument(_) => "參數錯誤",
            Self::Alias(_) => "別名錯誤",
            Self::Queue(_) => "佇列錯誤",
            Self::Store(_) => "儲存錯誤",
            Self::Plugin(_) => "外掛錯誤",
            Self::Atlas(_) => "地圖錯誤",
            Self::Failed(_) | Self::RecursionLimit(_) => "腳本錯誤",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = CommandError::new("未知房間", "找不到 vnum 9999");
        assert_eq!(err.to_string(), "未知房間: 找不到 vnum 9999");
        let script: ScriptError = err.into();
        assert_eq!(script.title(), "未知房間");
    }

    #[test]
    fn test_script_error_msg() {
        let err = ScriptError::msg("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.title(), "腳本錯誤");
    }
}
