//! 伺服器輸出行

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// CSI 控制序列：ESC [ 參數 結尾字元
    static ref CSI: Regex = Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("CSI regex");
}

/// 移除 ANSI CSI 控制序列
pub fn strip_ansi(text: &str) -> String {
    CSI.replace_all(text, "").into_owned()
}

/// 一行伺服器輸出
///
/// `raw` 保留控制序列，`stripped` 為移除後的純文字。`gag` 可由 action 設定以抑制顯示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub seq: u64,
    pub raw: String,
    pub stripped: String,
    pub gag: bool,
    pub loggable: bool,
    /// 由 IAC GA 或閒置判定產生的提示字元
    pub prompt: bool,
}

impl OutputLine {
    pub fn new(seq: u64, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let stripped = strip_ansi(&raw);
        Self {
            seq,
            raw,
            stripped,
            gag: false,
            loggable: true,
            prompt: false,
        }
    }

    pub fn prompt(seq: u64, raw: impl Into<String>) -> Self {
        Self {
            prompt: true,
            ..Self::new(seq, raw)
        }
    }

    /// 依 color 旗標選擇比對的文字
    pub fn text(&self, color: bool) -> &str {
        if color {
            &self.raw
        } else {
            &self.stripped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;31mRed\x1b[0m text"), "Red text");
        assert_eq!(strip_ansi("\x1b[mplain"), "plain");
        assert_eq!(strip_ansi("no escapes"), "no escapes");
    }

    #[test]
    fn test_output_line_forms() {
        let line = OutputLine::new(7, "\x1b[32mYou are hungry.\x1b[0m");
        assert_eq!(line.seq, 7);
        assert_eq!(line.stripped, "You are hungry.");
        assert_eq!(line.text(true), "\x1b[32mYou are hungry.\x1b[0m");
        assert_eq!(line.text(false), "You are hungry.");
        assert!(!line.gag);
        assert!(line.loggable);
        assert!(!line.prompt);
    }

    #[test]
    fn test_prompt_line() {
        let line = OutputLine::prompt(1, "HP:100> ");
        assert!(line.prompt);
        assert_eq!(line.stripped, "HP:100> ");
    }
}
