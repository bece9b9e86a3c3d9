//! 畫面輸出
//!
//! session 只需要「附加一行並帶樣式提示」的能力；實際呈現（終端機、檔案、
//! 測試收集器）由 `ScreenSink` 的實作決定。

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// 樣式提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// 伺服器輸出
    Normal,
    /// 本地回顯的輸入
    Echo,
    /// 客戶端訊息
    Info,
    /// 錯誤（紅色）
    Error,
    /// 不做任何處理
    Raw,
}

/// 畫面輸出端
pub trait ScreenSink {
    fn append(&mut self, text: &str, style: Style);
}

/// 一筆畫面訊息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenLine {
    pub text: String,
    pub style: Style,
}

/// 固定容量的記憶體畫面緩衝區
#[derive(Debug, Clone)]
pub struct ScreenBuffer {
    lines: VecDeque<ScreenLine>,
    capacity: usize,
}

impl ScreenBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, line: ScreenLine) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn lines(&self) -> impl Iterator<Item = &ScreenLine> {
        self.lines.iter()
    }

    /// 獲取最後 N 條訊息
    pub fn last_n(&self, n: usize) -> Vec<&ScreenLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).collect()
    }

    /// 只取文字
    pub fn texts(&self) -> Vec<String> {
        self.lines.iter().map(|l| l.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for ScreenBuffer {
    fn default() -> Self {
        Self::new(10000)
    }
}

impl ScreenSink for ScreenBuffer {
    fn append(&mut self, text: &str, style: Style) {
        self.push(ScreenLine {
            text: text.to_string(),
            style,
        });
    }
}

/// 共享的畫面緩衝區；session 寫入，外部（測試、主程式）讀取
#[derive(Debug, Clone, Default)]
pub struct SharedScreen(pub Rc<RefCell<ScreenBuffer>>);

impl SharedScreen {
    pub fn new(capacity: usize) -> Self {
        Self(Rc::new(RefCell::new(ScreenBuffer::new(capacity))))
    }

    pub fn texts(&self) -> Vec<String> {
        self.0.borrow().texts()
    }

    /// 取出並清空目前的內容
    pub fn drain(&self) -> Vec<ScreenLine> {
        self.0.borrow_mut().lines.drain(..).collect()
    }
}

impl ScreenSink for SharedScreen {
    fn append(&mut self, text: &str, style: Style) {
        self.0.borrow_mut().append(text, style);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_capacity() {
        let mut buffer = ScreenBuffer::new(3);
        for i in 0..5 {
            buffer.append(&format!("line {}", i), Style::Normal);
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.texts(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_last_n() {
        let mut buffer = ScreenBuffer::new(10);
        buffer.append("a", Style::Info);
        buffer.append("b", Style::Error);
        let last = buffer.last_n(1);
        assert_eq!(last[0].text, "b");
        assert_eq!(last[0].style, Style::Error);
        assert_eq!(buffer.last_n(5).len(), 2);
    }

    #[test]
    fn test_shared_screen_drain() {
        let screen = SharedScreen::new(10);
        let mut sink: Box<dyn ScreenSink> = Box::new(screen.clone());
        sink.append("hello", Style::Normal);
        assert_eq!(screen.texts(), vec!["hello"]);
        assert_eq!(screen.drain().len(), 1);
        assert!(screen.texts().is_empty());
    }
}
