//! 終端機輸出
//!
//! 每個 session 的畫面都印到 stdout；非目前 session 的行前面加上名稱。
//! 每個 session 另外保留一段歷史，切換過去時重印最後幾行。

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use mudcore::host::ScreenFactory;
use mudcore::screen::{ScreenBuffer, ScreenSink, Style};
use mudcore::MultiSessionHost;

const HISTORY: usize = 2000;
const REPLAY: usize = 20;

const RESET: &str = "\x1b[0m";

/// 依樣式加上顏色
pub fn render(text: &str, style: Style, prefix: Option<&str>) -> String {
    let body = match style {
        Style::Info => format!("\x1b[36m{}{}", text, RESET),
        Style::Error => format!("\x1b[31m{}{}", text, RESET),
        Style::Normal | Style::Echo | Style::Raw => text.to_string(),
    };
    match prefix {
        Some(name) => format!("\x1b[2m[{}]{} {}", name, RESET, body),
        None => body,
    }
}

#[derive(Default)]
struct State {
    focus: String,
    histories: HashMap<String, ScreenBuffer>,
}

/// 所有 session 共用的終端機
#[derive(Clone, Default)]
pub struct Terminal {
    state: Rc<RefCell<State>>,
}

impl Terminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 給 `MultiSessionHost` 的畫面建立函式
    pub fn factory(&self) -> ScreenFactory {
        let terminal = self.clone();
        Box::new(move |name: &str| {
            Box::new(SessionScreen {
                name: name.to_string(),
                terminal: terminal.clone(),
            })
        })
    }

    /// 目前 session 改變時重印它的最後幾行
    pub fn follow(&self, host: &MultiSessionHost) {
        let Some(active) = host.active().map(|s| s.name().to_string()) else {
            return;
        };
        let replay = {
            let mut state = self.state.borrow_mut();
            if state.focus == active {
                return;
            }
            state.focus = active.clone();
            state
                .histories
                .get(&active)
                .map(|h| h.last_n(REPLAY).into_iter().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{}", render(&format!("── {} ──", active), Style::Info, None));
        for line in replay {
            let _ = writeln!(out, "{}", render(&line.text, line.style, None));
        }
    }

    /// 主程式本身的訊息
    pub fn notice(&self, text: &str, style: Style) {
        let _ = writeln!(io::stdout().lock(), "{}", render(text, style, None));
    }

    fn append(&self, session: &str, text: &str, style: Style) {
        let focused = {
            let mut state = self.state.borrow_mut();
            state
                .histories
                .entry(session.to_string())
                .or_insert_with(|| ScreenBuffer::new(HISTORY))
                .append(text, style);
            state.focus.is_empty() || state.focus == session
        };
        let prefix = (!focused).then_some(session);
        let _ = writeln!(io::stdout().lock(), "{}", render(text, style, prefix));
    }
}

struct SessionScreen {
    name: String,
    terminal: Terminal,
}

impl ScreenSink for SessionScreen {
    fn append(&mut self, text: &str, style: Style) {
        self.terminal.append(&self.name, text, style);
    }
}
