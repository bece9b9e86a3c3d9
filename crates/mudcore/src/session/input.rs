//! 玩家輸入流程
//!
//! 一行輸入先以 `;` 分段，每段依序嘗試：命令、快速行走、別名、直接送出。

use tracing::{debug, trace};

use super::Session;
use crate::command::{split_first_word, split_statements, ArgumentError, Invocation};
use crate::error::{CommandError, ScriptError};
use crate::speedwalk::parse_speedwalk;

/// 別名與命令互相展開的最大深度
pub const MAX_INPUT_DEPTH: usize = 50;

/// `#3 kill orc` → `repeat 3 kill orc`
fn rewrite_repeat(line: &str) -> Option<String> {
    let (word, rest) = split_first_word(line);
    if !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("repeat {} {}", word, rest))
    } else {
        None
    }
}

fn command_of(err: &ArgumentError) -> Option<&str> {
    match err {
        ArgumentError::UnknownCommand(_) | ArgumentError::AmbiguousCommand { .. } => None,
        ArgumentError::UnknownOption { command, .. }
        | ArgumentError::AmbiguousOption { command, .. }
        | ArgumentError::MissingArgument { command, .. }
        | ArgumentError::InvalidValue { command, .. }
        | ArgumentError::TooManyArguments { command, .. } => Some(command),
    }
}

impl Session {
    /// 玩家在終端機輸入一行
    pub fn input(&mut self, line: &str) {
        if let Err(e) = self.run_input(line, 0) {
            self.report(&e);
        }
        self.drain_outbox();
    }

    /// 在處理器中執行一行輸入，沿用目前的展開深度
    pub fn execute(&mut self, line: &str) -> Result<(), ScriptError> {
        self.run_input(line, self.depth + 1)
    }

    pub(crate) fn run_input(&mut self, line: &str, depth: usize) -> Result<(), ScriptError> {
        self.run_segments(split_statements(line), depth)
    }

    /// 依序執行已分割的片段；只有超過深度會中斷其餘片段
    fn run_segments(&mut self, segments: Vec<String>, depth: usize) -> Result<(), ScriptError> {
        if depth > MAX_INPUT_DEPTH {
            return Err(ScriptError::RecursionLimit(MAX_INPUT_DEPTH));
        }
        let saved = std::mem::replace(&mut self.depth, depth);
        let mut result = Ok(());
        for segment in segments {
            match self.run_segment(&segment, depth) {
                Ok(()) => {}
                Err(e @ ScriptError::RecursionLimit(_)) => {
                    result = Err(e);
                    break;
                }
                Err(e) => self.report(&e),
            }
        }
        self.depth = saved;
        result
    }

    fn run_segment(&mut self, segment: &str, depth: usize) -> Result<(), ScriptError> {
        if let Some(rest) = segment.strip_prefix(self.commands.prefix()) {
            if let Some(result) = self.run_command(rest) {
                return result;
            }
        }

        if self.is_connected() {
            if let Some(steps) = parse_speedwalk(segment) {
                trace!("快速行走 {} → {:?}", segment, steps);
                for step in steps {
                    self.send_input(&step)?;
                }
                return Ok(());
            }
        }

        let (first, _) = split_first_word(segment);
        if let Some(expansions) = self.aliases.handle(first, segment) {
            debug!("別名 {} 展開為 {:?}", first, expansions);
            // 展開時已經分割過，不再以 `;` 切開
            return self.run_segments(expansions, depth + 1);
        }

        self.send_input(segment)
    }

    /// 執行命令；找不到命令時回傳 None，交給後面的步驟處理
    fn run_command(&mut self, rest: &str) -> Option<Result<(), ScriptError>> {
        let rewritten = rewrite_repeat(rest);
        let line = rewritten.as_deref().unwrap_or(rest);
        let result = match self.commands.parse(line) {
            Ok(Invocation::Run {
                name,
                handler,
                args,
            }) => {
                trace!("執行命令 {} {:?}", name, args);
                handler(self, &args)
            }
            Ok(Invocation::Help(name)) => match self.commands.help(&name) {
                Ok(text) => {
                    self.echo(&text);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            Err(ArgumentError::UnknownCommand(word)) => {
                trace!("未知的命令 {}，當作一般輸入", word);
                return None;
            }
            Err(e) => {
                let help = command_of(&e).and_then(|name| self.commands.help(name).ok());
                self.report(&ScriptError::from(e));
                if let Some(text) = help {
                    self.echo(&text);
                }
                Ok(())
            }
        };
        Some(result)
    }

    /// 送出一行並以回顯顏色顯示
    fn send_input(&mut self, text: &str) -> Result<(), ScriptError> {
        if !self.is_connected() {
            let message = format!("{} 尚未連線，無法送出: {}", self.name, text);
            return Err(CommandError::new("沒有連線", message).into());
        }
        self.echo_input(text);
        self.send(text)
            .map_err(|e| CommandError::new("送出失敗", e.to_string()).into())
    }
}
