//! Action（觸發器）引擎
//!
//! 以 regex 比對每一行伺服器輸出，比對成功時依處理器簽章綁定捕獲群組並呼叫。

use std::rc::Rc;

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ScriptError;
use crate::line::OutputLine;
use crate::plugin::PluginId;
use crate::signature::{coerce, Args, MatchInfo, ParamType, Signature, SignatureError, Value};

/// Action 註冊錯誤
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("無效的 regex '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("參數 {name} 的型別 {ty} 不能用於 action")]
    InvalidParameterType { name: String, ty: String },

    #[error("捕獲群組數量不符：處理器需要 {expected} 個，regex 有 {actual} 個")]
    CaptureCountMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// Action 處理器：收到 session、可修改的輸出行、綁定後的參數
pub type ActionHandler<C> =
    Rc<dyn Fn(&mut C, &mut OutputLine, &Args) -> Result<(), ScriptError>>;

/// Action 定義
#[derive(Debug, Clone, Default)]
pub struct ActionDef {
    pub name: String,
    pub pattern: String,
    /// regex 旗標：i（忽略大小寫）、m（多行）、s（. 比對換行）、x（忽略空白）
    pub flags: String,
    /// 數字越大越先比對
    pub priority: i32,
    /// true 時比對含 ANSI 的原始文字
    pub color: bool,
    pub signature: String,
}

impl ActionDef {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            ..Default::default()
        }
    }

    pub fn flags(mut self, flags: &str) -> Self {
        self.flags = flags.to_string();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn signature(mut self, signature: &str) -> Self {
        self.signature = signature.to_string();
        self
    }
}

struct Action<C> {
    id: u64,
    def: ActionDef,
    regex: Regex,
    signature: Signature,
    owner: Option<PluginId>,
    handler: ActionHandler<C>,
}

/// Action 資訊（列表用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionInfo {
    pub id: u64,
    pub name: String,
    pub pattern: String,
    pub priority: i32,
    pub color: bool,
    pub owner: Option<PluginId>,
}

/// 一次比對成功的結果，尚未呼叫處理器
pub struct ActionMatch<C> {
    pub name: String,
    pub handler: ActionHandler<C>,
    /// 型別轉換失敗時為錯誤
    pub args: Result<Args, ScriptError>,
}

pub struct ActionEngine<C> {
    /// 依 priority 由大到小排序
    actions: Vec<Action<C>>,
    next_id: u64,
}

impl<C> Default for ActionEngine<C> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            next_id: 0,
        }
    }
}

fn compile(def: &ActionDef) -> Result<Regex, ActionError> {
    let mut builder = RegexBuilder::new(&def.pattern);
    builder
        .case_insensitive(def.flags.contains('i'))
        .multi_line(def.flags.contains('m'))
        .dot_matches_new_line(def.flags.contains('s'))
        .ignore_whitespace(def.flags.contains('x'));
    builder.build().map_err(|source| ActionError::InvalidPattern {
        pattern: def.pattern.clone(),
        source,
    })
}

impl<C> ActionEngine<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 註冊 action；regex 立即編譯，簽章立即檢查
    pub fn add(
        &mut self,
        def: ActionDef,
        owner: Option<PluginId>,
        handler: ActionHandler<C>,
    ) -> Result<u64, ActionError> {
        let regex = compile(&def)?;
        let signature = Signature::parse(&def.signature)?;
        for param in &signature.params {
            if matches!(param.ty, ParamType::Bool | ParamType::Custom(_)) {
                return Err(ActionError::InvalidParameterType {
                    name: param.name.clone(),
                    ty: param.ty.to_string(),
                });
            }
        }
        let expected = signature.captures().count();
        let actual = regex.captures_len() - 1;
        if expected != actual {
            return Err(ActionError::CaptureCountMismatch { expected, actual });
        }

        self.next_id += 1;
        let id = self.next_id;
        debug!("新增 action {} ({})", def.name, def.pattern);
        let pos = self.actions.partition_point(|a| a.def.priority >= def.priority);
        self.actions.insert(
            pos,
            Action {
                id,
                def,
                regex,
                signature,
                owner,
                handler,
            },
        );
        Ok(id)
    }

    /// 移除指定名稱的 action，回傳移除數量
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.actions.len();
        self.actions.retain(|a| a.def.name != name);
        before - self.actions.len()
    }

    pub fn unregister_owner(&mut self, owner: &PluginId) -> usize {
        let before = self.actions.len();
        self.actions.retain(|a| a.owner.as_ref() != Some(owner));
        before - self.actions.len()
    }

    pub fn list(&self) -> Vec<ActionInfo> {
        self.actions
            .iter()
            .map(|a| ActionInfo {
                id: a.id,
                name: a.def.name.clone(),
                pattern: a.def.pattern.clone(),
                priority: a.def.priority,
                color: a.def.color,
                owner: a.owner.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// 以優先級順序比對一行，回傳所有比對成功的 action
    pub fn matches(&self, line: &OutputLine) -> Vec<ActionMatch<C>> {
        let mut out = Vec::new();
        for action in &self.actions {
            let text = line.text(action.def.color);
            let Some(caps) = action.regex.captures(text) else {
                continue;
            };
            let info = MatchInfo {
                text: caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
                start: caps.get(0).map(|m| m.start()).unwrap_or(0),
                end: caps.get(0).map(|m| m.end()).unwrap_or(0),
                groups: caps
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()))
                    .collect(),
            };
            out.push(ActionMatch {
                name: action.def.name.clone(),
                handler: Rc::clone(&action.handler),
                args: bind(&action.signature, info),
            });
        }
        out
    }

    /// 比對並呼叫處理器；引擎不在 ctx 內時使用
    pub fn process(&self, ctx: &mut C, line: &mut OutputLine) -> Vec<ScriptError> {
        run_matches(self.matches(line), ctx, line)
    }
}

/// 依序呼叫比對結果的處理器，收集錯誤
pub fn run_matches<C>(
    matches: Vec<ActionMatch<C>>,
    ctx: &mut C,
    line: &mut OutputLine,
) -> Vec<ScriptError> {
    let mut errors = Vec::new();
    for m in matches {
        let result = match m.args {
            Ok(args) => (m.handler)(ctx, line, &args),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("action {} 失敗: {}", m.name, e);
            errors.push(e);
        }
    }
    errors
}

fn bind(signature: &Signature, info: MatchInfo) -> Result<Args, ScriptError> {
    let mut args = Args::new();
    let mut groups = info.groups.clone().into_iter();
    for param in &signature.params {
        let value = match param.ty {
            ParamType::Match => Value::Match(info.clone()),
            ParamType::Message => Value::Message,
            _ => {
                let raw = groups.next().flatten();
                let raw = match (raw, &param.default) {
                    (Some(text), _) => text,
                    (None, Some(default)) => default.clone(),
                    (None, None) => String::new(),
                };
                coerce(&param.ty, &raw, None)
                    .map_err(|e| ScriptError::msg(format!("參數 {}: {}", param.name, e)))?
            }
        };
        args.push(param.name.clone(), value);
    }
    Ok(args)
}
