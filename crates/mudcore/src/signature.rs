//! 處理器參數簽章
//!
//! 以字串宣告處理器的參數，例如 `"who: str, amount: int = 1, _quiet: bool"`。
//! action 與命令在註冊時解析簽章，呼叫時依簽章把文字轉成型別化的值。

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::error::ScriptError;

/// 參數型別
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
    /// 整個 regex 比對結果
    Match,
    /// 觸發的輸出行
    Message,
    /// 由外掛提供轉換函式的自訂型別
    Custom(String),
}

impl ParamType {
    fn parse(name: &str) -> Self {
        match name {
            "str" | "string" => Self::Str,
            "int" | "integer" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "match" => Self::Match,
            "message" => Self::Message,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Match => "match",
            Self::Message => "message",
            Self::Custom(name) => name.as_str(),
        };
        f.pad(name)
    }
}

/// 單一參數
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
    pub default: Option<String>,
}

impl Param {
    /// bool 參數與底線開頭的參數以 `--name` 形式給值
    pub fn is_option(&self) -> bool {
        self.ty == ParamType::Bool || self.name.starts_with('_')
    }

    /// 命令列上顯示的名稱（去掉前導底線）
    pub fn option_name(&self) -> &str {
        self.name.trim_start_matches('_')
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.is_option()
    }
}

/// 簽章解析錯誤
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("無法解析參數宣告: {0}")]
    Syntax(String),

    #[error("參數名稱重複: {0}")]
    DuplicateName(String),
}

/// 處理器簽章
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Param>,
}

impl Signature {
    pub fn parse(spec: &str) -> Result<Self, SignatureError> {
        let mut params: Vec<Param> = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (decl, default) = match part.split_once('=') {
                Some((d, v)) => (d.trim(), Some(unquote(v.trim()).to_string())),
                None => (part, None),
            };
            let (name, ty) = match decl.split_once(':') {
                Some((n, t)) => (n.trim(), ParamType::parse(t.trim())),
                None => (decl, ParamType::Str),
            };
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(SignatureError::Syntax(part.to_string()));
            }
            if params.iter().any(|p| p.name == name) {
                return Err(SignatureError::DuplicateName(name.to_string()));
            }
            params.push(Param {
                name: name.to_string(),
                ty,
                default,
            });
        }
        Ok(Self { params })
    }

    /// 會吃掉 regex 捕獲群組的參數
    pub fn captures(&self) -> impl Iterator<Item = &Param> {
        self.params
            .iter()
            .filter(|p| !matches!(p.ty, ParamType::Match | ParamType::Message))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

/// regex 比對結果
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchInfo {
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// 捕獲群組（不含群組 0）
    pub groups: Vec<Option<String>>,
}

/// 型別化的參數值
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Match(MatchInfo),
    /// 佔位：輸出行以另一個參數傳入處理器
    Message,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Match(m) => f.write_str(&m.text),
            Self::Message => f.write_str("<message>"),
        }
    }
}

/// 自訂型別轉換函式
pub type Coercer = Rc<dyn Fn(&str) -> Result<Value, String>>;

/// 依型別名稱索引的轉換函式表
pub type Coercers = HashMap<String, Coercer>;

/// 將文字轉為指定型別
pub fn coerce(ty: &ParamType, raw: &str, custom: Option<&Coercers>) -> Result<Value, String> {
    match ty {
        ParamType::Str => Ok(Value::Str(raw.to_string())),
        ParamType::Int => raw
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("'{}' 不是整數", raw)),
        ParamType::Float => raw
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("'{}' 不是數字", raw)),
        ParamType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "" | "1" | "true" | "yes" | "on" => Ok(Value::Bool(true)),
            "0" | "false" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(format!("'{}' 不是布林值", raw)),
        },
        ParamType::Match | ParamType::Message => Err(format!("{} 型別無法由文字轉換", ty)),
        ParamType::Custom(name) => match custom.and_then(|c| c.get(name)) {
            Some(coercer) => coercer(raw),
            None => Err(format!("沒有 {} 型別的轉換函式", name)),
        },
    }
}

/// 綁定後的參數
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Vec<(String, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.values.push((name.into(), value));
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// 依宣告順序的值
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Value::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(Value::Float(x)) => Some(*x),
            Some(Value::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    /// 未給值的 bool 選項視為 false
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(Value::Bool(true)))
    }

    pub fn match_info(&self) -> Option<&MatchInfo> {
        self.values.iter().find_map(|(_, v)| match v {
            Value::Match(m) => Some(m),
            _ => None,
        })
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ScriptError> {
        self.str(name)
            .ok_or_else(|| ScriptError::msg(format!("缺少參數 {}", name)))
    }

    pub fn require_int(&self, name: &str) -> Result<i64, ScriptError> {
        self.int(name)
            .ok_or_else(|| ScriptError::msg(format!("缺少參數 {}", name)))
    }
}
