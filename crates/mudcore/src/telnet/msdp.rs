//! MSDP (MUD Server Data Protocol) 編解碼
//!
//! sub-negotiation 內容格式為 `VAR <name> VAL <value>`，value 可為純量、
//! ARRAY（ARRAY_OPEN ... ARRAY_CLOSE）或 TABLE（TABLE_OPEN ... TABLE_CLOSE）。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// MSDP 的 telnet 選項編號
pub const MSDP: u8 = 69;

pub const MSDP_VAR: u8 = 0x01;
pub const MSDP_VAL: u8 = 0x02;
pub const MSDP_TABLE_OPEN: u8 = 0x03;
pub const MSDP_TABLE_CLOSE: u8 = 0x04;
pub const MSDP_ARRAY_OPEN: u8 = 0x05;
pub const MSDP_ARRAY_CLOSE: u8 = 0x06;

/// 協定層錯誤
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("MSDP 格式錯誤（位移 {offset}）: {reason}")]
    MalformedMsdp { offset: usize, reason: &'static str },

    #[error("非預期的 sub-negotiation（選項 {0}）")]
    UnexpectedSubnegotiation(u8),
}

/// MSDP 值（遞迴結構）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MsdpValue {
    String(String),
    Array(Vec<MsdpValue>),
    /// 同一個 VAR 後接多個 VAL（`VAR X VAL a VAL b`），沒有 ARRAY 標記
    Values(Vec<MsdpValue>),
    /// 保留伺服器送來的欄位順序
    Table(Vec<(String, MsdpValue)>),
}

impl MsdpValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// 純量內容；ARRAY/TABLE 回傳 None
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// ARRAY 或多個 VAL 的內容
    pub fn as_array(&self) -> Option<&[MsdpValue]> {
        match self {
            Self::Array(items) | Self::Values(items) => Some(items),
            _ => None,
        }
    }

    /// 在 TABLE 中依鍵查詢
    pub fn get(&self, key: &str) -> Option<&MsdpValue> {
        match self {
            Self::Table(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// 編碼為 sub-negotiation 中 VAL 之後的位元組
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::String(s) => out.extend_from_slice(s.as_bytes()),
            Self::Array(items) => {
                out.push(MSDP_ARRAY_OPEN);
                for item in items {
                    out.push(MSDP_VAL);
                    item.encode_into(out);
                }
                out.push(MSDP_ARRAY_CLOSE);
            }
            Self::Values(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(MSDP_VAL);
                    }
                    item.encode_into(out);
                }
            }
            Self::Table(entries) => {
                out.push(MSDP_TABLE_OPEN);
                for (key, value) in entries {
                    out.push(MSDP_VAR);
                    out.extend_from_slice(key.as_bytes());
                    out.push(MSDP_VAL);
                    value.encode_into(out);
                }
                out.push(MSDP_TABLE_CLOSE);
            }
        }
    }
}

impl fmt::Display for MsdpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{}", s),
            Self::Array(items) | Self::Values(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Self::Table(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// 將一組 `(變數, 值)` 編碼為 sub-negotiation 內容
pub fn encode_pairs(pairs: &[(String, MsdpValue)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in pairs {
        out.push(MSDP_VAR);
        out.extend_from_slice(name.as_bytes());
        out.push(MSDP_VAL);
        value.encode_into(&mut out);
    }
    out
}

/// `VAR LIST VAL <what>`
pub fn list_request(what: &str) -> Vec<u8> {
    encode_pairs(&[("LIST".to_string(), MsdpValue::string(what))])
}

/// `VAR REPORT VAL a VAL b ...`，一次訂閱所有變數
pub fn report_request<S: AsRef<str>>(variables: &[S]) -> Vec<u8> {
    let mut out = vec![MSDP_VAR];
    out.extend_from_slice(b"REPORT");
    for var in variables {
        out.push(MSDP_VAL);
        out.extend_from_slice(var.as_ref().as_bytes());
    }
    out
}

/// 解析 sub-negotiation 內容為 `(變數, 值)` 列表
///
/// 同一個 VAR 後面接多個 VAL 時為 `MsdpValue::Values`。
pub fn decode(body: &[u8]) -> Result<Vec<(String, MsdpValue)>, ProtocolError> {
    let mut parser = Parser { body, pos: 0 };
    let pairs = parser.pairs(None)?;
    if parser.pos != body.len() {
        return Err(parser.error("多餘的結尾位元組"));
    }
    Ok(pairs)
}

struct Parser<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.body.get(self.pos).copied()
    }

    fn error(&self, reason: &'static str) -> ProtocolError {
        ProtocolError::MalformedMsdp {
            offset: self.pos,
            reason,
        }
    }

    fn expect(&mut self, marker: u8, reason: &'static str) -> Result<(), ProtocolError> {
        if self.peek() == Some(marker) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    /// 讀取直到下一個標記位元組
    fn text(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if (MSDP_VAR..=MSDP_ARRAY_CLOSE).contains(&b) {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.body[start..self.pos]).into_owned()
    }

    fn pairs(&mut self, close: Option<u8>) -> Result<Vec<(String, MsdpValue)>, ProtocolError> {
        let mut pairs = Vec::new();
        loop {
            match self.peek() {
                None if close.is_none() => return Ok(pairs),
                None => return Err(self.error("TABLE 未關閉")),
                Some(b) if Some(b) == close => {
                    self.pos += 1;
                    return Ok(pairs);
                }
                Some(MSDP_VAR) => {
                    self.pos += 1;
                    let name = self.text();
                    self.expect(MSDP_VAL, "VAR 後缺少 VAL")?;
                    let mut values = vec![self.value()?];
                    while self.peek() == Some(MSDP_VAL) {
                        self.pos += 1;
                        values.push(self.value()?);
                    }
                    let value = if values.len() == 1 {
                        values.remove(0)
                    } else {
                        MsdpValue::Values(values)
                    };
                    pairs.push((name, value));
                }
                Some(_) => return Err(self.error("預期 VAR")),
            }
        }
    }

    fn value(&mut self) -> Result<MsdpValue, ProtocolError> {
        match self.peek() {
            Some(MSDP_TABLE_OPEN) => {
                self.pos += 1;
                Ok(MsdpValue::Table(self.pairs(Some(MSDP_TABLE_CLOSE))?))
            }
            Some(MSDP_ARRAY_OPEN) => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    match self.peek() {
                        Some(MSDP_ARRAY_CLOSE) => {
                            self.pos += 1;
                            return Ok(MsdpValue::Array(items));
                        }
                        Some(MSDP_VAL) => {
                            self.pos += 1;
                            items.push(self.value()?);
                        }
                        None => return Err(self.error("ARRAY 未關閉")),
                        Some(_) => return Err(self.error("ARRAY 中預期 VAL")),
                    }
                }
            }
            Some(MSDP_TABLE_CLOSE) | Some(MSDP_ARRAY_CLOSE) | Some(MSDP_VAR) | Some(MSDP_VAL)
            | None => Ok(MsdpValue::String(String::new())),
            Some(_) => Ok(MsdpValue::String(self.text())),
        }
    }
}
