//! Alias（別名）模組
//!
//! 將輸入的第一個字展開為一或多個命令。展開字串中 `%0` 是別名本身，
//! `%1`..`%9` 是輸入的第 N 個參數，`%*` 是全部參數；`;` 分隔多個命令（`\;` 為字面分號）。

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::command::split_statements;

#[derive(Debug, Error)]
pub enum AliasError {
    #[error("別名已存在: {0}")]
    AliasExists(String),

    #[error("找不到別名: {0}")]
    NotFound(String),

    #[error("無效的別名名稱: {0}（格式為 分類.名稱）")]
    InvalidName(String),

    #[error("別名檔案讀寫失敗: {0}")]
    Io(#[from] io::Error),

    #[error("別名檔案格式錯誤: {0}")]
    Json(#[from] serde_json::Error),
}

/// 別名定義
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub category: String,
    pub name: String,
    pub expansion: String,
    /// 暫時別名不寫入檔案
    pub temporary: bool,
}

impl Alias {
    pub fn key(&self) -> String {
        format!("{}.{}", self.category, self.name)
    }

    /// 以輸入行展開，回傳分割後的命令
    pub fn expand(&self, line: &str) -> Vec<String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        split_statements(&self.expansion)
            .into_iter()
            .map(|segment| substitute(&segment, &words))
            .collect()
    }
}

/// 以 `%N` 取代參數；缺少的參數為空字串
fn substitute(template: &str, words: &[&str]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(d) if d.is_ascii_digit() => {
                chars.next();
                let n = d.to_digit(10).unwrap_or(0) as usize;
                out.push_str(words.get(n).copied().unwrap_or(""));
            }
            Some('*') => {
                chars.next();
                out.push_str(&words.get(1..).unwrap_or(&[]).join(" "));
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }
    out.trim().to_string()
}

/// 分解 `分類.名稱`
fn split_key(key: &str) -> Result<(&str, &str), AliasError> {
    match key.split_once('.') {
        Some((cat, name))
            if !cat.is_empty() && !name.is_empty() && !name.contains(char::is_whitespace) =>
        {
            Ok((cat, name))
        }
        _ => Err(AliasError::InvalidName(key.to_string())),
    }
}

/// 檔案格式：`{分類: {名稱: 展開}}`
type AliasTable = BTreeMap<String, BTreeMap<String, String>>;

/// 別名引擎
#[derive(Debug, Default)]
pub struct AliasEngine {
    /// 以名稱（第一個字）索引
    aliases: HashMap<String, Alias>,
    order: Vec<String>,
    path: Option<PathBuf>,
}

impl AliasEngine {
    /// 創建新的記憶體別名引擎
    pub fn new() -> Self {
        Self::default()
    }

    /// 從檔案載入；檔案不存在時為空
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AliasError> {
        let path = path.into();
        let mut engine = Self {
            path: Some(path.clone()),
            ..Self::default()
        };
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let table: AliasTable = serde_json::from_str(&content)?;
            for (category, names) in table {
                for (name, expansion) in names {
                    engine.insert(Alias {
                        category: category.clone(),
                        name,
                        expansion,
                        temporary: false,
                    });
                }
            }
            info!("已載入 {} 個別名: {}", engine.len(), path.display());
        }
        Ok(engine)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn insert(&mut self, alias: Alias) {
        if !self.aliases.contains_key(&alias.name) {
            self.order.push(alias.name.clone());
        }
        self.aliases.insert(alias.name.clone(), alias);
    }

    /// 新增別名；名稱在所有分類中必須唯一
    pub fn add(&mut self, key: &str, expansion: &str, temporary: bool) -> Result<(), AliasError> {
        let (category, name) = split_key(key)?;
        if let Some(existing) = self.aliases.get(name) {
            return Err(AliasError::AliasExists(existing.key()));
        }
        debug!("新增別名 {} = {}", key, expansion);
        self.insert(Alias {
            category: category.to_string(),
            name: name.to_string(),
            expansion: expansion.to_string(),
            temporary,
        });
        if !temporary {
            if let Err(e) = self.save() {
                self.aliases.remove(name);
                self.order.retain(|n| n != name);
                return Err(e);
            }
        }
        Ok(())
    }

    /// 移除別名；可用 `分類.名稱` 或只用名稱
    pub fn remove(&mut self, key: &str) -> Result<Alias, AliasError> {
        let name = key.split_once('.').map(|(_, n)| n).unwrap_or(key);
        let alias = self
            .aliases
            .remove(name)
            .ok_or_else(|| AliasError::NotFound(key.to_string()))?;
        let position = self.order.iter().position(|n| n == name);
        self.order.retain(|n| n != name);
        if !alias.temporary {
            if let Err(e) = self.save() {
                if let Some(i) = position {
                    self.order.insert(i, alias.name.clone());
                }
                self.aliases.insert(alias.name.clone(), alias);
                return Err(e);
            }
        }
        Ok(alias)
    }

    pub fn get(&self, name: &str) -> Option<&Alias> {
        let name = name.split_once('.').map(|(_, n)| n).unwrap_or(name);
        self.aliases.get(name)
    }

    /// 依加入順序列出
    pub fn list(&self) -> Vec<&Alias> {
        self.order
            .iter()
            .filter_map(|name| self.aliases.get(name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// 第一個字符合別名時回傳展開後的命令
    pub fn handle(&self, first_word: &str, line: &str) -> Option<Vec<String>> {
        self.aliases.get(first_word).map(|alias| alias.expand(line))
    }

    /// 寫入非暫時別名
    pub fn save(&self) -> Result<(), AliasError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut table = AliasTable::new();
        for alias in self.aliases.values().filter(|a| !a.temporary) {
            table
                .entry(alias.category.clone())
                .or_default()
                .insert(alias.name.clone(), alias.expansion.clone());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&table)?)?;
        Ok(())
    }
}
