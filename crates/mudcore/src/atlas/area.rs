use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 巡遊策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TourStrategy {
    /// 最久未造訪
    #[default]
    #[serde(rename = "LRV")]
    LeastRecentlyVisited,
    /// 最近的未造訪房間
    #[serde(rename = "NU")]
    NearestUnvisited,
    /// 最小未造訪區塊優先
    #[serde(rename = "NUP")]
    NearestUnvisitedPocket,
    /// 固定路線
    #[serde(rename = "TD")]
    Scripted,
}

impl fmt::Display for TourStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::LeastRecentlyVisited => "LRV",
            Self::NearestUnvisited => "NU",
            Self::NearestUnvisitedPocket => "NUP",
            Self::Scripted => "TD",
        })
    }
}

impl FromStr for TourStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LRV" => Ok(Self::LeastRecentlyVisited),
            "NU" => Ok(Self::NearestUnvisited),
            "NUP" => Ok(Self::NearestUnvisitedPocket),
            "TD" => Ok(Self::Scripted),
            _ => Err(format!("未知的巡遊策略: {}", s)),
        }
    }
}

/// 區域
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Area {
    pub name: String,
    pub min_level: u32,
    pub max_level: Option<u32>,
    /// 不屬於巡遊範圍的房間
    pub excluded: BTreeSet<String>,
    /// 巡遊時一定要走到的房間
    pub scout: BTreeSet<String>,
    pub strategy: TourStrategy,
    /// TD 策略：房間 → 下一步命令
    pub script: BTreeMap<String, String>,
}

impl Area {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn allows_level(&self, level: u32) -> bool {
        level >= self.min_level && self.max_level.map_or(true, |max| level <= max)
    }
}
