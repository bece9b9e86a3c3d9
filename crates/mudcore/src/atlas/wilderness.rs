//! 野外格狀地圖
//!
//! 數字 vnum ≥ `base` 的房間落在寬度 `width` 的格子上，
//! 相鄰格子的出口不必存檔，由座標推出。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wilderness {
    pub base: u64,
    pub width: u64,
}

impl Wilderness {
    pub fn new(base: u64, width: u64) -> Self {
        Self {
            base,
            width: width.max(1),
        }
    }

    fn index(&self, vnum: &str) -> Option<u64> {
        let n: u64 = vnum.parse().ok()?;
        n.checked_sub(self.base)
    }

    pub fn contains(&self, vnum: &str) -> bool {
        self.index(vnum).is_some()
    }

    /// (x, y)，y 向南遞增
    pub fn coords(&self, vnum: &str) -> Option<(i64, i64)> {
        let i = self.index(vnum)?;
        Some(((i % self.width) as i64, (i / self.width) as i64))
    }

    pub fn vnum_at(&self, x: i64, y: i64) -> Option<String> {
        if x < 0 || y < 0 || x as u64 >= self.width {
            return None;
        }
        Some((self.base + y as u64 * self.width + x as u64).to_string())
    }

    /// 曼哈頓距離；任一方不在野外時為 None
    pub fn distance(&self, a: &str, b: &str) -> Option<i64> {
        let (ax, ay) = self.coords(a)?;
        let (bx, by) = self.coords(b)?;
        Some((ax - bx).abs() + (ay - by).abs())
    }

    /// 四個方向的相鄰格子
    pub fn neighbours(&self, vnum: &str) -> Vec<(&'static str, String)> {
        let Some((x, y)) = self.coords(vnum) else {
            return Vec::new();
        };
        [("north", 0, -1), ("south", 0, 1), ("east", 1, 0), ("west", -1, 0)]
            .into_iter()
            .filter_map(|(dir, dx, dy)| self.vnum_at(x + dx, y + dy).map(|v| (dir, v)))
            .collect()
    }
}
