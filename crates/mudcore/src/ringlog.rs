//! 持久化的輸出紀錄環
//!
//! 固定容量，以 `ring_number % capacity` 為槽位，寫滿後覆蓋最舊的一筆。
//! 主表 `ring` 以槽位為鍵，索引 `ring_by_epoch` 以 (epoch_ns, 槽位) 為鍵。

use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::store::{self, StoreError};

pub const DEFAULT_CAPACITY: u64 = 100_000;
pub const DEFAULT_COMMIT_EVERY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingLogEntry {
    pub ring_number: u64,
    pub epoch_ns: i64,
    pub context: String,
    pub raw: String,
    pub stripped: String,
}

/// 額外的過濾條件
pub type EntryFilter = Rc<dyn Fn(&RingLogEntry) -> bool>;

/// 查詢條件
#[derive(Clone)]
pub struct LogQuery {
    /// glob（`*`、`?`），比對去色後的文字；空字串等於 `*`
    pub pattern: String,
    pub filter: Option<EntryFilter>,
    pub limit: usize,
    /// 只看這個時間之後的紀錄
    pub start_ns: Option<i64>,
    /// 相同文字只回傳最新的一筆
    pub grouped: bool,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            filter: None,
            limit: 50,
            start_ns: None,
            grouped: false,
        }
    }
}

impl LogQuery {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn since(mut self, start_ns: i64) -> Self {
        self.start_ns = Some(start_ns);
        self
    }

    pub fn grouped(mut self) -> Self {
        self.grouped = true;
        self
    }

    pub fn filter(mut self, filter: EntryFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// glob 轉成錨定的 regex
fn glob_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re)
}

fn epoch_key(epoch_ns: i64, ring_number: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&(epoch_ns.max(0) as u64).to_be_bytes());
    key[8..].copy_from_slice(&ring_number.to_be_bytes());
    key
}

pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

pub struct RingLog {
    db: sled::Db,
    ring: sled::Tree,
    by_epoch: sled::Tree,
    capacity: u64,
    commit_every: usize,
    next: u64,
    uncommitted: usize,
}

impl RingLog {
    pub fn open(path: &Path, capacity: u64, commit_every: usize) -> Result<Self, StoreError> {
        Self::with_db(store::open_db(path)?, capacity, commit_every)
    }

    /// 不落地的紀錄（測試與未設定路徑時）
    pub fn temporary(capacity: u64) -> Result<Self, StoreError> {
        Self::with_db(store::temporary_db()?, capacity, DEFAULT_COMMIT_EVERY)
    }

    fn with_db(db: sled::Db, capacity: u64, commit_every: usize) -> Result<Self, StoreError> {
        let ring = db.open_tree("ring")?;
        let by_epoch = db.open_tree("ring_by_epoch")?;
        let capacity = capacity.max(1);
        // 從最新一筆接著寫
        let next = match by_epoch.last()? {
            Some((key, _)) => {
                let mut slot = [0u8; 8];
                slot.copy_from_slice(&key[8..16]);
                (u64::from_be_bytes(slot) + 1) % capacity
            }
            None => 0,
        };
        debug!("輸出紀錄開啟，容量 {}，下一個槽位 {}", capacity, next);
        Ok(Self {
            db,
            ring,
            by_epoch,
            capacity,
            commit_every: commit_every.max(1),
            next,
            uncommitted: 0,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn append(&mut self, context: &str, raw: &str, stripped: &str) -> Result<u64, StoreError> {
        self.append_at(now_ns(), context, raw, stripped)
    }

    /// 指定時間戳寫入，回傳使用的槽位
    pub fn append_at(
        &mut self,
        epoch_ns: i64,
        context: &str,
        raw: &str,
        stripped: &str,
    ) -> Result<u64, StoreError> {
        let ring_number = self.next;
        let key = ring_number.to_be_bytes();
        if let Some(old) = self.ring.get(key)? {
            let old: RingLogEntry = store::decode(&old)?;
            self.by_epoch.remove(epoch_key(old.epoch_ns, old.ring_number))?;
        }
        let entry = RingLogEntry {
            ring_number,
            epoch_ns,
            context: context.to_string(),
            raw: raw.to_string(),
            stripped: stripped.to_string(),
        };
        self.ring.insert(key, store::encode(&entry)?)?;
        self.by_epoch
            .insert(epoch_key(epoch_ns, ring_number), sled::IVec::default())?;
        trace!("紀錄槽位 {}: {}", ring_number, stripped);

        self.next = (ring_number + 1) % self.capacity;
        self.uncommitted += 1;
        if self.uncommitted >= self.commit_every {
            self.commit()?;
        }
        Ok(ring_number)
    }

    /// 寫入磁碟
    pub fn commit(&mut self) -> Result<(), StoreError> {
        if self.uncommitted > 0 {
            self.db.flush()?;
            self.uncommitted = 0;
        }
        Ok(())
    }

    pub fn get(&self, ring_number: u64) -> Result<Option<RingLogEntry>, StoreError> {
        self.ring
            .get(ring_number.to_be_bytes())?
            .map(|bytes| store::decode(&bytes))
            .transpose()
    }

    /// 依時間由新到舊回傳符合條件的紀錄
    pub fn query(&self, query: &LogQuery) -> Result<Vec<RingLogEntry>, StoreError> {
        let pattern = if query.pattern.is_empty() {
            "*"
        } else {
            query.pattern.as_str()
        };
        let matcher = glob_regex(pattern)
            .map_err(|e| StoreError::Aborted(format!("無效的搜尋樣式 {}: {}", pattern, e)))?;
        let start = epoch_key(query.start_ns.unwrap_or(0), 0);

        let mut seen: HashSet<String> = HashSet::new();
        let mut found = Vec::new();
        for item in self.by_epoch.range(start..).rev() {
            if found.len() >= query.limit {
                break;
            }
            let (key, _) = item?;
            let mut slot = [0u8; 8];
            slot.copy_from_slice(&key[8..16]);
            let Some(entry) = self.get(u64::from_be_bytes(slot))? else {
                continue;
            };
            if !matcher.is_match(&entry.stripped) {
                continue;
            }
            if let Some(filter) = &query.filter {
                if !filter(&entry) {
                    continue;
                }
            }
            if query.grouped && !seen.insert(entry.stripped.clone()) {
                continue;
            }
            found.push(entry);
        }
        Ok(found)
    }
}

impl Drop for RingLog {
    fn drop(&mut self) {
        let _ = self.commit();
    }
}
