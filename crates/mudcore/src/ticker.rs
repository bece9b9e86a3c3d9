//! Ticker 引擎
//!
//! 依固定間隔重複執行的回呼。排程對齊起始時間：`next = max(now, next + interval)`，
//! 延遲時會追上而不是整體往後漂移。

use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ScriptError;
use crate::plugin::PluginId;

/// 最小間隔，與排程器的呼叫頻率相同
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

pub type TickerHandler<C> = Rc<dyn Fn(&mut C) -> Result<(), ScriptError>>;

struct Ticker<C> {
    name: String,
    owner: Option<PluginId>,
    interval: Duration,
    /// 負數表示無限次
    remaining: i64,
    last_tick: Option<Instant>,
    next_tick: Instant,
    handler: TickerHandler<C>,
}

/// Ticker 資訊（列表用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerInfo {
    pub name: String,
    pub interval: Duration,
    pub remaining: i64,
    pub next_tick: Instant,
    pub last_tick: Option<Instant>,
    pub owner: Option<PluginId>,
}

pub struct TickerEngine<C> {
    tickers: Vec<Ticker<C>>,
}

impl<C> Default for TickerEngine<C> {
    fn default() -> Self {
        Self {
            tickers: Vec::new(),
        }
    }
}

impl<C> TickerEngine<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新增 ticker；同名者會被取代
    pub fn add(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        repeats: i64,
        owner: Option<PluginId>,
        handler: TickerHandler<C>,
        now: Instant,
    ) {
        let name = name.into();
        let interval = interval.max(MIN_INTERVAL);
        self.remove(&name);
        debug!("新增 ticker {}，間隔 {:?}，次數 {}", name, interval, repeats);
        self.tickers.push(Ticker {
            name,
            owner,
            interval,
            remaining: repeats,
            last_tick: None,
            next_tick: now + interval,
            handler,
        });
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.tickers.len();
        self.tickers.retain(|t| t.name != name);
        before != self.tickers.len()
    }

    pub fn unregister_owner(&mut self, owner: &PluginId) -> usize {
        let before = self.tickers.len();
        self.tickers.retain(|t| t.owner.as_ref() != Some(owner));
        before - self.tickers.len()
    }

    pub fn get(&self, name: &str) -> Option<TickerInfo> {
        self.tickers.iter().find(|t| t.name == name).map(info)
    }

    pub fn list(&self) -> Vec<TickerInfo> {
        self.tickers.iter().map(info).collect()
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    /// 取出到期的 ticker 並推進排程；次數用完的 ticker 會被移除
    pub fn due(&mut self, now: Instant) -> Vec<(String, TickerHandler<C>)> {
        let mut fired = Vec::new();
        for ticker in &mut self.tickers {
            if ticker.next_tick > now || ticker.remaining == 0 {
                continue;
            }
            fired.push((ticker.name.clone(), Rc::clone(&ticker.handler)));
            ticker.last_tick = Some(now);
            ticker.next_tick = (ticker.next_tick + ticker.interval).max(now);
            if ticker.remaining > 0 {
                ticker.remaining -= 1;
            }
        }
        self.tickers.retain(|t| {
            if t.remaining == 0 {
                debug!("ticker {} 次數已用完", t.name);
            }
            t.remaining != 0
        });
        fired
    }

    /// 推進排程並呼叫到期的處理器；引擎不在 ctx 內時使用
    pub fn tick(&mut self, ctx: &mut C, now: Instant) -> Vec<ScriptError> {
        run_due(self.due(now), ctx)
    }
}

/// 依序呼叫到期 ticker 的處理器，收集錯誤
pub fn run_due<C>(due: Vec<(String, TickerHandler<C>)>, ctx: &mut C) -> Vec<ScriptError> {
    let mut errors = Vec::new();
    for (name, handler) in due {
        if let Err(e) = handler(ctx) {
            warn!("ticker {} 失敗: {}", name, e);
            errors.push(e);
        }
    }
    errors
}

fn info<C>(t: &Ticker<C>) -> TickerInfo {
    TickerInfo {
        name: t.name.clone(),
        interval: t.interval,
        remaining: t.remaining,
        next_tick: t.next_tick,
        last_tick: t.last_tick,
        owner: t.owner.clone(),
    }
}
