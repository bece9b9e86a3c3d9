//! 外掛系統
//!
//! 外掛是實作 `Plugin` 的 Rust 型別。`PluginCatalog` 依類別名稱保存工廠，
//! `PluginLoader` 從單元檔（`*.plugin.json`）決定要建立哪些外掛。
//! 外掛在 `register` 裡透過 `Registrar` 把自己的方法掛到各引擎上，
//! 每筆註冊都帶著外掛的 `PluginId`，卸載時各引擎以此一次清除。

mod builtin;
mod loader;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

pub use builtin::CoreCommands;
pub use loader::{LoadReport, PluginInfo, PluginLoader, CORE_UNIT, UNIT_SUFFIX};

use crate::action::{ActionDef, ActionHandler};
use crate::atlas::SharedAtlas;
use crate::command::{CommandDef, CommandHandler};
use crate::error::ScriptError;
use crate::event::{EventHandler, EventMessage};
use crate::line::OutputLine;
use crate::session::Session;
use crate::signature::{Args, Coercer, Value};
use crate::ticker::TickerHandler;

/// 外掛識別（類別名稱）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginId(String);

impl PluginId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 外掛載入錯誤
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("未知的外掛: {0}")]
    UnknownPlugin(String),

    #[error("外掛名稱重複: {0}")]
    DuplicateName(String),

    #[error("外掛 {name} 建立失敗: {reason}")]
    Instantiation { name: String, reason: String },

    #[error("外掛 {name} 註冊失敗: {}", .reasons.join("; "))]
    Registration { name: String, reasons: Vec<String> },

    #[error("無法讀取單元 {path}: {reason}")]
    UnreadableUnit { path: String, reason: String },

    #[error("IO 錯誤: {0}")]
    Io(#[from] io::Error),

    #[error("JSON 錯誤: {0}")]
    Json(#[from] serde_json::Error),
}

impl PluginError {
    pub fn instantiation(name: &str, reason: impl fmt::Display) -> Self {
        Self::Instantiation {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// 建立外掛時取得的環境
#[derive(Clone)]
pub struct PluginContext {
    /// 所屬 session 名稱
    pub session: String,
    /// 來源單元（`core` 或單元檔路徑）
    pub unit: String,
    /// 單元檔中這個外掛的設定；沒有時為 null
    pub settings: serde_json::Value,
    pub atlas: SharedAtlas,
}

impl PluginContext {
    /// 將設定解成指定型別；沒有設定時使用預設值
    pub fn settings<T: DeserializeOwned + Default>(&self) -> Result<T, serde_json::Error> {
        if self.settings.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.settings.clone())
    }
}

/// 外掛
///
/// 狀態放在 `&self` 可變的欄位（`Cell`、`RefCell`）裡；處理器拿到的是共用參照。
pub trait Plugin: Sized + 'static {
    /// 類別名稱，也是 `PluginId`
    const NAME: &'static str;

    fn create(ctx: &PluginContext) -> Result<Self, PluginError>;

    /// 把處理器掛到各引擎
    fn register(registrar: &mut Registrar<'_, Self>);
}

/// 註冊介面
///
/// 每個方法把 `Fn(&P, &mut Session, ...)` 包成引擎需要的處理器並記下擁有者。
/// 失敗不會中斷後續註冊，而是累積起來，最後整個外掛視為載入失敗。
pub struct Registrar<'a, P> {
    plugin: Rc<P>,
    id: PluginId,
    session: &'a mut Session,
    errors: Vec<String>,
    count: usize,
}

impl<'a, P: 'static> Registrar<'a, P> {
    pub(crate) fn new(plugin: Rc<P>, id: PluginId, session: &'a mut Session) -> Self {
        Self {
            plugin,
            id,
            session,
            errors: Vec::new(),
            count: 0,
        }
    }

    pub fn id(&self) -> &PluginId {
        &self.id
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    /// 註冊期間需要調整 session（例如設定佇列）時使用
    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }

    fn fail(&mut self, what: String) {
        warn!("外掛 {} 註冊失敗: {}", self.id, what);
        self.errors.push(what);
    }

    /// 註冊 action
    pub fn action<F>(&mut self, def: ActionDef, f: F)
    where
        F: Fn(&P, &mut Session, &mut OutputLine, &Args) -> Result<(), ScriptError> + 'static,
    {
        let plugin = Rc::clone(&self.plugin);
        let name = def.name.clone();
        let handler: ActionHandler<Session> =
            Rc::new(move |s: &mut Session, line: &mut OutputLine, args: &Args| {
                f(&plugin, s, line, args)
            });
        match self.session.actions.add(def, Some(self.id.clone()), handler) {
            Ok(_) => self.count += 1,
            Err(e) => self.fail(format!("action {}: {}", name, e)),
        }
    }

    /// 註冊命令
    pub fn command<F>(&mut self, def: CommandDef, f: F)
    where
        F: Fn(&P, &mut Session, &Args) -> Result<(), ScriptError> + 'static,
    {
        let plugin = Rc::clone(&self.plugin);
        let name = def.name.clone();
        let handler: CommandHandler<Session> =
            Rc::new(move |s: &mut Session, args: &Args| f(&plugin, s, args));
        match self
            .session
            .commands
            .register(def, Some(self.id.clone()), handler)
        {
            Ok(()) => self.count += 1,
            Err(e) => self.fail(format!("command {}: {}", name, e)),
        }
    }

    /// 註冊腳本：不出現在說明與前綴比對中的命令
    pub fn script<F>(&mut self, name: &str, signature: &str, f: F)
    where
        F: Fn(&P, &mut Session, &Args) -> Result<(), ScriptError> + 'static,
    {
        self.command(CommandDef::new(name, signature).hidden(), f);
    }

    /// 註冊 ticker；`repeats` 為負數表示無限次
    pub fn ticker<F>(&mut self, name: &str, interval: Duration, repeats: i64, f: F)
    where
        F: Fn(&P, &mut Session) -> Result<(), ScriptError> + 'static,
    {
        let plugin = Rc::clone(&self.plugin);
        let handler: TickerHandler<Session> = Rc::new(move |s: &mut Session| f(&plugin, s));
        let now = self.session.now();
        self.session
            .tickers
            .add(name, interval, repeats, Some(self.id.clone()), handler, now);
        self.count += 1;
    }

    /// 訂閱事件
    pub fn event<F>(&mut self, event: &str, priority: i32, f: F)
    where
        F: Fn(&P, &mut Session, &EventMessage) -> Result<(), ScriptError> + 'static,
    {
        let plugin = Rc::clone(&self.plugin);
        let handler: EventHandler<Session> =
            Rc::new(move |s: &mut Session, message: &EventMessage| f(&plugin, s, message));
        self.session
            .events
            .subscribe(event, priority, Some(self.id.clone()), handler);
        self.count += 1;
    }

    /// 自訂參數型別的轉換函式，只套用在本外掛的命令上
    pub fn coercer<F>(&mut self, type_name: &str, f: F)
    where
        F: Fn(&P, &str) -> Result<Value, String> + 'static,
    {
        let plugin = Rc::clone(&self.plugin);
        let coercer: Coercer = Rc::new(move |raw: &str| f(&plugin, raw));
        self.session
            .commands
            .add_coercer(Some(self.id.clone()), type_name, coercer);
    }

    fn finish(self) -> (Vec<String>, usize) {
        (self.errors, self.count)
    }
}

/// 建立好並完成註冊的外掛
pub(crate) struct Instance {
    pub(crate) id: PluginId,
    pub(crate) object: Rc<dyn Any>,
    pub(crate) registrations: usize,
}

type Factory = Rc<dyn Fn(&PluginContext, &mut Session) -> Result<Instance, PluginError>>;

/// 建立外掛並完成註冊；任何一筆註冊失敗就撤回全部
fn build<P: Plugin>(ctx: &PluginContext, session: &mut Session) -> Result<Instance, PluginError> {
    let plugin = Rc::new(P::create(ctx)?);
    let id = PluginId::new(P::NAME);
    let mut registrar = Registrar::new(Rc::clone(&plugin), id.clone(), session);
    P::register(&mut registrar);
    let (errors, registrations) = registrar.finish();
    if !errors.is_empty() {
        session.unregister_owner(&id);
        return Err(PluginError::Registration {
            name: P::NAME.to_string(),
            reasons: errors,
        });
    }
    let object: Rc<dyn Any> = plugin;
    Ok(Instance {
        id,
        object,
        registrations,
    })
}

/// 可用外掛的工廠表
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, Factory>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只含內建的 `CoreCommands`
    pub fn standard() -> Self {
        let mut catalog = Self::new();
        catalog.add::<CoreCommands>();
        catalog
    }

    pub fn add<P: Plugin>(&mut self) {
        let factory: Factory = Rc::new(build::<P>);
        self.factories.insert(P::NAME.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub(crate) fn instantiate(
        &self,
        name: &str,
        ctx: &PluginContext,
        session: &mut Session,
    ) -> Result<Instance, PluginError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_string()))?;
        let instance = factory(ctx, session)?;
        debug!("外掛 {} 完成 {} 筆註冊", name, instance.registrations);
        Ok(instance)
    }
}
