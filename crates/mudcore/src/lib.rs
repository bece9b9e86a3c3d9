//! MUD Core Library
//!
//! 可程式化 MUD 客戶端的 session 執行環境：
//! - `telnet`: Telnet 連線、位元組分幀、選項協商與 MSDP
//! - `encoding`: 每個 session 的字元集
//! - `event` / `action` / `ticker` / `queue`: 事件、輸出比對、計時器與命令佇列
//! - `alias` / `command`: 別名與 `#` 命令
//! - `variables`: MSDP 變數
//! - `ringlog`: 可搜尋的輸出紀錄
//! - `atlas`: 共享地圖、找路與巡遊
//! - `plugin`: 外掛註冊與熱重載
//! - `session` / `host`: 單一連線與多連線主機

pub mod action;
pub mod alias;
pub mod atlas;
pub mod command;
pub mod config;
pub mod encoding;
pub mod error;
pub mod event;
pub mod host;
pub mod line;
pub mod plugin;
pub mod queue;
pub mod ringlog;
pub mod screen;
pub mod session;
pub mod signature;
pub mod speedwalk;
pub mod store;
pub mod telnet;
pub mod ticker;
pub mod variables;

pub use action::{ActionDef, ActionEngine};
pub use alias::{Alias, AliasEngine};
pub use atlas::{Atlas, Route, SharedAtlas};
pub use command::{CommandDef, CommandRegistry};
pub use config::{RingLogConfig, SessionConfig};
pub use encoding::Charset;
pub use error::{CommandError, ScriptError};
pub use event::{EventBus, EventMessage};
pub use host::{HostError, MultiSessionHost};
pub use line::OutputLine;
pub use plugin::{Plugin, PluginCatalog, PluginContext, Registrar};
pub use queue::{Task, TaskQueueEngine};
pub use ringlog::{LogQuery, RingLog};
pub use screen::{ScreenSink, Style};
pub use session::{HostRequest, Session};
pub use signature::Args;
pub use speedwalk::parse_speedwalk;
pub use telnet::{NetEvent, NetMessage, TelnetClient};
pub use ticker::TickerEngine;
pub use variables::{MsdpState, VariableStore};
