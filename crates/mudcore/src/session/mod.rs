//! Session 模組
//!
//! 每個 Session 代表一個獨立的 MUD 連線，擁有：
//! - 分幀器與選項協商表
//! - 事件、action、ticker、佇列、別名、命令、MSDP 變數、輸出紀錄
//! - 對共享地圖的參照與自己的外掛
//!
//! Session 本身不做 IO：主程式把連線任務的 `NetEvent` 餵進來，
//! 寫出的位元組經由通道交給連線任務。

mod input;
mod output;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

pub use input::MAX_INPUT_DEPTH;

use crate::action::ActionEngine;
use crate::alias::{AliasEngine, AliasError};
use crate::atlas::{SharedAtlas, TravelerState};
use crate::command::CommandRegistry;
use crate::config::SessionConfig;
use crate::encoding::Charset;
use crate::error::ScriptError;
use crate::event::{invoke_all, EventBus, EventMessage};
use crate::plugin::{LoadReport, PluginCatalog, PluginId, PluginLoader};
use crate::queue::{Task, TaskQueueEngine};
use crate::ringlog::RingLog;
use crate::screen::{ScreenSink, Style};
use crate::store::StoreError;
use crate::telnet::{
    hex_dump, ByteCodec, ConnectionHandle, ConnectionState, OptionTable, TelnetError, IAC,
};
use crate::ticker::{run_due, TickerEngine};
use crate::variables::VariableStore;

/// 移動命令使用的佇列
pub const MOVE_QUEUE: &str = "move";

/// 建立 session 的錯誤
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("輸出紀錄無法開啟: {0}")]
    Store(#[from] StoreError),

    #[error("別名檔案無法載入: {0}")]
    Alias(#[from] AliasError),
}

/// 命令對主程式提出的要求；session 看不到其他 session，只能排隊等主程式處理
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRequest {
    Connect {
        name: String,
        host: Option<String>,
        port: Option<u16>,
    },
    Switch(String),
    List,
    Quit,
}

/// 單一連線
pub struct Session {
    name: String,
    config: SessionConfig,
    state: ConnectionState,
    charset: Charset,
    codec: ByteCodec,
    options: OptionTable,
    connection: Option<ConnectionHandle>,
    writer: Option<mpsc::UnboundedSender<Vec<u8>>>,
    last_write: Instant,
    password_mode: bool,
    seq: u64,
    now: Instant,
    depth: usize,
    screen: Box<dyn ScreenSink>,
    outbox: Rc<RefCell<VecDeque<String>>>,
    requests: VecDeque<HostRequest>,
    loader: Option<PluginLoader>,

    pub events: EventBus<Session>,
    pub actions: ActionEngine<Session>,
    pub tickers: TickerEngine<Session>,
    pub queue: TaskQueueEngine,
    pub aliases: AliasEngine,
    pub commands: CommandRegistry<Session>,
    pub variables: VariableStore,
    pub ringlog: RingLog,
    pub atlas: SharedAtlas,
    /// 找路時使用的角色狀態
    pub traveler: TravelerState,
}

impl Session {
    /// 建立 session 並依兩階段載入外掛
    pub fn new(
        config: SessionConfig,
        atlas: SharedAtlas,
        catalog: Rc<PluginCatalog>,
        screen: Box<dyn ScreenSink>,
    ) -> Result<Self, SessionError> {
        let now = Instant::now();
        let ringlog = match &config.ringlog.path {
            Some(path) => RingLog::open(path, config.ringlog.capacity, config.ringlog.commit_every)?,
            None => RingLog::temporary(config.ringlog.capacity)?,
        };
        let aliases = match &config.alias_file {
            Some(path) => AliasEngine::open(path)?,
            None => AliasEngine::new(),
        };

        let outbox = Rc::new(RefCell::new(VecDeque::new()));
        let mut queue = TaskQueueEngine::new();
        let sink = Rc::clone(&outbox);
        queue.set_inserter(Box::new(move |task: &Task| {
            sink.borrow_mut().push_back(task.command.clone())
        }));
        queue.set_queue(MOVE_QUEUE, 0, None);

        let loader = PluginLoader::new(
            catalog,
            config.core_plugins.clone(),
            config.plugin_roots.clone(),
        );

        let mut session = Self {
            name: config.name.clone(),
            state: ConnectionState::Disconnected,
            charset: config.encoding,
            codec: ByteCodec::new(),
            options: OptionTable::standard(&config.client_name),
            connection: None,
            writer: None,
            last_write: now,
            password_mode: false,
            seq: 0,
            now,
            depth: 0,
            screen,
            outbox,
            requests: VecDeque::new(),
            loader: None,
            events: EventBus::new(),
            actions: ActionEngine::new(),
            tickers: TickerEngine::new(),
            queue,
            aliases,
            commands: CommandRegistry::new(config.command_char),
            variables: VariableStore::standard(),
            ringlog,
            atlas,
            traveler: TravelerState::default(),
            config,
        };
        session.loader = Some(loader);
        session.load_plugins();
        info!("Session {} 已建立", session.name);
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn password_mode(&self) -> bool {
        self.password_mode
    }

    /// 最後一次排程時間
    pub fn now(&self) -> Instant {
        self.now
    }

    /// 距離上次送出資料的時間
    pub fn idle_for(&self) -> Duration {
        self.now.saturating_duration_since(self.last_write)
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    // ========================================================================
    // 連線
    // ========================================================================

    pub fn set_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// 撥號失敗：回到未連線並顯示原因
    pub fn connect_failed(&mut self, err: &TelnetError) {
        self.state = ConnectionState::Disconnected;
        warn!("Session {} 連線失敗: {}", self.name, err);
        self.show(&format!("[連線錯誤] {}", err), Style::Error);
    }

    /// 接上連線任務
    pub fn attach(&mut self, handle: ConnectionHandle) {
        self.attach_writer(handle.writer());
        self.connection = Some(handle);
    }

    /// 只接上寫入通道（測試或自訂傳輸層）
    pub fn attach_writer(&mut self, writer: mpsc::UnboundedSender<Vec<u8>>) {
        self.writer = Some(writer);
        self.codec = ByteCodec::new();
        self.options = OptionTable::standard(&self.config.client_name);
        self.state = ConnectionState::Connected;
        self.password_mode = false;
        self.last_write = self.now;
        info!("Session {} 已連線", self.name);
        self.dispatch("connected", EventMessage::Empty);
    }

    /// 主動斷線
    pub fn disconnect(&mut self) {
        if self.writer.is_none() && self.connection.is_none() {
            return;
        }
        self.writer = None;
        self.connection = None;
        self.state = ConnectionState::Disconnected;
        self.password_mode = false;
        info!("Session {} 已斷線", self.name);
        self.dispatch("disconnected", EventMessage::Empty);
    }

    /// 連線中斷：標記狀態並顯示紅字
    pub fn connection_lost(&mut self, reason: &str) {
        self.writer = None;
        self.connection = None;
        self.state = ConnectionState::Lost;
        self.password_mode = false;
        warn!("Session {} 連線中斷: {}", self.name, reason);
        self.show(&format!("連線中斷: {}", reason), Style::Error);
        self.dispatch("disconnected", EventMessage::Text(reason.to_string()));
    }

    /// 寫出原始位元組
    pub fn write_raw(&mut self, bytes: Vec<u8>) -> Result<(), TelnetError> {
        let Some(writer) = &self.writer else {
            return Err(TelnetError::NotConnected);
        };
        trace!("WRITE_RAW\n{}", hex_dump(&bytes));
        if writer.send(bytes).is_err() {
            self.connection_lost("寫入失敗");
            return Err(TelnetError::NotConnected);
        }
        self.last_write = self.now;
        Ok(())
    }

    /// 以 session 字元集編碼並送出一行；0xFF 會被跳脫
    pub fn send(&mut self, text: &str) -> Result<(), TelnetError> {
        let mut bytes = Vec::with_capacity(text.len() + 2);
        for b in self.charset.encode(text) {
            bytes.push(b);
            if b == IAC {
                bytes.push(b);
            }
        }
        bytes.extend_from_slice(self.config.line_ending.as_bytes());
        debug!("[{}] 送出: {}", self.name, text);
        self.write_raw(bytes)
    }

    // ========================================================================
    // 畫面
    // ========================================================================

    pub fn show(&mut self, text: &str, style: Style) {
        self.screen.append(text, style);
    }

    /// 客戶端訊息（不經過 action）
    pub fn echo(&mut self, text: &str) {
        self.show(text, Style::Info);
    }

    /// 以回顯顏色顯示送出的命令；密碼模式時不顯示
    pub(crate) fn echo_input(&mut self, text: &str) {
        if self.password_mode {
            return;
        }
        let colored = format!("{}{}\x1b[0m", self.config.echo_color, text);
        self.show(&colored, Style::Echo);
    }

    /// 錯誤面板：寫入日誌並以紅字顯示
    pub fn report(&mut self, err: &ScriptError) {
        error!("[{}] {}: {}", self.name, err.title(), err);
        let text = format!("[{}] {}", err.title(), err);
        self.show(&text, Style::Error);
    }

    fn report_all(&mut self, errors: Vec<ScriptError>) {
        for err in errors {
            self.report(&err);
        }
    }

    // ========================================================================
    // 事件與排程
    // ========================================================================

    /// 同步派送事件，處理器的錯誤顯示在畫面上
    pub fn dispatch(&mut self, event: &str, message: EventMessage) {
        let listeners = self.events.listeners(event);
        if listeners.is_empty() {
            return;
        }
        let errors = invoke_all(listeners, self, event, &message);
        self.report_all(errors);
    }

    /// 主程式的計時器呼叫：執行到期的 ticker、佇列排程，再處理佇列送出的命令
    pub fn tick(&mut self, now: Instant) {
        self.now = now;
        let due = self.tickers.due(now);
        if !due.is_empty() {
            let errors = run_due(due, self);
            self.report_all(errors);
        }
        if let Err(e) = self.queue.run(now) {
            self.report(&ScriptError::from(e));
        }
        self.drain_outbox();
    }

    /// 佇列送出的命令走一般輸入流程
    fn drain_outbox(&mut self) {
        loop {
            let next = self.outbox.borrow_mut().pop_front();
            let Some(command) = next else {
                break;
            };
            if let Err(e) = self.run_input(&command, 0) {
                self.report(&e);
            }
        }
    }

    // ========================================================================
    // 主程式要求
    // ========================================================================

    pub fn request(&mut self, request: HostRequest) {
        debug!("[{}] 主程式要求: {:?}", self.name, request);
        self.requests.push_back(request);
    }

    pub fn take_requests(&mut self) -> Vec<HostRequest> {
        self.requests.drain(..).collect()
    }

    // ========================================================================
    // 外掛
    // ========================================================================

    fn with_loader<T>(&mut self, f: impl FnOnce(&mut PluginLoader, &mut Self) -> T) -> Option<T> {
        let mut loader = self.loader.take()?;
        let result = f(&mut loader, self);
        self.loader = Some(loader);
        Some(result)
    }

    fn show_failures(&mut self, reports: &[LoadReport]) {
        for report in reports.iter().filter(|r| !r.is_ok()) {
            for err in &report.errors {
                self.show(&format!("[外掛錯誤] {}: {}", report.unit, err), Style::Error);
            }
        }
    }

    fn load_plugins(&mut self) {
        let reports = self
            .with_loader(|loader, session| loader.load_all(session))
            .unwrap_or_default();
        self.show_failures(&reports);
    }

    /// 重新載入有變動的外掛單元
    ///
    /// 在外掛自己的處理器中呼叫時，載入器正被使用，回傳空結果。
    pub fn reload_plugins(&mut self, only: Option<&str>) -> Vec<LoadReport> {
        let reports = self
            .with_loader(|loader, session| loader.reload(session, only))
            .unwrap_or_default();
        self.show_failures(&reports);
        reports
    }

    pub fn plugin_reports(&self) -> Vec<LoadReport> {
        self.loader.as_ref().map(PluginLoader::reports).unwrap_or_default()
    }

    pub fn plugin_loader(&self) -> Option<&PluginLoader> {
        self.loader.as_ref()
    }

    /// 取得已載入的外掛實例
    pub fn plugin<P: 'static>(&self, name: &str) -> Option<Rc<P>> {
        self.loader.as_ref()?.get::<P>(name)
    }

    /// 從每個引擎移除指定外掛的註冊
    pub fn unregister_owner(&mut self, owner: &PluginId) {
        let removed = self.events.unregister_owner(owner)
            + self.actions.unregister_owner(owner)
            + self.tickers.unregister_owner(owner)
            + self.commands.unregister_owner(owner);
        debug!("移除外掛 {} 的 {} 筆註冊", owner, removed);
    }

    /// 關閉 session：卸載外掛並寫入紀錄
    pub fn shutdown(&mut self) {
        self.with_loader(|loader, session| loader.unload_all(session));
        if let Err(e) = self.ringlog.commit() {
            warn!("輸出紀錄寫入失敗: {}", e);
        }
        self.disconnect();
    }
}
