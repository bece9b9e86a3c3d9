//! 多連線主機
//!
//! 依名稱保存所有 session（保留建立順序），玩家輸入送到目前的 session。
//! 命令透過 `HostRequest` 要求開新連線或切換，主機在每次輸入或排程後處理。

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::atlas::SharedAtlas;
use crate::config::SessionConfig;
use crate::plugin::PluginCatalog;
use crate::screen::ScreenSink;
use crate::session::{HostRequest, Session, SessionError};
use crate::telnet::{ConnectionState, NetMessage, TelnetClient};

/// 為新 session 建立畫面輸出端
pub type ScreenFactory = Box<dyn Fn(&str) -> Box<dyn ScreenSink>>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Session 名稱重複: {0}")]
    DuplicateSession(String),

    #[error("未知的 session: {0}")]
    UnknownSession(String),

    #[error("沒有可用的 session")]
    NoActiveSession,

    #[error("{0} 沒有設定主機位址")]
    MissingAddress(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// `#session` 列表的一筆
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub name: String,
    pub state: ConnectionState,
    pub active: bool,
}

/// 多連線主機
pub struct MultiSessionHost {
    sessions: HashMap<String, Session>,
    /// 建立順序
    order: Vec<String>,
    active: Option<String>,
    /// 設定檔中的連線設定
    profiles: Vec<SessionConfig>,
    atlas: SharedAtlas,
    catalog: Rc<PluginCatalog>,
    screens: ScreenFactory,
    net_tx: mpsc::UnboundedSender<NetMessage>,
    quit: bool,
}

impl MultiSessionHost {
    pub fn new(
        atlas: SharedAtlas,
        catalog: Rc<PluginCatalog>,
        profiles: Vec<SessionConfig>,
        screens: ScreenFactory,
        net_tx: mpsc::UnboundedSender<NetMessage>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            active: None,
            profiles,
            atlas,
            catalog,
            screens,
            net_tx,
            quit: false,
        }
    }

    /// 設定檔中同名的連線設定；沒有時使用預設值
    pub fn profile(&self, name: &str) -> SessionConfig {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .unwrap_or_else(|| SessionConfig::new(name))
    }

    /// 建立 session 並切換過去
    pub fn create_session(&mut self, config: SessionConfig) -> Result<&mut Session, HostError> {
        let name = config.name.clone();
        if self.sessions.contains_key(&name) {
            return Err(HostError::DuplicateSession(name));
        }
        let screen = (self.screens)(&name);
        let session = Session::new(config, Rc::clone(&self.atlas), Rc::clone(&self.catalog), screen)?;
        self.sessions.insert(name.clone(), session);
        self.order.push(name.clone());
        self.active = Some(name.clone());
        info!("新增 session {}（共 {} 個）", name, self.order.len());
        self.sessions
            .get_mut(&name)
            .ok_or(HostError::UnknownSession(name))
    }

    /// 關閉並移除 session
    pub fn close_session(&mut self, name: &str) -> bool {
        let Some(mut session) = self.sessions.remove(name) else {
            return false;
        };
        session.shutdown();
        self.order.retain(|n| n != name);
        if self.active.as_deref() == Some(name) {
            self.active = self.order.last().cloned();
        }
        true
    }

    pub fn switch(&mut self, name: &str) -> Result<(), HostError> {
        if !self.sessions.contains_key(name) {
            return Err(HostError::UnknownSession(name.to_string()));
        }
        debug!("切換到 session {}", name);
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn active(&self) -> Option<&Session> {
        self.sessions.get(self.active.as_deref()?)
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        self.sessions.get_mut(self.active.as_deref()?)
    }

    pub fn session(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    pub fn session_mut(&mut self, name: &str) -> Option<&mut Session> {
        self.sessions.get_mut(name)
    }

    /// 依建立順序列出
    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.order
            .iter()
            .filter_map(|name| self.sessions.get(name))
            .map(|s| SessionSummary {
                name: s.name().to_string(),
                state: s.state(),
                active: self.active.as_deref() == Some(s.name()),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 是否收到 `#quit`
    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// 玩家輸入一行，送到目前的 session
    pub fn input(&mut self, line: &str) -> Result<(), HostError> {
        let session = self.active_mut().ok_or(HostError::NoActiveSession)?;
        session.input(line);
        Ok(())
    }

    /// 依 session 名稱轉交連線任務的事件
    pub fn on_net_message(&mut self, message: NetMessage) {
        match self.sessions.get_mut(&message.session) {
            Some(session) => session.on_net_event(message.event),
            None => debug!("忽略已關閉 session {} 的事件", message.session),
        }
    }

    /// 所有 session 的排程
    pub fn tick(&mut self, now: Instant) {
        for name in &self.order {
            if let Some(session) = self.sessions.get_mut(name) {
                session.tick(now);
            }
        }
    }

    /// 處理各 session 提出的要求
    pub async fn process_requests(&mut self) {
        let mut pending = Vec::new();
        for name in &self.order {
            if let Some(session) = self.sessions.get_mut(name) {
                pending.extend(session.take_requests().into_iter().map(|r| (name.clone(), r)));
            }
        }
        for (origin, request) in pending {
            if let Err(e) = self.handle_request(&origin, request).await {
                if let Some(session) = self.sessions.get_mut(&origin) {
                    session.show(&format!("[主機] {}", e), crate::screen::Style::Error);
                }
            }
        }
    }

    async fn handle_request(&mut self, origin: &str, request: HostRequest) -> Result<(), HostError> {
        match request {
            HostRequest::Connect { name, host, port } => {
                let mut config = self.profile(&name);
                if let Some(host) = host {
                    config.host = host;
                }
                if let Some(port) = port {
                    config.port = port;
                }
                self.connect(config).await
            }
            HostRequest::Switch(name) => {
                self.switch(&name)?;
                if let Some(session) = self.active_mut() {
                    session.echo(&format!("切換到 {}", name));
                }
                Ok(())
            }
            HostRequest::List => {
                let lines: Vec<String> = self
                    .summaries()
                    .into_iter()
                    .map(|s| {
                        let mark = if s.active { "*" } else { " " };
                        format!("{} {:<16} {:?}", mark, s.name, s.state)
                    })
                    .collect();
                if let Some(session) = self.sessions.get_mut(origin) {
                    for line in lines {
                        session.echo(&line);
                    }
                }
                Ok(())
            }
            HostRequest::Quit => {
                info!("收到結束要求");
                self.quit = true;
                Ok(())
            }
        }
    }

    /// 建立（或沿用同名）session 並撥號；撥號失敗顯示在該 session 上
    pub async fn connect(&mut self, config: SessionConfig) -> Result<(), HostError> {
        let name = config.name.clone();
        if config.host.is_empty() {
            return Err(HostError::MissingAddress(name));
        }
        if self.sessions.contains_key(&name) {
            self.switch(&name)?;
        } else {
            self.create_session(config.clone())?;
        }
        let net_tx = self.net_tx.clone();
        let session = self
            .sessions
            .get_mut(&name)
            .ok_or_else(|| HostError::UnknownSession(name.clone()))?;
        session.disconnect();
        session.set_connecting();
        session.echo(&format!("連線到 {}:{} ...", config.host, config.port));

        let mut client = TelnetClient::new(config.telnet());
        match client.connect(&config.host, config.port).await {
            Ok(stream) => {
                let handle = client.spawn(name.as_str(), stream, net_tx);
                session.attach(handle);
            }
            Err(e) => session.connect_failed(&e),
        }
        Ok(())
    }

    /// 關閉所有 session
    pub fn shutdown(&mut self) {
        for name in &self.order {
            if let Some(session) = self.sessions.get_mut(name) {
                session.shutdown();
            }
        }
    }
}
