//! 內建命令
//!
//! 核心命令與其他外掛走同一套註冊介面，因此也能被 `#reload` 重新載入。

use std::rc::Rc;
use std::time::Duration;

use chrono::{Local, TimeZone};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Plugin, PluginContext, PluginError, Registrar};
use crate::atlas::{PathOptions, Route};
use crate::command::CommandDef;
use crate::error::{CommandError, ScriptError};
use crate::event::EventMessage;
use crate::queue::Task;
use crate::ringlog::{now_ns, LogQuery};
use crate::session::{HostRequest, Session, MOVE_QUEUE};
use crate::signature::Args;
use crate::ticker::TickerHandler;

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CoreSettings {
    /// `#go` 每一步佔用的時間
    step_ms: u64,
    /// 依 MSDP 房間資訊自動更新地圖
    automap: bool,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            step_ms: 250,
            automap: true,
        }
    }
}

/// 內建命令外掛
pub struct CoreCommands {
    step: Duration,
    automap: bool,
}

fn text_of(args: &Args, name: &str) -> String {
    args.str(name).unwrap_or_default().to_string()
}

fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

impl CoreCommands {
    fn help(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let name = text_of(args, "name");
        let text = if name.is_empty() {
            s.commands.overview()
        } else {
            s.commands.help(&name)?
        };
        s.echo(&text);
        Ok(())
    }

    fn connect(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let name = args.require_str("name")?.to_string();
        let host = Some(text_of(args, "host")).filter(|h| !h.is_empty());
        let port = match args.int("port").unwrap_or(0) {
            0 => None,
            p => Some(u16::try_from(p).map_err(|_| {
                CommandError::new("無效的連接埠", format!("{} 不在 1-65535 之間", p))
            })?),
        };
        s.request(HostRequest::Connect { name, host, port });
        Ok(())
    }

    fn session(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let name = text_of(args, "name");
        if name.is_empty() {
            s.request(HostRequest::List);
        } else {
            s.request(HostRequest::Switch(name));
        }
        Ok(())
    }

    fn alias(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let key = text_of(args, "key");
        let text = text_of(args, "text");
        if key.is_empty() {
            let lines: Vec<String> = s
                .aliases
                .list()
                .into_iter()
                .map(|a| {
                    let mark = if a.temporary { " (暫時)" } else { "" };
                    format!("{:<20} {}{}", a.key(), a.expansion, mark)
                })
                .collect();
            s.echo(&format!("別名（{} 個）:", lines.len()));
            for line in lines {
                s.echo(&line);
            }
            return Ok(());
        }
        if args.flag("delete") {
            let removed = s.aliases.remove(&key)?;
            s.echo(&format!("已刪除別名 {}", removed.key()));
            return Ok(());
        }
        if !text.is_empty() {
            s.aliases.add(&key, &text, args.flag("temporary"))?;
            s.echo(&format!("已新增別名 {} = {}", key, text));
            return Ok(());
        }
        if args.flag("add") {
            return Err(CommandError::new("無效的別名", "缺少展開內容").into());
        }
        let shown = match s.aliases.get(&key) {
            Some(alias) => format!("{} = {}", alias.key(), alias.expansion),
            None => return Err(CommandError::new("無效的別名", format!("找不到 {}", key)).into()),
        };
        s.echo(&shown);
        Ok(())
    }

    fn action(&self, s: &mut Session, _args: &Args) -> Result<(), ScriptError> {
        let actions = s.actions.list();
        s.echo(&format!("Action（{} 個）:", actions.len()));
        for a in actions {
            let owner = a.owner.map(|o| o.to_string()).unwrap_or_else(|| "-".into());
            s.echo(&format!("{:>4} {:<16} {:<12} {}", a.priority, a.name, owner, a.pattern));
        }
        Ok(())
    }

    fn ticker(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let name = text_of(args, "name");
        if name.is_empty() {
            let tickers = s.tickers.list();
            s.echo(&format!("Ticker（{} 個）:", tickers.len()));
            for t in tickers {
                let repeats = if t.remaining < 0 {
                    "∞".to_string()
                } else {
                    t.remaining.to_string()
                };
                s.echo(&format!("{:<16} 每 {:.2} 秒，剩餘 {}", t.name, t.interval.as_secs_f64(), repeats));
            }
            return Ok(());
        }
        if args.flag("delete") {
            if !s.tickers.remove(&name) {
                return Err(CommandError::new("未知的 ticker", name).into());
            }
            s.echo(&format!("已刪除 ticker {}", name));
            return Ok(());
        }
        let commands = text_of(args, "_commands");
        let interval = args.float("_seconds").unwrap_or(0.0);
        if commands.is_empty() || interval <= 0.0 {
            let shown = match s.tickers.get(&name) {
                Some(t) => format!("{}: 每 {:.2} 秒，剩餘 {}", t.name, t.interval.as_secs_f64(), t.remaining),
                None => return Err(CommandError::new("未知的 ticker", name).into()),
            };
            s.echo(&shown);
            return Ok(());
        }
        let repeats = args.int("_repeats").unwrap_or(-1);
        let handler: TickerHandler<Session> = Rc::new(move |s: &mut Session| s.execute(&commands));
        let now = s.now();
        s.tickers.add(name.as_str(), seconds(interval), repeats, None, handler, now);
        s.echo(&format!("已新增 ticker {}", name));
        Ok(())
    }

    fn queue(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let qname = text_of(args, "qname");
        let text = text_of(args, "text");
        if args.flag("flush") {
            let dropped = s.queue.flush(&qname);
            s.echo(&format!("已清除 {} 個 task", dropped));
            return Ok(());
        }
        if qname.is_empty() {
            let queues = s.queue.queues();
            for q in queues {
                s.echo(&format!("{:<12} 優先 {:>3}，等待 {}", q.name, q.priority, q.pending));
            }
            return Ok(());
        }
        if text.is_empty() {
            let pending: Vec<String> = s
                .queue
                .pending()
                .iter()
                .filter(|t| t.queue == qname)
                .map(|t| format!("#{} {}", t.id, t.command))
                .collect();
            s.echo(&format!("{}: {} 個 task", qname, pending.len()));
            for line in pending {
                s.echo(&line);
            }
            return Ok(());
        }
        let task = Task::new(text)
            .queue(qname)
            .priority(args.int("_priority").unwrap_or(0) as i32)
            .duration(seconds(args.float("_duration").unwrap_or(0.0)))
            .delay(seconds(args.float("_delay").unwrap_or(0.0)));
        let now = s.now();
        s.queue.add(task, now);
        Ok(())
    }

    fn log(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let pattern = text_of(args, "pattern");
        let limit = args.int("_limit").unwrap_or(50).max(1) as usize;
        let mut query = LogQuery::new(pattern).limit(limit);
        let minutes = args.float("_minutes_ago").unwrap_or(0.0);
        if minutes > 0.0 {
            query = query.since(now_ns() - (minutes * 60.0 * 1e9) as i64);
        }
        let entries = s.ringlog.query(&query)?;
        s.echo(&format!("符合 {} 筆:", entries.len()));
        for entry in entries {
            let when = Local.timestamp_nanos(entry.epoch_ns).format("%H:%M:%S");
            s.echo(&format!("{} [{}] {}", when, entry.context, entry.stripped));
        }
        Ok(())
    }

    fn plugins(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let name = text_of(args, "name");
        if name.is_empty() {
            let infos = s.plugin_loader().map(|l| l.plugins()).unwrap_or_default();
            let reports = s.plugin_reports();
            s.echo(&format!("外掛（{} 個）:", infos.len()));
            for info in infos {
                s.echo(&format!("{:<20} {}", info.id, info.unit));
            }
            for report in reports.iter().filter(|r| !r.is_ok()) {
                for err in &report.errors {
                    s.show(&format!("{}: {}", report.unit, err), crate::screen::Style::Error);
                }
            }
            return Ok(());
        }
        if !s.plugin_loader().is_some_and(|l| l.is_loaded(&name)) {
            return Err(PluginError::UnknownPlugin(name).into());
        }
        let owned = |o: &Option<super::PluginId>| o.as_ref().is_some_and(|id| id.as_str() == name);
        let mut lines = Vec::new();
        lines.extend(
            s.commands
                .list()
                .into_iter()
                .filter(|c| owned(&c.owner))
                .map(|c| format!("命令   {}", c.name)),
        );
        lines.extend(
            s.actions
                .list()
                .into_iter()
                .filter(|a| owned(&a.owner))
                .map(|a| format!("action {} {}", a.name, a.pattern)),
        );
        lines.extend(
            s.tickers
                .list()
                .into_iter()
                .filter(|t| owned(&t.owner))
                .map(|t| format!("ticker {}", t.name)),
        );
        lines.extend(
            s.events
                .subscriptions()
                .into_iter()
                .filter(|e| owned(&e.owner))
                .map(|e| format!("事件   {}", e.event)),
        );
        s.echo(&format!("{}:", name));
        for line in lines {
            s.echo(&line);
        }
        Ok(())
    }

    fn reload(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let name = text_of(args, "name");
        let only = Some(name.as_str()).filter(|n| !n.is_empty());
        let reports = s.reload_plugins(only);
        if reports.is_empty() {
            s.echo("沒有需要重新載入的外掛");
        }
        for report in reports {
            s.echo(&format!("{}: {}", report.unit, report.plugins.join(", ")));
        }
        Ok(())
    }

    fn repeat(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let count = args.require_int("count")?;
        let text = args.require_str("text")?.to_string();
        for _ in 0..count.max(0) {
            s.execute(&text)?;
        }
        Ok(())
    }

    fn route(&self, s: &Session, to: &str, from: &str) -> Result<Route, ScriptError> {
        let from = if from.is_empty() {
            s.variables.state().room_vnum.clone()
        } else {
            from.to_string()
        };
        let atlas = s.atlas.borrow();
        if atlas.room(to).is_none() {
            return Err(CommandError::new("未知房間", format!("找不到 vnum {}", to)).into());
        }
        let route = atlas.get_path(&from, to, &s.traveler, &PathOptions::default());
        if route.is_empty() {
            return Err(CommandError::new("找不到路徑", format!("{} → {}", from, to)).into());
        }
        Ok(route)
    }

    fn path(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let to = args.require_str("to")?;
        let route = self.route(s, to, args.str("_from").unwrap_or_default())?;
        s.echo(&format!("{}（{} 步，花費 {}）", route.simplified(), route.len(), route.total_cost));
        Ok(())
    }

    fn go(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let to = args.require_str("to")?;
        let route = self.route(s, to, "")?;
        let tasks: Vec<Task> = route
            .commands()
            .into_iter()
            .map(|c| Task::new(c).queue(MOVE_QUEUE).duration(self.step))
            .collect();
        debug!("前往 {}：{} 個移動", to, tasks.len());
        let now = s.now();
        s.queue.add_chain(tasks, now);
        Ok(())
    }

    fn room(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let vnum = match args.str("vnum").filter(|v| !v.is_empty()) {
            Some(v) => v.to_string(),
            None => s.variables.state().room_vnum.clone(),
        };
        let lines = {
            let atlas = s.atlas.borrow();
            let room = atlas
                .room(&vnum)
                .ok_or_else(|| CommandError::new("未知房間", format!("找不到 vnum {}", vnum)))?;
            let mut lines = vec![
                format!("[{}] {}", room.vnum, room.name),
                format!("區域: {}  地形: {}", room.area, room.terrain),
            ];
            let flags = room.flags.names();
            if !flags.is_empty() {
                lines.push(format!("旗標: {}", flags.join(" ")));
            }
            if let Some(at) = room.last_visited {
                lines.push(format!("上次造訪: {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M")));
            }
            for exit in room.exits.values() {
                let mut line = format!("  {:<10} → {}", exit.direction, exit.to_vnum);
                if let Some(door) = &exit.door {
                    line.push_str(&format!(" (門: {}{})", door, if exit.locks { "，上鎖" } else { "" }));
                }
                lines.push(line);
            }
            lines
        };
        for line in lines {
            s.echo(&line);
        }
        Ok(())
    }

    fn msdp(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let name = text_of(args, "name");
        let lines: Vec<String> = if name.is_empty() {
            s.variables
                .names()
                .into_iter()
                .map(|n| match s.variables.raw(n) {
                    Some(v) => format!("{:<20} {}", n, v),
                    None => n.to_string(),
                })
                .collect()
        } else {
            let upper = name.to_ascii_uppercase();
            match s.variables.raw(&upper) {
                Some(v) => vec![format!("{} = {}", upper, v)],
                None => return Err(CommandError::new("未知變數", upper).into()),
            }
        };
        for line in lines {
            s.echo(&line);
        }
        Ok(())
    }

    /// 依 MSDP 目前的房間資訊更新地圖
    fn map_room(&self, s: &mut Session) -> Result<(), ScriptError> {
        if !self.automap {
            return Ok(());
        }
        let state = s.variables.state().clone();
        if state.room_vnum.is_empty() {
            return Ok(());
        }
        s.atlas.borrow_mut().visit(
            &state.room_vnum,
            &state.room_name,
            &state.area_name,
            &state.room_terrain,
            &state.room_exits,
        )?;
        s.dispatch("room", EventMessage::Text(state.room_vnum));
        Ok(())
    }

    fn keepalive(&self, s: &mut Session) -> Result<(), ScriptError> {
        if s.is_connected() && s.idle_for() >= s.config().keepalive_idle() {
            debug!("閒置過久，送出空行");
            s.send("").map_err(|e| ScriptError::msg(e.to_string()))?;
        }
        Ok(())
    }
}

impl Plugin for CoreCommands {
    const NAME: &'static str = "CoreCommands";

    fn create(ctx: &PluginContext) -> Result<Self, PluginError> {
        let settings: CoreSettings = ctx.settings().map_err(|e| {
            warn!("CoreCommands 設定錯誤: {}", e);
            PluginError::instantiation(Self::NAME, e)
        })?;
        Ok(Self {
            step: Duration::from_millis(settings.step_ms),
            automap: settings.automap,
        })
    }

    fn register(reg: &mut Registrar<'_, Self>) {
        reg.command(
            CommandDef::new("help", "name: str = \"\"").help("顯示命令說明\n不帶名稱時列出所有命令。"),
            Self::help,
        );
        reg.command(
            CommandDef::new("connect", "name: str, host: str = \"\", port: int = 0")
                .help("開啟新的連線\n只給名稱時使用設定檔中的同名設定。"),
            Self::connect,
        );
        reg.command(
            CommandDef::new("session", "name: str = \"\"").help("列出或切換連線"),
            Self::session,
        );
        reg.command(
            CommandDef::new(
                "alias",
                "key: str = \"\", text: str = \"\", add: bool, delete: bool, temporary: bool",
            )
            .help("管理別名\n名稱格式為 分類.名稱，展開內容可用 %1..%9 與 %*。"),
            Self::alias,
        );
        reg.command(CommandDef::new("action", "").help("列出 action"), Self::action);
        reg.command(
            CommandDef::new(
                "ticker",
                "name: str = \"\", _commands: str = \"\", _seconds: float = 0, _repeats: int = -1, delete: bool",
            )
            .help("管理 ticker\n--seconds 為間隔，--repeats 為負數表示不限次數。"),
            Self::ticker,
        );
        reg.command(
            CommandDef::new(
                "queue",
                "qname: str = \"\", text: str = \"\", flush: bool, _priority: int = 0, _duration: float = 0, _delay: float = 0",
            )
            .help("排入或檢視佇列中的命令\n--duration 是命令佔用的秒數，--delay 是最早送出前的等待秒數。"),
            Self::queue,
        );
        reg.command(CommandDef::new("echo", "text").help("顯示文字（不觸發 action）"), Self::echo);
        reg.command(
            CommandDef::new("showme", "text").help("把文字當成伺服器輸出（會觸發 action）"),
            Self::showme,
        );
        reg.command(
            CommandDef::new("log", "pattern: str = \"*\", _limit: int = 50, _minutes_ago: float = 0")
                .help("搜尋輸出紀錄\n樣式支援 * 與 ?。"),
            Self::log,
        );
        reg.command(
            CommandDef::new("plugins", "name: str = \"\"").help("列出外掛或單一外掛的註冊"),
            Self::plugins,
        );
        reg.command(
            CommandDef::new("reload", "name: str = \"\"").help("重新載入有變動的外掛"),
            Self::reload,
        );
        reg.command(
            CommandDef::new("repeat", "count: int, text").help("重複執行命令\n#3 kill orc 等同 #repeat 3 kill orc。"),
            Self::repeat,
        );
        reg.command(
            CommandDef::new("path", "to: str, _from: str = \"\"").help("顯示到指定房間的路徑"),
            Self::path,
        );
        reg.command(
            CommandDef::new("go", "to: str").help("走到指定房間\n移動命令排入 move 佇列。"),
            Self::go,
        );
        reg.command(
            CommandDef::new("room", "vnum: str = \"\"").help("顯示房間資料"),
            Self::room,
        );
        reg.command(
            CommandDef::new("msdp", "name: str = \"\"").help("顯示 MSDP 變數"),
            Self::msdp,
        );
        reg.command(CommandDef::new("disconnect", "").help("中斷目前連線"), |_, s, _| {
            s.disconnect();
            Ok(())
        });
        reg.command(CommandDef::new("quit", "").help("結束程式"), |_, s, _| {
            s.request(HostRequest::Quit);
            Ok(())
        });

        reg.event("msdp.ROOM", 0, |p, s, _| p.map_room(s));
        reg.event("msdp.ROOM_VNUM", 0, |p, s, _| p.map_room(s));

        let interval = reg.session().config().keepalive_interval();
        reg.ticker("keepalive", interval, -1, Self::keepalive);
    }
}

impl CoreCommands {
    fn echo(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let text = args.require_str("text")?.to_string();
        s.echo(&text);
        Ok(())
    }

    fn showme(&self, s: &mut Session, args: &Args) -> Result<(), ScriptError> {
        let text = args.require_str("text")?.to_string();
        s.showme(&text);
        Ok(())
    }
}
