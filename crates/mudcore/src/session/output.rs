//! 伺服器輸出流程：位元組 → 分幀 → 協商 / 輸出行 → 紀錄、action、畫面

use tracing::{debug, trace, warn};

use super::Session;
use crate::action::run_matches;
use crate::event::EventMessage;
use crate::line::OutputLine;
use crate::screen::Style;
use crate::telnet::{hex_dump, CodecEvent, NetEvent, OptionOutcome};

impl Session {
    /// 連線任務回報的事件
    pub fn on_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Data(bytes) => self.feed(&bytes),
            NetEvent::Idle => {
                if let Some(event) = self.codec.flush_prompt() {
                    self.handle_codec_event(event);
                }
            }
            NetEvent::Closed => self.connection_lost("伺服器關閉連線"),
            NetEvent::Error(reason) => self.connection_lost(&reason),
        }
    }

    /// 餵入從 socket 讀到的位元組
    pub fn feed(&mut self, bytes: &[u8]) {
        trace!("READ_RAW\n{}", hex_dump(bytes));
        for event in self.codec.feed(bytes) {
            self.handle_codec_event(event);
        }
    }

    fn handle_codec_event(&mut self, event: CodecEvent) {
        match event {
            CodecEvent::Line(bytes) => {
                let text = self.charset.decode(&bytes);
                let seq = self.next_seq();
                self.process_line(OutputLine::new(seq, text));
            }
            CodecEvent::Prompt(bytes) => {
                let text = self.charset.decode(&bytes);
                let seq = self.next_seq();
                self.process_line(OutputLine::prompt(seq, text.clone()));
                self.dispatch("prompt", EventMessage::Text(text));
            }
            CodecEvent::Negotiation(verb, option) => {
                let outcomes = self.options.negotiate(verb, option);
                self.apply_outcomes(outcomes);
            }
            CodecEvent::Subnegotiation(option, body) => {
                match self.options.subnegotiate(option, &body) {
                    Ok(outcomes) => self.apply_outcomes(outcomes),
                    Err(e) => {
                        warn!("[{}] 捨棄 sub-negotiation: {}", self.name, e);
                        self.dispatch("protocol_error", EventMessage::Text(e.to_string()));
                    }
                }
            }
            CodecEvent::UnknownIac(byte) => {
                debug!("[{}] 忽略 IAC {:#04x}", self.name, byte);
            }
        }
    }

    fn apply_outcomes(&mut self, outcomes: Vec<OptionOutcome>) {
        for outcome in outcomes {
            match outcome {
                OptionOutcome::Reply(bytes) => {
                    if let Err(e) = self.write_raw(bytes) {
                        debug!("[{}] 協商回覆未送出: {}", self.name, e);
                    }
                }
                OptionOutcome::Msdp(variable, value) => {
                    self.variables.update(&variable, &value);
                    let message = EventMessage::Msdp {
                        variable: variable.clone(),
                        value,
                    };
                    self.dispatch("msdp", message.clone());
                    self.dispatch(&format!("msdp.{}", variable), message);
                }
                OptionOutcome::PasswordMode(on) => {
                    self.password_mode = on;
                    self.dispatch("password_mode", EventMessage::Flag(on));
                }
                OptionOutcome::Diagnostic(text) => debug!("[{}] {}", self.name, text),
            }
        }
    }

    /// 一行伺服器輸出：寫入紀錄，跑 action，沒被 gag 才顯示
    pub(crate) fn process_line(&mut self, mut line: OutputLine) {
        if line.loggable {
            if let Err(e) = self.ringlog.append(&self.name, &line.raw, &line.stripped) {
                warn!("輸出紀錄寫入失敗: {}", e);
            }
        }
        let matches = self.actions.matches(&line);
        if !matches.is_empty() {
            let errors = run_matches(matches, self, &mut line);
            for err in errors {
                self.report(&err);
            }
        }
        if !line.gag {
            self.show(&line.raw, Style::Normal);
        }
    }

    /// 把文字當成伺服器輸出處理（會觸發 action）
    pub fn showme(&mut self, text: &str) {
        for part in text.split('\n') {
            let seq = self.next_seq();
            self.process_line(OutputLine::new(seq, part.trim_end_matches('\r')));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::action::ActionDef;
    use crate::atlas::Atlas;
    use crate::config::SessionConfig;
    use crate::plugin::PluginCatalog;
    use crate::ringlog::LogQuery;
    use crate::screen::SharedScreen;
    use crate::telnet::ConnectionState;

    fn connected() -> (Session, SharedScreen, mpsc::UnboundedReceiver<Vec<u8>>) {
        let screen = SharedScreen::new(100);
        let mut config = SessionConfig::new("test");
        config.core_plugins = Vec::new();
        let mut session = Session::new(
            config,
            Atlas::in_memory().shared(),
            Rc::new(PluginCatalog::new()),
            Box::new(screen.clone()),
        )
        .unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        session.attach_writer(tx);
        (session, screen, rx)
    }

    fn written(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            out.extend(chunk);
        }
        out
    }

    #[test]
    fn test_lines_reach_screen_and_log() {
        let (mut session, screen, _rx) = connected();
        session.feed(b"Hello\r\nWorld\r\n");
        assert_eq!(screen.texts(), vec!["Hello", "World"]);
        let found = session.ringlog.query(&LogQuery::new("Wor*")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].context, "test");
    }

    #[test]
    fn test_gagged_line_is_hidden() {
        let (mut session, screen, _rx) = connected();
        session
            .actions
            .add(
                ActionDef::new("gag", "^spam"),
                None,
                Rc::new(|_s: &mut Session, line: &mut OutputLine, _a: &crate::signature::Args| {
                    line.gag = true;
                    Ok(())
                }),
            )
            .unwrap();
        session.feed(b"spam spam\nham\n");
        assert_eq!(screen.texts(), vec!["ham"]);
    }

    #[test]
    fn test_idle_flushes_prompt() {
        let (mut session, screen, _rx) = connected();
        let prompts = Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen = Rc::clone(&prompts);
        session.events.subscribe(
            "prompt",
            0,
            None,
            Rc::new(move |_s: &mut Session, m: &EventMessage| {
                seen.borrow_mut().push(m.text().unwrap_or_default().to_string());
                Ok(())
            }),
        );
        session.feed(b"HP:100> ");
        assert!(screen.texts().is_empty());
        session.on_net_event(NetEvent::Idle);
        assert_eq!(screen.texts(), vec!["HP:100> "]);
        assert_eq!(*prompts.borrow(), vec!["HP:100> "]);
    }

    #[test]
    fn test_unknown_option_is_refused() {
        let (mut session, _screen, mut rx) = connected();
        // IAC DO 99
        session.feed(&[255, 253, 99]);
        assert_eq!(written(&mut rx), vec![255, 252, 99]);
    }

    #[test]
    fn test_echo_toggles_password_mode() {
        let (mut session, screen, _rx) = connected();
        session.feed(&[255, 251, 1]);
        assert!(session.password_mode());
        session.input("secret");
        assert!(screen.texts().is_empty());
        session.feed(&[255, 252, 1]);
        assert!(!session.password_mode());
    }

    #[test]
    fn test_closed_marks_lost() {
        let (mut session, screen, _rx) = connected();
        session.on_net_event(NetEvent::Closed);
        assert_eq!(session.state(), ConnectionState::Lost);
        assert_eq!(screen.0.borrow().lines().last().map(|l| l.style), Some(Style::Error));
    }

    #[test]
    fn test_showme_runs_actions() {
        let (mut session, screen, _rx) = connected();
        session
            .actions
            .add(
                ActionDef::new("hp", "^HP: (\\d+)").signature("hp: int"),
                None,
                Rc::new(|s: &mut Session, _l: &mut OutputLine, a: &crate::signature::Args| {
                    let hp = a.int("hp").unwrap_or(0);
                    s.echo(&format!("got {}", hp));
                    Ok(())
                }),
            )
            .unwrap();
        session.showme("HP: 42");
        assert_eq!(screen.texts(), vec!["got 42", "HP: 42"]);
    }
}
