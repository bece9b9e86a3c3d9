//! Telnet 選項協商
//!
//! 每個支援的選項由一個 `OptionHandler` 負責；未登記的選項一律保守拒絕。

use std::collections::HashMap;

use tracing::{debug, trace};

use super::msdp::{self, MsdpValue, ProtocolError, MSDP};
use super::protocol::{generate_refusal, negotiate, subnegotiate, Negotiation, TelnetOption};

const TTYPE: u8 = 24;
const NAWS: u8 = 31;
const ECHO: u8 = 1;

const TTYPE_IS: u8 = 0;
const TTYPE_SEND: u8 = 1;

/// 協商處理後需要 session 執行的動作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionOutcome {
    /// 回覆給伺服器的原始位元組
    Reply(Vec<u8>),
    /// 一筆 MSDP 變數更新
    Msdp(String, MsdpValue),
    /// 伺服器要求關閉/開啟本地回顯
    PasswordMode(bool),
    /// 給除錯輸出的訊息
    Diagnostic(String),
}

/// 單一 telnet 選項的處理器
pub trait OptionHandler {
    fn option(&self) -> u8;

    fn on_negotiation(&mut self, verb: Negotiation) -> Vec<OptionOutcome>;

    fn on_subnegotiation(&mut self, _body: &[u8]) -> Result<Vec<OptionOutcome>, ProtocolError> {
        Err(ProtocolError::UnexpectedSubnegotiation(self.option()))
    }
}

/// MSDP：同意伺服器啟用，要求可回報變數清單後一次訂閱全部
#[derive(Debug, Default)]
pub struct MsdpHandler {
    reportable: Vec<String>,
}

impl MsdpHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 伺服器宣告可回報的變數
    pub fn reportable(&self) -> &[String] {
        &self.reportable
    }
}

impl OptionHandler for MsdpHandler {
    fn option(&self) -> u8 {
        MSDP
    }

    fn on_negotiation(&mut self, verb: Negotiation) -> Vec<OptionOutcome> {
        match verb {
            Negotiation::Will => vec![
                OptionOutcome::Reply(negotiate(Negotiation::Do, MSDP)),
                OptionOutcome::Reply(subnegotiate(
                    MSDP,
                    &msdp::list_request("REPORTABLE_VARIABLES"),
                )),
            ],
            other => generate_refusal(other, MSDP).into_reply(),
        }
    }

    fn on_subnegotiation(&mut self, body: &[u8]) -> Result<Vec<OptionOutcome>, ProtocolError> {
        let mut outcomes = Vec::new();
        for (name, value) in msdp::decode(body)? {
            if name == "REPORTABLE_VARIABLES" {
                self.reportable = match &value {
                    MsdpValue::Array(items) | MsdpValue::Values(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    MsdpValue::String(s) if !s.is_empty() => vec![s.clone()],
                    _ => Vec::new(),
                };
                debug!("MSDP 可回報變數: {} 個", self.reportable.len());
                if !self.reportable.is_empty() {
                    outcomes.push(OptionOutcome::Reply(subnegotiate(
                        MSDP,
                        &msdp::report_request(&self.reportable),
                    )));
                }
            }
            outcomes.push(OptionOutcome::Msdp(name, value));
        }
        Ok(outcomes)
    }
}

/// TTYPE：依序回報客戶端名稱、終端機類型、MTTS 旗標
#[derive(Debug)]
pub struct TtypeHandler {
    identities: [String; 3],
    next: usize,
}

impl TtypeHandler {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            identities: [
                client_name.into(),
                "XTERM-256COLOR".to_string(),
                "MTTS 2831".to_string(),
            ],
            next: 0,
        }
    }
}

impl OptionHandler for TtypeHandler {
    fn option(&self) -> u8 {
        TTYPE
    }

    fn on_negotiation(&mut self, verb: Negotiation) -> Vec<OptionOutcome> {
        match verb {
            Negotiation::Do => vec![OptionOutcome::Reply(negotiate(Negotiation::Will, TTYPE))],
            other => generate_refusal(other, TTYPE).into_reply(),
        }
    }

    fn on_subnegotiation(&mut self, body: &[u8]) -> Result<Vec<OptionOutcome>, ProtocolError> {
        if body.first() != Some(&TTYPE_SEND) {
            return Ok(vec![OptionOutcome::Diagnostic(format!(
                "忽略 TTYPE sub-negotiation: {:02X?}",
                body
            ))]);
        }
        let identity = &self.identities[self.next % self.identities.len()];
        self.next += 1;
        trace!("TTYPE IS {}", identity);
        let mut reply = vec![TTYPE_IS];
        reply.extend_from_slice(identity.as_bytes());
        Ok(vec![OptionOutcome::Reply(subnegotiate(TTYPE, &reply))])
    }
}

/// NAWS：不回報視窗大小
#[derive(Debug, Default)]
pub struct NawsHandler;

impl OptionHandler for NawsHandler {
    fn option(&self) -> u8 {
        NAWS
    }

    fn on_negotiation(&mut self, verb: Negotiation) -> Vec<OptionOutcome> {
        generate_refusal(verb, NAWS).into_reply()
    }
}

/// ECHO：伺服器接手回顯時進入密碼模式
#[derive(Debug, Default)]
pub struct EchoHandler;

impl OptionHandler for EchoHandler {
    fn option(&self) -> u8 {
        ECHO
    }

    fn on_negotiation(&mut self, verb: Negotiation) -> Vec<OptionOutcome> {
        match verb {
            Negotiation::Will => vec![
                OptionOutcome::Reply(negotiate(Negotiation::Do, ECHO)),
                OptionOutcome::PasswordMode(true),
            ],
            Negotiation::Wont => vec![
                OptionOutcome::Reply(negotiate(Negotiation::Dont, ECHO)),
                OptionOutcome::PasswordMode(false),
            ],
            other => generate_refusal(other, ECHO).into_reply(),
        }
    }
}

trait IntoReply {
    fn into_reply(self) -> Vec<OptionOutcome>;
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Vec<OptionOutcome> {
        if self.is_empty() {
            Vec::new()
        } else {
            vec![OptionOutcome::Reply(self)]
        }
    }
}

/// 以選項編號索引的處理器表
#[derive(Default)]
pub struct OptionTable {
    handlers: HashMap<u8, Box<dyn OptionHandler>>,
}

impl OptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安裝 MSDP、TTYPE、NAWS、ECHO 四個處理器
    pub fn standard(client_name: &str) -> Self {
        let mut table = Self::new();
        table.install(Box::new(MsdpHandler::new()));
        table.install(Box::new(TtypeHandler::new(client_name)));
        table.install(Box::new(NawsHandler));
        table.install(Box::new(EchoHandler));
        table
    }

    pub fn install(&mut self, handler: Box<dyn OptionHandler>) {
        self.handlers.insert(handler.option(), handler);
    }

    pub fn handles(&self, option: u8) -> bool {
        self.handlers.contains_key(&option)
    }

    pub fn negotiate(&mut self, verb: Negotiation, option: u8) -> Vec<OptionOutcome> {
        match self.handlers.get_mut(&option) {
            Some(handler) => handler.on_negotiation(verb),
            None => {
                debug!("拒絕選項 {:?} {:?}", verb, TelnetOption::from_byte(option));
                generate_refusal(verb, option).into_reply()
            }
        }
    }

    pub fn subnegotiate(
        &mut self,
        option: u8,
        body: &[u8],
    ) -> Result<Vec<OptionOutcome>, ProtocolError> {
        match self.handlers.get_mut(&option) {
            Some(handler) => handler.on_subnegotiation(body),
            None => Err(ProtocolError::UnexpectedSubnegotiation(option)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::msdp::{MSDP_ARRAY_CLOSE, MSDP_ARRAY_OPEN, MSDP_VAL, MSDP_VAR};

    fn replies(outcomes: &[OptionOutcome]) -> Vec<Vec<u8>> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                OptionOutcome::Reply(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_msdp_will_requests_list() {
        let mut table = OptionTable::standard("mudhost");
        let out = table.negotiate(Negotiation::Will, MSDP);
        let mut list = vec![0xFF, 0xFA, 0x45, 0x01];
        list.extend_from_slice(b"LIST");
        list.push(0x02);
        list.extend_from_slice(b"REPORTABLE_VARIABLES");
        list.extend_from_slice(&[0xFF, 0xF0]);
        assert_eq!(replies(&out), vec![vec![0xFF, 0xFD, 0x45], list]);
    }

    #[test]
    fn test_reportable_variables_triggers_report() {
        let mut handler = MsdpHandler::new();
        let mut body = vec![MSDP_VAR];
        body.extend_from_slice(b"REPORTABLE_VARIABLES");
        body.extend_from_slice(&[MSDP_VAL, MSDP_ARRAY_OPEN, MSDP_VAL]);
        body.extend_from_slice(b"HEALTH");
        body.push(MSDP_VAL);
        body.extend_from_slice(b"MANA");
        body.push(MSDP_ARRAY_CLOSE);
        let out = handler.on_subnegotiation(&body).unwrap();
        assert_eq!(handler.reportable(), &["HEALTH".to_string(), "MANA".to_string()]);
        let expected = subnegotiate(MSDP, &msdp::report_request(&["HEALTH", "MANA"]));
        assert_eq!(replies(&out), vec![expected]);
    }

    #[test]
    fn test_ttype_cycles_identities() {
        let mut table = OptionTable::standard("mudhost");
        assert_eq!(
            replies(&table.negotiate(Negotiation::Do, TTYPE)),
            vec![vec![0xFF, 0xFB, TTYPE]]
        );
        let names: Vec<Vec<u8>> = (0..4)
            .map(|_| replies(&table.subnegotiate(TTYPE, &[TTYPE_SEND]).unwrap()).remove(0))
            .collect();
        assert_eq!(names[0], subnegotiate(TTYPE, b"\x00mudhost"));
        assert_eq!(names[1], subnegotiate(TTYPE, b"\x00XTERM-256COLOR"));
        assert_eq!(names[2], subnegotiate(TTYPE, b"\x00MTTS 2831"));
        assert_eq!(names[3], names[0]);
    }

    #[test]
    fn test_naws_refused() {
        let mut table = OptionTable::standard("mudhost");
        assert_eq!(
            replies(&table.negotiate(Negotiation::Do, NAWS)),
            vec![vec![0xFF, 0xFC, NAWS]]
        );
    }

    #[test]
    fn test_echo_password_mode() {
        let mut table = OptionTable::standard("mudhost");
        let on = table.negotiate(Negotiation::Will, ECHO);
        assert!(on.contains(&OptionOutcome::PasswordMode(true)));
        let off = table.negotiate(Negotiation::Wont, ECHO);
        assert!(off.contains(&OptionOutcome::PasswordMode(false)));
    }

    #[test]
    fn test_unknown_option_refused() {
        let mut table = OptionTable::standard("mudhost");
        assert_eq!(
            replies(&table.negotiate(Negotiation::Will, 201)),
            vec![vec![0xFF, 0xFE, 201]]
        );
        assert!(table.negotiate(Negotiation::Wont, 201).is_empty());
    }

    #[test]
    fn test_unknown_subnegotiation_is_error() {
        let mut table = OptionTable::standard("mudhost");
        assert_eq!(
            table.subnegotiate(201, b"x"),
            Err(ProtocolError::UnexpectedSubnegotiation(201))
        );
    }
}
