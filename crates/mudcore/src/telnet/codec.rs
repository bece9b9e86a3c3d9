//! Telnet 位元組流分幀
//!
//! 逐位元組的狀態機，將伺服器送來的原始位元組切成行、提示字元、
//! 選項協商與 sub-negotiation 事件。

use bytes::{Bytes, BytesMut};

use super::protocol::{Negotiation, TelnetCommand, IAC};

const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// 分幀後的輸入事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecEvent {
    /// 以 LF 結尾的一行（不含 CR/LF）
    Line(Bytes),
    /// IAC GA 或閒置判定的提示字元，內容為目前累積的緩衝區
    Prompt(Bytes),
    /// WILL / WONT / DO / DONT
    Negotiation(Negotiation, u8),
    /// `IAC SB <option> ... IAC SE`
    Subnegotiation(u8, Vec<u8>),
    /// 無法辨識的 IAC 命令
    UnknownIac(u8),
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Normal,
    GotIac,
    GotVerb(Negotiation),
    GotSb,
    SbBody {
        option: u8,
        buf: Vec<u8>,
    },
    SbIac {
        option: u8,
        buf: Vec<u8>,
    },
}

/// Telnet 分幀器
///
/// 跨多次 `feed` 呼叫保留狀態，因此 IAC 序列被拆成兩個封包時也能正確處理。
#[derive(Debug, Default)]
pub struct ByteCodec {
    state: State,
    line: BytesMut,
}

impl ByteCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// 目前是否有尚未成行的位元組
    pub fn has_pending(&self) -> bool {
        !self.line.is_empty()
    }

    /// 餵入一段位元組，回傳分幀出的事件（依到達順序）
    pub fn feed(&mut self, input: &[u8]) -> Vec<CodecEvent> {
        let mut events = Vec::new();
        for &b in input {
            self.feed_byte(b, &mut events);
        }
        events
    }

    /// 閒置逾時：伺服器沒送 GA 但已停止傳送，將緩衝區視為提示字元
    pub fn flush_prompt(&mut self) -> Option<CodecEvent> {
        if matches!(self.state, State::Normal) && self.has_pending() {
            Some(CodecEvent::Prompt(self.take_line()))
        } else {
            None
        }
    }

    fn take_line(&mut self) -> Bytes {
        let mut line = self.line.split();
        if line.last() == Some(&CR) {
            line.truncate(line.len() - 1);
        }
        if line.first() == Some(&CR) {
            let _ = line.split_to(1);
        }
        line.freeze()
    }

    fn flush_line(&mut self, events: &mut Vec<CodecEvent>) {
        if self.has_pending() {
            let line = self.take_line();
            events.push(CodecEvent::Line(line));
        }
    }

    fn feed_byte(&mut self, b: u8, events: &mut Vec<CodecEvent>) {
        let state = std::mem::take(&mut self.state);
        self.state = match state {
            State::Normal => match b {
                IAC => State::GotIac,
                LF => {
                    let line = self.take_line();
                    events.push(CodecEvent::Line(line));
                    State::Normal
                }
                _ => {
                    self.line.extend_from_slice(&[b]);
                    State::Normal
                }
            },
            State::GotIac => {
                if b == IAC {
                    // IAC IAC 為轉義的 0xFF 資料位元組
                    self.line.extend_from_slice(&[IAC]);
                    return;
                }
                if b == TelnetCommand::GoAhead as u8 {
                    let prompt = self.take_line();
                    events.push(CodecEvent::Prompt(prompt));
                    return;
                }
                self.flush_line(events);
                if let Some(verb) = Negotiation::from_byte(b) {
                    State::GotVerb(verb)
                } else if b == TelnetCommand::Sb as u8 {
                    State::GotSb
                } else {
                    events.push(CodecEvent::UnknownIac(b));
                    State::Normal
                }
            }
            State::GotVerb(verb) => {
                events.push(CodecEvent::Negotiation(verb, b));
                State::Normal
            }
            State::GotSb => State::SbBody {
                option: b,
                buf: Vec::new(),
            },
            State::SbBody { option, mut buf } => {
                if b == IAC {
                    State::SbIac { option, buf }
                } else {
                    buf.push(b);
                    State::SbBody { option, buf }
                }
            }
            State::SbIac { option, mut buf } => {
                if b == TelnetCommand::Se as u8 {
                    events.push(CodecEvent::Subnegotiation(option, buf));
                    State::Normal
                } else if b == IAC {
                    buf.push(IAC);
                    State::SbBody { option, buf }
                } else {
                    buf.push(IAC);
                    buf.push(b);
                    State::SbBody { option, buf }
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(events: &[CodecEvent]) -> Vec<Vec<u8>> {
        events
            .iter()
            .filter_map(|e| match e {
                CodecEvent::Line(l) => Some(l.to_vec()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_lines() {
        let mut codec = ByteCodec::new();
        let events = codec.feed(b"Hello\r\nWorld\n");
        assert_eq!(lines(&events), vec![b"Hello".to_vec(), b"World".to_vec()]);
        assert!(!codec.has_pending());
    }

    #[test]
    fn test_partial_line_is_kept() {
        let mut codec = ByteCodec::new();
        assert!(codec.feed(b"Hel").is_empty());
        let events = codec.feed(b"lo\n");
        assert_eq!(lines(&events), vec![b"Hello".to_vec()]);
    }

    #[test]
    fn test_will_msdp() {
        let mut codec = ByteCodec::new();
        let events = codec.feed(&[0xFF, 0xFB, 0x45]);
        assert_eq!(events, vec![CodecEvent::Negotiation(Negotiation::Will, 69)]);
    }

    #[test]
    fn test_negotiation_split_across_calls() {
        let mut codec = ByteCodec::new();
        assert!(codec.feed(&[0xFF]).is_empty());
        assert!(codec.feed(&[0xFD]).is_empty());
        let events = codec.feed(&[24]);
        assert_eq!(events, vec![CodecEvent::Negotiation(Negotiation::Do, 24)]);
    }

    #[test]
    fn test_go_ahead_emits_prompt() {
        let mut codec = ByteCodec::new();
        let events = codec.feed(b"HP:100> \xFF\xF9");
        assert_eq!(events, vec![CodecEvent::Prompt(Bytes::from_static(b"HP:100> "))]);
    }

    #[test]
    fn test_iac_flushes_pending_line() {
        let mut codec = ByteCodec::new();
        let events = codec.feed(b"abc\xFF\xFB\x01def\n");
        assert_eq!(
            events,
            vec![
                CodecEvent::Line(Bytes::from_static(b"abc")),
                CodecEvent::Negotiation(Negotiation::Will, 1),
                CodecEvent::Line(Bytes::from_static(b"def")),
            ]
        );
    }

    #[test]
    fn test_subnegotiation() {
        let mut codec = ByteCodec::new();
        let mut input = vec![0xFF, 0xFA, 69, 1];
        input.extend_from_slice(b"HEALTH");
        input.push(2);
        input.extend_from_slice(b"85");
        input.extend_from_slice(&[0xFF, 0xF0]);
        let events = codec.feed(&input);
        let mut body = vec![1];
        body.extend_from_slice(b"HEALTH");
        body.push(2);
        body.extend_from_slice(b"85");
        assert_eq!(events, vec![CodecEvent::Subnegotiation(69, body)]);
    }

    #[test]
    fn test_escaped_iac_inside_subnegotiation() {
        let mut codec = ByteCodec::new();
        let events = codec.feed(&[0xFF, 0xFA, 24, 0xFF, 0xFF, 7, 0xFF, 0xF0]);
        assert_eq!(events, vec![CodecEvent::Subnegotiation(24, vec![0xFF, 7])]);
    }

    #[test]
    fn test_unknown_iac() {
        let mut codec = ByteCodec::new();
        let events = codec.feed(&[0xFF, 0xF1]);
        assert_eq!(events, vec![CodecEvent::UnknownIac(0xF1)]);
    }

    #[test]
    fn test_escaped_iac_is_data() {
        let mut codec = ByteCodec::new();
        let events = codec.feed(&[b'A', 0xFF, 0xFF, b'B', b'\n']);
        assert_eq!(lines(&events), vec![vec![b'A', 0xFF, b'B']]);
    }

    #[test]
    fn test_flush_prompt_on_idle() {
        let mut codec = ByteCodec::new();
        codec.feed(b"Name: ");
        assert_eq!(
            codec.flush_prompt(),
            Some(CodecEvent::Prompt(Bytes::from_static(b"Name: ")))
        );
        assert_eq!(codec.flush_prompt(), None);
    }

    #[test]
    fn test_lossless_on_plain_bytes() {
        let mut codec = ByteCodec::new();
        let input = b"one\ntwo\xFF\xFD\x1fthree\nfour\n";
        let events = codec.feed(input);
        let joined: Vec<u8> = lines(&events).concat();
        assert_eq!(joined, b"onetwothreefour".to_vec());
        for line in lines(&events) {
            assert!(!line.contains(&IAC));
        }
    }
}
