//! Telnet 協定常數
//!
//! 實作 RFC 854 Telnet 協定的基本命令與 MUD 常用選項

/// Telnet IAC (Interpret As Command) - 0xFF
pub const IAC: u8 = 255;

/// Telnet 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// Sub-negotiation End
    Se = 240,
    /// No Operation
    Nop = 241,
    /// Data Mark
    DataMark = 242,
    /// Break
    Break = 243,
    /// Interrupt Process
    InterruptProcess = 244,
    /// Abort Output
    AbortOutput = 245,
    /// Are You There
    AreYouThere = 246,
    /// Erase Character
    EraseCharacter = 247,
    /// Erase Line
    EraseLine = 248,
    /// Go Ahead
    GoAhead = 249,
    /// Sub-negotiation Begin
    Sb = 250,
    /// Will
    Will = 251,
    /// Won't
    Wont = 252,
    /// Do
    Do = 253,
    /// Don't
    Dont = 254,
}

impl TelnetCommand {
    /// 從位元組解析 Telnet 命令
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            240 => Some(Self::Se),
            241 => Some(Self::Nop),
            242 => Some(Self::DataMark),
            243 => Some(Self::Break),
            244 => Some(Self::InterruptProcess),
            245 => Some(Self::AbortOutput),
            246 => Some(Self::AreYouThere),
            247 => Some(Self::EraseCharacter),
            248 => Some(Self::EraseLine),
            249 => Some(Self::GoAhead),
            250 => Some(Self::Sb),
            251 => Some(Self::Will),
            252 => Some(Self::Wont),
            253 => Some(Self::Do),
            254 => Some(Self::Dont),
            _ => None,
        }
    }
}

/// 協商動詞（WILL / WONT / DO / DONT）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Negotiation {
    Will,
    Wont,
    Do,
    Dont,
}

impl Negotiation {
    /// 從命令位元組解析
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            251 => Some(Self::Will),
            252 => Some(Self::Wont),
            253 => Some(Self::Do),
            254 => Some(Self::Dont),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Will => TelnetCommand::Will as u8,
            Self::Wont => TelnetCommand::Wont as u8,
            Self::Do => TelnetCommand::Do as u8,
            Self::Dont => TelnetCommand::Dont as u8,
        }
    }
}

/// Telnet 選項
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelnetOption {
    /// Binary Transmission
    BinaryTransmission,
    /// Echo
    Echo,
    /// Suppress Go Ahead
    SuppressGoAhead,
    /// Terminal Type
    TerminalType,
    /// Window Size (NAWS)
    Naws,
    /// Charset
    Charset,
    /// MSDP (MUD Server Data Protocol)
    Msdp,
    /// MCCP2 (MUD Client Compression Protocol)
    Mccp2,
    /// GMCP (Generic MUD Communication Protocol)
    Gmcp,
    /// Unknown option
    Unknown(u8),
}

impl TelnetOption {
    /// 從位元組解析 Telnet 選項
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::BinaryTransmission,
            1 => Self::Echo,
            3 => Self::SuppressGoAhead,
            24 => Self::TerminalType,
            31 => Self::Naws,
            42 => Self::Charset,
            69 => Self::Msdp,
            86 => Self::Mccp2,
            201 => Self::Gmcp,
            other => Self::Unknown(other),
        }
    }

    /// 獲取選項的位元組值
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::BinaryTransmission => 0,
            Self::Echo => 1,
            Self::SuppressGoAhead => 3,
            Self::TerminalType => 24,
            Self::Naws => 31,
            Self::Charset => 42,
            Self::Msdp => 69,
            Self::Mccp2 => 86,
            Self::Gmcp => 201,
            Self::Unknown(b) => *b,
        }
    }
}

/// 組出三位元組的協商序列 `IAC <verb> <option>`
pub fn negotiate(verb: Negotiation, option: u8) -> Vec<u8> {
    vec![IAC, verb.as_byte(), option]
}

/// 組出 sub-negotiation 序列 `IAC SB <option> <body> IAC SE`
///
/// body 中的 0xFF 會被轉義為 `IAC IAC`。
pub fn subnegotiate(option: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.extend_from_slice(&[IAC, TelnetCommand::Sb as u8, option]);
    for &b in body {
        if b == IAC {
            out.push(IAC);
        }
        out.push(b);
    }
    out.extend_from_slice(&[IAC, TelnetCommand::Se as u8]);
    out
}

/// 生成保守的拒絕回應：DO → WONT，WILL → DONT；WONT/DONT 不需回應
pub fn generate_refusal(verb: Negotiation, option: u8) -> Vec<u8> {
    match verb {
        Negotiation::Do => negotiate(Negotiation::Wont, option),
        Negotiation::Will => negotiate(Negotiation::Dont, option),
        Negotiation::Wont | Negotiation::Dont => Vec::new(),
    }
}
