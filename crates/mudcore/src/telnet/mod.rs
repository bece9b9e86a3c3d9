//! Telnet 協定模組
//!
//! 實作 Telnet 連線管理、位元組分幀、選項協商與 MSDP

mod client;
mod codec;
pub mod msdp;
mod negotiation;
mod protocol;

pub use client::{
    hex_dump, run_connection, ConnectionHandle, ConnectionState, NetEvent, NetMessage,
    TelnetClient, TelnetConfig, TelnetError,
};
pub use codec::{ByteCodec, CodecEvent};
pub use msdp::{MsdpValue, ProtocolError};
pub use negotiation::{
    EchoHandler, MsdpHandler, NawsHandler, OptionHandler, OptionOutcome, OptionTable,
    TtypeHandler,
};
pub use protocol::{
    generate_refusal, negotiate, subnegotiate, Negotiation, TelnetCommand, TelnetOption, IAC,
};
