//! 命令列解析與命令註冊表

mod help;
mod parser;
mod registry;

pub use parser::{shell_split, split_first_word, split_statements};
pub use registry::{
    ArgumentError, CommandDef, CommandDefError, CommandHandler, CommandInfo, CommandRegistry,
    Invocation,
};
