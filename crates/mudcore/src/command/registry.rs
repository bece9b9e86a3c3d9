//! 命令註冊表
//!
//! 解析 `#cmd arg --opt=val` 形式的輸入：命令名稱可用前綴，
//! bool 參數與底線開頭的參數是選項，其他參數依宣告順序綁定。

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use super::parser::{shell_split_spans, split_first_word};
use crate::error::ScriptError;
use crate::plugin::PluginId;
use crate::signature::{coerce, Args, Coercer, Coercers, Param, ParamType, Signature, SignatureError, Value};

/// 命令呼叫錯誤，回報給使用者時附上說明
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("未知的命令: {0}")]
    UnknownCommand(String),

    #[error("命令 '{name}' 不明確，可能是: {}", .candidates.join(", "))]
    AmbiguousCommand { name: String, candidates: Vec<String> },

    #[error("{command}: 未知的選項 --{option}")]
    UnknownOption { command: String, option: String },

    #[error("{command}: 選項 --{option} 不明確，可能是: {}", .candidates.join(", "))]
    AmbiguousOption {
        command: String,
        option: String,
        candidates: Vec<String>,
    },

    #[error("{command}: 缺少參數 {argument}")]
    MissingArgument { command: String, argument: String },

    #[error("{command}: 參數 {param} 的值無效: {reason}")]
    InvalidValue {
        command: String,
        param: String,
        reason: String,
    },

    #[error("{command}: 多餘的參數: {}", .extra.join(" "))]
    TooManyArguments { command: String, extra: Vec<String> },
}

/// 註冊命令時的錯誤
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandDefError {
    #[error("命令已存在: {0}")]
    Duplicate(String),

    #[error("命令 {0} 的簽章錯誤: {1}")]
    Signature(String, SignatureError),
}

/// 命令處理器
pub type CommandHandler<C> = Rc<dyn Fn(&mut C, &Args) -> Result<(), ScriptError>>;

/// 命令定義
#[derive(Debug, Clone, Default)]
pub struct CommandDef {
    pub name: String,
    pub signature: String,
    /// 說明文字；第一行為摘要
    pub help: String,
    /// 不出現在列表，也不參與前綴比對
    pub hidden: bool,
}

impl CommandDef {
    pub fn new(name: impl Into<String>, signature: &str) -> Self {
        Self {
            name: name.into(),
            signature: signature.to_string(),
            ..Default::default()
        }
    }

    pub fn help(mut self, help: &str) -> Self {
        self.help = help.to_string();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn summary(&self) -> &str {
        self.help.lines().next().unwrap_or("").trim()
    }
}

pub(crate) struct Command<C> {
    pub(crate) def: CommandDef,
    pub(crate) signature: Signature,
    owner: Option<PluginId>,
    handler: CommandHandler<C>,
}

/// 命令資訊（列表用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub summary: String,
    pub hidden: bool,
    pub owner: Option<PluginId>,
}

/// 解析結果
pub enum Invocation<C> {
    Run {
        name: String,
        handler: CommandHandler<C>,
        args: Args,
    },
    /// `--help`、`-h`、`-?`
    Help(String),
}

pub struct CommandRegistry<C> {
    prefix: char,
    commands: BTreeMap<String, Command<C>>,
    coercers: HashMap<Option<PluginId>, Coercers>,
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self::new('#')
    }
}

impl<C> CommandRegistry<C> {
    pub fn new(prefix: char) -> Self {
        Self {
            prefix,
            commands: BTreeMap::new(),
            coercers: HashMap::new(),
        }
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    pub fn set_prefix(&mut self, prefix: char) {
        self.prefix = prefix;
    }

    /// 輸入行是否以命令字元開頭
    pub fn is_command(&self, line: &str) -> bool {
        line.starts_with(self.prefix)
    }

    pub fn register(
        &mut self,
        def: CommandDef,
        owner: Option<PluginId>,
        handler: CommandHandler<C>,
    ) -> Result<(), CommandDefError> {
        if self.commands.contains_key(&def.name) {
            return Err(CommandDefError::Duplicate(def.name));
        }
        let signature = Signature::parse(&def.signature)
            .map_err(|e| CommandDefError::Signature(def.name.clone(), e))?;
        debug!("註冊命令 {}", def.name);
        self.commands.insert(
            def.name.clone(),
            Command {
                def,
                signature,
                owner,
                handler,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.commands.remove(name).is_some()
    }

    pub fn unregister_owner(&mut self, owner: &PluginId) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, c| c.owner.as_ref() != Some(owner));
        self.coercers.remove(&Some(owner.clone()));
        before - self.commands.len()
    }

    /// 登記自訂型別的轉換函式
    pub fn add_coercer(&mut self, owner: Option<PluginId>, type_name: &str, coercer: Coercer) {
        self.coercers
            .entry(owner)
            .or_default()
            .insert(type_name.to_string(), coercer);
    }

    pub fn list(&self) -> Vec<CommandInfo> {
        self.commands
            .values()
            .map(|c| CommandInfo {
                name: c.def.name.clone(),
                summary: c.def.summary().to_string(),
                hidden: c.def.hidden,
                owner: c.owner.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// 依名稱解析：先完全比對，再前綴比對
    pub(crate) fn resolve(&self, word: &str) -> Result<&Command<C>, ArgumentError> {
        if let Some(cmd) = self.commands.get(word) {
            return Ok(cmd);
        }
        let candidates: Vec<&Command<C>> = self
            .commands
            .values()
            .filter(|c| !c.def.hidden && c.def.name.starts_with(word))
            .collect();
        match candidates.as_slice() {
            [] => Err(ArgumentError::UnknownCommand(word.to_string())),
            [only] => Ok(*only),
            many => Err(ArgumentError::AmbiguousCommand {
                name: word.to_string(),
                candidates: many.iter().map(|c| c.def.name.clone()).collect(),
            }),
        }
    }

    /// 解析命令字元之後的內容
    pub fn parse(&self, line: &str) -> Result<Invocation<C>, ArgumentError> {
        let (word, rest) = split_first_word(line);
        let cmd = self.resolve(word)?;
        let name = cmd.def.name.clone();
        let custom = self.coercers.get(&cmd.owner);
        match bind(cmd, rest, custom)? {
            Some(args) => Ok(Invocation::Run {
                name,
                handler: Rc::clone(&cmd.handler),
                args,
            }),
            None => Ok(Invocation::Help(name)),
        }
    }

    /// 單一命令的完整說明
    pub fn help(&self, name: &str) -> Result<String, ArgumentError> {
        let cmd = self.resolve(name)?;
        Ok(super::help::render(self.prefix, &cmd.def, &cmd.signature))
    }

    /// 所有命令的摘要
    pub fn overview(&self) -> String {
        super::help::overview(
            self.prefix,
            self.commands.values().filter(|c| !c.def.hidden).map(|c| &c.def),
        )
    }
}

fn is_option_token(token: &str) -> bool {
    token.len() > 1
        && token.starts_with('-')
        && !token[1..].starts_with(|c: char| c.is_ascii_digit() || c == '.')
}

fn invalid(command: &str, param: &Param, reason: String) -> ArgumentError {
    ArgumentError::InvalidValue {
        command: command.to_string(),
        param: param.name.clone(),
        reason,
    }
}

/// 綁定參數；要求顯示說明時回傳 None
///
/// `text` 參數取原始輸入從它的第一個 token 起的所有內容，不經引號處理。
fn bind<C>(
    cmd: &Command<C>,
    rest: &str,
    custom: Option<&Coercers>,
) -> Result<Option<Args>, ArgumentError> {
    let name = &cmd.def.name;
    let options: Vec<&Param> = cmd.signature.params.iter().filter(|p| p.is_option()).collect();
    let arguments: Vec<&Param> = cmd.signature.params.iter().filter(|p| !p.is_option()).collect();
    let text_index = arguments.iter().position(|p| p.name == "text");

    let tokens = shell_split_spans(rest);
    let mut positional: Vec<(usize, &str)> = Vec::new();
    let mut given: HashMap<&str, Value> = HashMap::new();
    let mut literal = false;

    for (offset, token) in &tokens {
        let in_text = text_index.is_some_and(|i| positional.len() > i);
        if literal || in_text || !is_option_token(token) {
            positional.push((*offset, token.as_str()));
            continue;
        }
        if token == "--" {
            literal = true;
            continue;
        }
        if matches!(token.as_str(), "--help" | "-h" | "-?") {
            return Ok(None);
        }
        let body = token.trim_start_matches('-');
        let (opt, value) = match body.split_once('=') {
            Some((o, v)) => (o, Some(v)),
            None => (body, None),
        };
        let param = match_option(name, &options, opt)?;
        let value = match (value, &param.ty) {
            (Some(v), ty) => coerce(ty, v, custom).map_err(|e| invalid(name, param, e))?,
            (None, ParamType::Bool) => Value::Bool(true),
            (None, _) => return Err(invalid(name, param, "需要 --名稱=值".to_string())),
        };
        given.insert(param.name.as_str(), value);
    }

    let mut args = Args::new();
    let mut consumed = 0;
    for (i, param) in arguments.iter().enumerate() {
        if Some(i) == text_index {
            let text = positional
                .get(i)
                .map(|(offset, _)| rest[*offset..].trim_end().to_string())
                .unwrap_or_default();
            consumed = positional.len();
            if text.is_empty() {
                match &param.default {
                    Some(default) => args.push(param.name.clone(), Value::Str(default.clone())),
                    None => {
                        return Err(ArgumentError::MissingArgument {
                            command: name.clone(),
                            argument: param.name.clone(),
                        })
                    }
                }
            } else {
                args.push(param.name.clone(), Value::Str(text));
            }
            break;
        }
        let raw = match (positional.get(i), &param.default) {
            (Some((_, token)), _) => token.to_string(),
            (None, Some(default)) => default.clone(),
            (None, None) => {
                return Err(ArgumentError::MissingArgument {
                    command: name.clone(),
                    argument: param.name.clone(),
                })
            }
        };
        consumed = consumed.max((i + 1).min(positional.len()));
        let value = coerce(&param.ty, &raw, custom).map_err(|e| invalid(name, param, e))?;
        args.push(param.name.clone(), value);
    }
    if consumed < positional.len() {
        return Err(ArgumentError::TooManyArguments {
            command: name.clone(),
            extra: positional[consumed..].iter().map(|(_, s)| s.to_string()).collect(),
        });
    }

    for param in options {
        let value = match given.remove(param.name.as_str()) {
            Some(v) => v,
            None => match (&param.default, &param.ty) {
                (Some(default), ty) => {
                    coerce(ty, default, custom).map_err(|e| invalid(name, param, e))?
                }
                (None, ParamType::Bool) => Value::Bool(false),
                (None, _) => continue,
            },
        };
        args.push(param.name.clone(), value);
    }
    Ok(Some(args))
}

fn match_option<'a>(
    command: &str,
    options: &[&'a Param],
    opt: &str,
) -> Result<&'a Param, ArgumentError> {
    if let Some(exact) = options.iter().find(|p| p.option_name() == opt) {
        return Ok(*exact);
    }
    let candidates: Vec<&&Param> = options
        .iter()
        .filter(|p| p.option_name().starts_with(opt))
        .collect();
    match candidates.as_slice() {
        [] => Err(ArgumentError::UnknownOption {
            command: command.to_string(),
            option: opt.to_string(),
        }),
        [only] => Ok(**only),
        many => Err(ArgumentError::AmbiguousOption {
            command: command.to_string(),
            option: opt.to_string(),
            candidates: many.iter().map(|p| p.option_name().to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Calls = Vec<(String, Args)>;

    fn recorder() -> CommandHandler<Calls> {
        Rc::new(|calls: &mut Calls, args: &Args| {
            calls.push((String::new(), args.clone()));
            Ok(())
        })
    }

    fn registry() -> CommandRegistry<Calls> {
        let mut reg = CommandRegistry::new('#');
        reg.register(
            CommandDef::new("ticker", "name: str, _commands: str, _seconds: float = 60, _repeats: int = -1, delete: bool")
                .help("管理 ticker"),
            None,
            recorder(),
        )
        .unwrap();
        reg.register(CommandDef::new("echo", "text"), None, recorder()).unwrap();
        reg.register(CommandDef::new("session", "name: str = \"\""), None, recorder()).unwrap();
        reg.register(CommandDef::new("showme", "text"), None, recorder()).unwrap();
        reg.register(CommandDef::new("repeat", "count: int, text"), None, recorder()).unwrap();
        reg
    }

    fn run(reg: &CommandRegistry<Calls>, line: &str) -> Result<Args, ArgumentError> {
        match reg.parse(line)? {
            Invocation::Run { args, .. } => Ok(args),
            Invocation::Help(name) => panic!("unexpected help for {}", name),
        }
    }

    #[test]
    fn test_exact_and_prefix_resolution() {
        let reg = registry();
        assert!(run(&reg, "ticker hb").is_ok());
        assert!(run(&reg, "tick hb").is_ok());
        assert!(run(&reg, "e hi").is_ok());
        assert_eq!(
            run(&reg, "s x").unwrap_err(),
            ArgumentError::AmbiguousCommand {
                name: "s".into(),
                candidates: vec!["session".into(), "showme".into()]
            }
        );
        assert_eq!(
            run(&reg, "zap").unwrap_err(),
            ArgumentError::UnknownCommand("zap".into())
        );
    }

    #[test]
    fn test_options_and_defaults() {
        let reg = registry();
        let args = run(&reg, "ticker hb --commands=\"say hi;smile\" --sec=2.5 --del").unwrap();
        assert_eq!(args.str("name"), Some("hb"));
        assert_eq!(args.str("_commands"), Some("say hi;smile"));
        assert_eq!(args.float("_seconds"), Some(2.5));
        assert_eq!(args.int("_repeats"), Some(-1));
        assert!(args.flag("delete"));
    }

    #[test]
    fn test_bool_option_defaults_false() {
        let reg = registry();
        let args = run(&reg, "ticker hb").unwrap();
        assert!(!args.flag("delete"));
        assert_eq!(args.get("_commands"), None);
    }

    #[test]
    fn test_unknown_and_ambiguous_option() {
        let mut reg = registry();
        reg.register(CommandDef::new("x", "_alpha: int = 0, _also: int = 0"), None, recorder())
            .unwrap();
        assert!(matches!(
            run(&reg, "ticker hb --zzz"),
            Err(ArgumentError::UnknownOption { .. })
        ));
        assert!(matches!(
            run(&reg, "x --al=1"),
            Err(ArgumentError::AmbiguousOption { .. })
        ));
    }

    #[test]
    fn test_missing_argument() {
        let reg = registry();
        assert_eq!(
            run(&reg, "ticker").unwrap_err(),
            ArgumentError::MissingArgument {
                command: "ticker".into(),
                argument: "name".into()
            }
        );
    }

    #[test]
    fn test_invalid_value() {
        let reg = registry();
        assert!(matches!(
            run(&reg, "ticker hb --seconds=soon"),
            Err(ArgumentError::InvalidValue { .. })
        ));
        assert!(matches!(
            run(&reg, "repeat many look"),
            Err(ArgumentError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_too_many_arguments() {
        let reg = registry();
        assert!(matches!(
            run(&reg, "ticker a b"),
            Err(ArgumentError::TooManyArguments { .. })
        ));
    }

    #[test]
    fn test_text_consumes_remainder() {
        let reg = registry();
        let args = run(&reg, "echo hello   big -5 world").unwrap();
        assert_eq!(args.str("text"), Some("hello   big -5 world"));
        let args = run(&reg, "repeat 3 kill orc --fast").unwrap();
        assert_eq!(args.int("count"), Some(3));
        assert_eq!(args.str("text"), Some("kill orc --fast"));
    }

    #[test]
    fn test_text_keeps_raw_remainder() {
        let reg = registry();
        let args = run(&reg, "echo don't  panic").unwrap();
        assert_eq!(args.str("text"), Some("don't  panic"));
        let args = run(&reg, r#"showme "big orc" says \hi  "#).unwrap();
        assert_eq!(args.str("text"), Some(r#""big orc" says \hi"#));
        let args = run(&reg, "repeat 2 say it's  'fine'").unwrap();
        assert_eq!(args.int("count"), Some(2));
        assert_eq!(args.str("text"), Some("say it's  'fine'"));
    }

    #[test]
    fn test_help_request() {
        let reg = registry();
        for flag in ["--help", "-h", "-?"] {
            match reg.parse(&format!("ticker {}", flag)).unwrap() {
                Invocation::Help(name) => assert_eq!(name, "ticker"),
                Invocation::Run { .. } => panic!("expected help"),
            }
        }
    }

    #[test]
    fn test_negative_number_is_positional() {
        let mut reg = registry();
        reg.register(CommandDef::new("n", "value: int"), None, recorder()).unwrap();
        assert_eq!(run(&reg, "n -3").unwrap().int("value"), Some(-3));
    }

    #[test]
    fn test_custom_coercer_per_owner() {
        let mut reg = registry();
        let owner = PluginId::new("Mapper");
        reg.register(
            CommandDef::new("goto", "target: vnum"),
            Some(owner.clone()),
            recorder(),
        )
        .unwrap();
        reg.add_coercer(
            Some(owner.clone()),
            "vnum",
            Rc::new(|s: &str| {
                if s.chars().all(|c| c.is_ascii_digit()) {
                    Ok(Value::Str(s.to_string()))
                } else {
                    Err(format!("{} 不是 vnum", s))
                }
            }),
        );
        assert_eq!(run(&reg, "goto 3001").unwrap().str("target"), Some("3001"));
        assert!(run(&reg, "goto home").is_err());
        assert_eq!(reg.unregister_owner(&owner), 1);
    }

    #[test]
    fn test_duplicate_command() {
        let mut reg = registry();
        assert_eq!(
            reg.register(CommandDef::new("echo", "text"), None, recorder()),
            Err(CommandDefError::Duplicate("echo".into()))
        );
    }

    #[test]
    fn test_hidden_not_prefix_matched() {
        let mut reg = registry();
        reg.register(CommandDef::new("zscript", "").hidden(), None, recorder())
            .unwrap();
        assert!(run(&reg, "zs").is_err());
        assert!(run(&reg, "zscript").is_ok());
        assert!(!reg.overview().contains("zscript"));
    }

    #[test]
    fn test_handler_invocation() {
        let reg = registry();
        let mut calls = Calls::new();
        if let Invocation::Run { handler, args, .. } = reg.parse("echo hi").unwrap() {
            handler(&mut calls, &args).unwrap();
        }
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.str("text"), Some("hi"));
    }
}
