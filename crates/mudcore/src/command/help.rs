//! 命令說明排版

use super::registry::CommandDef;
use crate::signature::{Param, ParamType, Signature};

fn synopsis_part(param: &Param) -> String {
    if param.is_option() {
        match param.ty {
            ParamType::Bool => format!("[--{}]", param.option_name()),
            _ => format!("[--{}=<{}>]", param.option_name(), param.ty),
        }
    } else if param.name == "text" {
        if param.is_required() {
            "<text...>".to_string()
        } else {
            "[text...]".to_string()
        }
    } else if param.is_required() {
        format!("<{}>", param.name)
    } else {
        format!("[{}]", param.name)
    }
}

fn default_label(param: &Param) -> String {
    match &param.default {
        Some(d) if d.is_empty() => "\"\"".to_string(),
        Some(d) => d.clone(),
        None if param.ty == ParamType::Bool => "false".to_string(),
        None => "-".to_string(),
    }
}

/// 用法、參數表、選項表與說明文字
pub fn render(prefix: char, def: &CommandDef, signature: &Signature) -> String {
    let mut out = String::new();
    let parts: Vec<String> = signature.params.iter().map(synopsis_part).collect();
    out.push_str(&format!("用法: {}{} {}", prefix, def.name, parts.join(" ")));
    let body = def.help.trim();
    if !body.is_empty() {
        out.push_str("\n\n");
        out.push_str(body);
    }

    let arguments: Vec<&Param> = signature.params.iter().filter(|p| !p.is_option()).collect();
    if !arguments.is_empty() {
        out.push_str("\n\n參數:");
        for p in arguments {
            out.push_str(&format!(
                "\n  {:<12} {:<8} {}",
                p.name,
                p.ty,
                if p.is_required() {
                    "必填".to_string()
                } else {
                    format!("預設 {}", default_label(p))
                }
            ));
        }
    }

    let options: Vec<&Param> = signature.params.iter().filter(|p| p.is_option()).collect();
    if !options.is_empty() {
        out.push_str("\n\n選項:");
        for p in options {
            out.push_str(&format!(
                "\n  --{:<10} {:<8} 預設 {}",
                p.option_name(),
                p.ty,
                default_label(p)
            ));
        }
    }
    out
}

/// 命令清單
pub fn overview<'a>(prefix: char, defs: impl Iterator<Item = &'a CommandDef>) -> String {
    let mut lines = vec!["可用命令:".to_string()];
    for def in defs {
        lines.push(format!("  {}{:<12} {}", prefix, def.name, def.summary()));
    }
    lines.push(format!("輸入 {}help <命令> 查看詳細說明", prefix));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_usage() {
        let def = CommandDef::new("queue", "").help("管理命令佇列\n\n不帶參數時列出佇列。");
        let sig = Signature::parse(
            "qname: str = \"\", cmd: str = \"\", flush: bool, _priority: int = 0",
        )
        .unwrap();
        let text = render('#', &def, &sig);
        assert!(text.starts_with("用法: #queue [qname] [cmd] [--flush] [--priority=<int>]"));
        assert!(text.contains("管理命令佇列"));
        assert!(text.contains("參數:"));
        assert!(text.contains("--priority"));
    }

    #[test]
    fn test_render_required() {
        let def = CommandDef::new("echo", "");
        let sig = Signature::parse("text").unwrap();
        let text = render('#', &def, &sig);
        assert!(text.starts_with("用法: #echo <text...>\n\n參數:"));
        assert!(text.contains("必填"));
    }

    #[test]
    fn test_overview() {
        let a = CommandDef::new("echo", "").help("顯示文字");
        let text = overview('#', [a].iter());
        assert!(text.contains("#echo"));
        assert!(text.contains("顯示文字"));
    }
}
