//! 輸入行切割

/// 以 `;` 分割多個命令，`\;` 為字面分號
///
/// 空白行回傳一個空字串（送出空行），其他情況略過空的片段。
pub fn split_statements(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return vec![String::new()];
    }
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&';') => {
                chars.next();
                current.push(';');
            }
            ';' => {
                let segment = current.trim();
                if !segment.is_empty() {
                    out.push(segment.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let segment = current.trim();
    if !segment.is_empty() {
        out.push(segment.to_string());
    }
    out
}

/// 類 shell 的參數切割：支援單/雙引號與反斜線跳脫
///
/// 未閉合的引號視為延伸到行尾。
pub fn shell_split(text: &str) -> Vec<String> {
    shell_split_spans(text).into_iter().map(|(_, t)| t).collect()
}

/// 同 `shell_split`，另附每個 token 在原字串中的起始位置
pub fn shell_split_spans(text: &str) -> Vec<(usize, String)> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut start: Option<usize> = None;
    let mut quote: Option<char> = None;
    let mut chars = text.char_indices();
    while let Some((i, c)) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => {
                if let Some((_, next)) = chars.next() {
                    current.push(next);
                }
                start.get_or_insert(i);
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                start.get_or_insert(i);
            }
            (None, c) if c.is_whitespace() => {
                if let Some(at) = start.take() {
                    tokens.push((at, std::mem::take(&mut current)));
                }
            }
            (None, c) => {
                current.push(c);
                start.get_or_insert(i);
            }
        }
    }
    if let Some(at) = start {
        tokens.push((at, current));
    }
    tokens
}

/// 分出第一個字與其餘部分
pub fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(i) => (&text[..i], text[i..].trim_start()),
        None => (text, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_statements() {
        assert_eq!(split_statements("n;e; s "), vec!["n", "e", "s"]);
        assert_eq!(split_statements("say a\\;b;n"), vec!["say a;b", "n"]);
        assert_eq!(split_statements(""), vec![""]);
        assert_eq!(split_statements("look;;"), vec!["look"]);
    }

    #[test]
    fn test_shell_split_quotes() {
        assert_eq!(
            shell_split(r#"add "open door" 'say hi' plain"#),
            vec!["add", "open door", "say hi", "plain"]
        );
        assert_eq!(shell_split(r"a\ b c"), vec!["a b", "c"]);
        assert_eq!(shell_split(r#"--name="x y""#), vec!["--name=x y"]);
        assert_eq!(shell_split(r#""""#), vec![""]);
        assert!(shell_split("   ").is_empty());
    }

    #[test]
    fn test_shell_split_single_quote_keeps_backslash() {
        assert_eq!(shell_split(r"'a\b'"), vec![r"a\b"]);
    }

    #[test]
    fn test_shell_split_spans() {
        assert_eq!(
            shell_split_spans(r#"3  "a b" c"#),
            vec![(0, "3".to_string()), (3, "a b".to_string()), (9, "c".to_string())]
        );
    }

    #[test]
    fn test_split_first_word() {
        assert_eq!(split_first_word("  alias  combat.k kill"), ("alias", "combat.k kill"));
        assert_eq!(split_first_word("help"), ("help", ""));
    }
}
