use lazy_static::lazy_static;
use regex::Regex;

/// 單次展開的步數上限，超過時不視為 speedwalk
pub const MAX_STEPS: usize = 500;

lazy_static! {
    static ref SPEEDWALK: Regex = Regex::new(r"^(\d*[neswud])+$").expect("speedwalk regex");
    static ref STEP: Regex = Regex::new(r"(\d*)([neswud])").expect("speedwalk step regex");
}

/// 解析 speedwalk 字串
///
/// 格式範例: `3nw` -> `n`, `n`, `n`, `w`
///
/// 每段為可省略的次數加上一個方向字母（n、e、s、w、u、d）。
/// 整行都符合格式才展開，否則回傳 None。
pub fn parse_speedwalk(input: &str) -> Option<Vec<String>> {
    if !SPEEDWALK.is_match(input) {
        return None;
    }

    let mut commands = Vec::new();
    for caps in STEP.captures_iter(input) {
        let direction = &caps[2];
        let count = match &caps[1] {
            "" => 1,
            digits => digits.parse::<usize>().ok()?,
        };
        if commands.len() + count > MAX_STEPS {
            return None;
        }
        commands.extend(std::iter::repeat(direction.to_string()).take(count));
    }
    Some(commands)
}
