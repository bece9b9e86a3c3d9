//! 方向名稱：全名與縮寫互換、反方向、格狀座標位移

/// (全名, 縮寫, 反方向全名)
const DIRECTIONS: &[(&str, &str, &str)] = &[
    ("north", "n", "south"),
    ("south", "s", "north"),
    ("east", "e", "west"),
    ("west", "w", "east"),
    ("up", "u", "down"),
    ("down", "d", "up"),
    ("northeast", "ne", "southwest"),
    ("northwest", "nw", "southeast"),
    ("southeast", "se", "northwest"),
    ("southwest", "sw", "northeast"),
];

fn lookup(dir: &str) -> Option<&'static (&'static str, &'static str, &'static str)> {
    let dir = dir.trim();
    DIRECTIONS
        .iter()
        .find(|(full, short, _)| dir.eq_ignore_ascii_case(full) || dir.eq_ignore_ascii_case(short))
}

/// 是否為標準方向（全名或縮寫）
pub fn is_direction(dir: &str) -> bool {
    lookup(dir).is_some()
}

/// 縮寫；不是標準方向時原樣回傳
pub fn abbreviate(dir: &str) -> &str {
    lookup(dir).map(|(_, short, _)| *short).unwrap_or(dir)
}

/// 全名；不是標準方向時原樣回傳
pub fn expand(dir: &str) -> &str {
    lookup(dir).map(|(full, _, _)| *full).unwrap_or(dir)
}

/// 反方向全名
pub fn reverse(dir: &str) -> Option<&'static str> {
    lookup(dir).map(|(_, _, rev)| *rev)
}

/// 平面格狀位移 (dx, dy)，y 向南遞增
pub fn grid_offset(dir: &str) -> Option<(i64, i64)> {
    match lookup(dir)?.0 {
        "north" => Some((0, -1)),
        "south" => Some((0, 1)),
        "east" => Some((1, 0)),
        "west" => Some((-1, 0)),
        _ => None,
    }
}
