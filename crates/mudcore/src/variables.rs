//! MSDP 變數儲存
//!
//! 已知變數寫入型別化的欄位，未知變數放進 `other`。結構化變數
//! （GROUP、AFFECTS、ROOM_EXITS、ROOM）由可替換的 `FieldDecoder` 解析。

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{trace, warn};

use crate::telnet::MsdpValue;

/// 隊伍成員
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupMember {
    pub name: String,
    pub level: i64,
    pub health: i64,
    pub health_max: i64,
    pub mana: i64,
    pub mana_max: i64,
    pub movement: i64,
    pub movement_max: i64,
    pub leader: bool,
}

/// 型別化的 MSDP 狀態
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MsdpState {
    pub account_name: String,
    pub character_name: String,
    pub class: String,
    pub race: String,
    pub position: String,
    pub level: i64,
    pub health: i64,
    pub health_max: i64,
    pub mana: i64,
    pub mana_max: i64,
    pub movement: i64,
    pub movement_max: i64,
    pub experience: i64,
    pub experience_max: i64,
    pub experience_tnl: i64,
    pub money: i64,
    pub alignment: i64,
    pub hitroll: i64,
    pub damroll: i64,
    pub ac: i64,
    pub opponent_name: String,
    pub opponent_level: i64,
    pub opponent_health: i64,
    pub opponent_health_max: i64,
    pub room_name: String,
    pub room_vnum: String,
    pub area_name: String,
    pub room_terrain: String,
    pub world_time: i64,
    /// 方向 → vnum
    pub room_exits: BTreeMap<String, String>,
    pub group: Vec<GroupMember>,
    /// 狀態名稱 → 剩餘小時
    pub affects: BTreeMap<String, i64>,
    /// 未宣告欄位的變數
    pub other: BTreeMap<String, MsdpValue>,
}

/// 整數欄位：空字串為 0
fn to_int(value: &MsdpValue) -> i64 {
    match value.as_str().map(str::trim) {
        Some("") | None => 0,
        Some(s) => s.parse::<i64>().unwrap_or_else(|_| {
            s.parse::<f64>().map(|f| f as i64).unwrap_or_else(|_| {
                warn!("MSDP 整數欄位無法解析: {:?}", s);
                0
            })
        }),
    }
}

fn to_string(value: &MsdpValue) -> String {
    value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
}

impl MsdpState {
    /// 寫入純量欄位；不是已知欄位時回傳 false
    fn set_scalar(&mut self, name: &str, value: &MsdpValue) -> bool {
        macro_rules! int {
            ($field:ident) => {{
                self.$field = to_int(value);
                true
            }};
        }
        macro_rules! text {
            ($field:ident) => {{
                self.$field = to_string(value);
                true
            }};
        }
        match name {
            "ACCOUNT_NAME" => text!(account_name),
            "CHARACTER_NAME" => text!(character_name),
            "CLASS" => text!(class),
            "RACE" => text!(race),
            "POSITION" => text!(position),
            "LEVEL" => int!(level),
            "HEALTH" => int!(health),
            "HEALTH_MAX" => int!(health_max),
            "MANA" => int!(mana),
            "MANA_MAX" => int!(mana_max),
            "MOVEMENT" => int!(movement),
            "MOVEMENT_MAX" => int!(movement_max),
            "EXPERIENCE" => int!(experience),
            "EXPERIENCE_MAX" => int!(experience_max),
            "EXPERIENCE_TNL" => int!(experience_tnl),
            "MONEY" => int!(money),
            "ALIGNMENT" => int!(alignment),
            "HITROLL" => int!(hitroll),
            "DAMROLL" => int!(damroll),
            "AC" => int!(ac),
            "OPPONENT_NAME" => text!(opponent_name),
            "OPPONENT_LEVEL" => int!(opponent_level),
            "OPPONENT_HEALTH" => int!(opponent_health),
            "OPPONENT_HEALTH_MAX" => int!(opponent_health_max),
            "ROOM_NAME" => text!(room_name),
            "ROOM_VNUM" => text!(room_vnum),
            "AREA_NAME" => text!(area_name),
            "ROOM_TERRAIN" => text!(room_terrain),
            "WORLD_TIME" => int!(world_time),
            _ => false,
        }
    }
}

/// 結構化變數的解析器
pub trait FieldDecoder {
    /// 解析失敗時回傳說明，原始值會存進 `other`
    fn decode(&self, value: &MsdpValue, state: &mut MsdpState) -> Result<(), String>;
}

/// GROUP：成員 TABLE 的 ARRAY
pub struct GroupDecoder;

impl FieldDecoder for GroupDecoder {
    fn decode(&self, value: &MsdpValue, state: &mut MsdpState) -> Result<(), String> {
        let items: &[MsdpValue] = match value {
            MsdpValue::Array(items) | MsdpValue::Values(items) => items,
            MsdpValue::Table(_) => std::slice::from_ref(value),
            MsdpValue::String(s) if s.is_empty() => &[],
            MsdpValue::String(_) => return Err("GROUP 應為 ARRAY".to_string()),
        };
        let mut members = Vec::with_capacity(items.len());
        for item in items {
            if !matches!(item, MsdpValue::Table(_)) {
                return Err("GROUP 成員應為 TABLE".to_string());
            }
            let int = |key: &str| item.get(key).map(to_int).unwrap_or(0);
            members.push(GroupMember {
                name: item.get("NAME").map(to_string).unwrap_or_default(),
                level: int("LEVEL"),
                health: int("HEALTH"),
                health_max: int("HEALTH_MAX"),
                mana: int("MANA"),
                mana_max: int("MANA_MAX"),
                movement: int("MOVEMENT"),
                movement_max: int("MOVEMENT_MAX"),
                leader: item
                    .get("LEADER")
                    .and_then(MsdpValue::as_str)
                    .is_some_and(|s| s == "1" || s.eq_ignore_ascii_case("yes")),
            });
        }
        state.group = members;
        Ok(())
    }
}

/// AFFECTS：名稱 → 剩餘小時
pub struct AffectsDecoder;

impl FieldDecoder for AffectsDecoder {
    fn decode(&self, value: &MsdpValue, state: &mut MsdpState) -> Result<(), String> {
        state.affects = match value {
            MsdpValue::Table(entries) => entries
                .iter()
                .map(|(k, v)| (k.clone(), to_int(v)))
                .collect(),
            MsdpValue::String(s) if s.is_empty() => BTreeMap::new(),
            _ => return Err("AFFECTS 應為 TABLE".to_string()),
        };
        Ok(())
    }
}

/// ROOM_EXITS：方向 → vnum
pub struct RoomExitsDecoder;

impl FieldDecoder for RoomExitsDecoder {
    fn decode(&self, value: &MsdpValue, state: &mut MsdpState) -> Result<(), String> {
        state.room_exits = exits_of(value)?;
        Ok(())
    }
}

fn exits_of(value: &MsdpValue) -> Result<BTreeMap<String, String>, String> {
    match value {
        MsdpValue::Table(entries) => Ok(entries
            .iter()
            .map(|(k, v)| (k.clone(), to_string(v)))
            .collect()),
        MsdpValue::String(s) if s.is_empty() => Ok(BTreeMap::new()),
        _ => Err("ROOM_EXITS 應為 TABLE".to_string()),
    }
}

/// ROOM：含 VNUM、NAME、AREA、TERRAIN、EXITS 的 TABLE
pub struct RoomDecoder;

impl FieldDecoder for RoomDecoder {
    fn decode(&self, value: &MsdpValue, state: &mut MsdpState) -> Result<(), String> {
        if !matches!(value, MsdpValue::Table(_)) {
            return Err("ROOM 應為 TABLE".to_string());
        }
        let field = |key: &str| value.get(key).map(to_string).unwrap_or_default();
        state.room_vnum = field("VNUM");
        state.room_name = field("NAME");
        state.area_name = field("AREA");
        state.room_terrain = field("TERRAIN");
        state.room_exits = match value.get("EXITS") {
            Some(exits) => exits_of(exits)?,
            None => BTreeMap::new(),
        };
        Ok(())
    }
}

/// MSDP 變數儲存
#[derive(Default)]
pub struct VariableStore {
    state: MsdpState,
    raw: HashMap<String, MsdpValue>,
    decoders: HashMap<String, Box<dyn FieldDecoder>>,
}

impl VariableStore {
    /// 沒有結構化解析器的儲存
    pub fn new() -> Self {
        Self::default()
    }

    /// 安裝 GROUP、AFFECTS、ROOM_EXITS、ROOM 解析器
    pub fn standard() -> Self {
        let mut store = Self::new();
        store.install("GROUP", Box::new(GroupDecoder));
        store.install("AFFECTS", Box::new(AffectsDecoder));
        store.install("ROOM_EXITS", Box::new(RoomExitsDecoder));
        store.install("ROOM", Box::new(RoomDecoder));
        store
    }

    pub fn install(&mut self, variable: &str, decoder: Box<dyn FieldDecoder>) {
        self.decoders.insert(variable.to_string(), decoder);
    }

    /// 套用一筆更新
    pub fn update(&mut self, variable: &str, value: &MsdpValue) {
        trace!("MSDP {} = {}", variable, value);
        self.raw.insert(variable.to_string(), value.clone());
        if let Some(decoder) = self.decoders.get(variable) {
            match decoder.decode(value, &mut self.state) {
                Ok(()) => return,
                Err(reason) => warn!("MSDP {} 解析失敗: {}", variable, reason),
            }
        } else if self.state.set_scalar(variable, value) {
            return;
        }
        self.state.other.insert(variable.to_string(), value.clone());
    }

    pub fn state(&self) -> &MsdpState {
        &self.state
    }

    /// 最後收到的原始值
    pub fn raw(&self, variable: &str) -> Option<&MsdpValue> {
        self.raw.get(variable)
    }

    /// 所有收過的變數名稱（排序）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.raw.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn clear(&mut self) {
        self.state = MsdpState::default();
        self.raw.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> MsdpValue {
        MsdpValue::string(v)
    }

    fn table(entries: &[(&str, MsdpValue)]) -> MsdpValue {
        MsdpValue::Table(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_integer_field() {
        let mut store = VariableStore::standard();
        store.update("HEALTH", &s("85"));
        assert_eq!(store.state().health, 85);
        store.update("HEALTH", &s(""));
        assert_eq!(store.state().health, 0);
    }

    #[test]
    fn test_text_field() {
        let mut store = VariableStore::standard();
        store.update("ROOM_NAME", &s("Temple Square"));
        assert_eq!(store.state().room_name, "Temple Square");
    }

    #[test]
    fn test_unknown_goes_to_other() {
        let mut store = VariableStore::standard();
        store.update("QUEST_POINTS", &s("12"));
        assert_eq!(store.state().other.get("QUEST_POINTS"), Some(&s("12")));
        assert_eq!(store.raw("QUEST_POINTS"), Some(&s("12")));
    }

    #[test]
    fn test_group_decoder() {
        let mut store = VariableStore::standard();
        let group = MsdpValue::Array(vec![
            table(&[("NAME", s("Bob")), ("HEALTH", s("90")), ("LEADER", s("1"))]),
            table(&[("NAME", s("Ann")), ("LEVEL", s("7"))]),
        ]);
        store.update("GROUP", &group);
        let members = &store.state().group;
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].name, "Bob");
        assert_eq!(members[0].health, 90);
        assert!(members[0].leader);
        assert_eq!(members[1].level, 7);
    }

    #[test]
    fn test_affects_decoder() {
        let mut store = VariableStore::standard();
        store.update("AFFECTS", &table(&[("sanctuary", s("5")), ("bless", s(""))]));
        assert_eq!(store.state().affects.get("sanctuary"), Some(&5));
        assert_eq!(store.state().affects.get("bless"), Some(&0));
    }

    #[test]
    fn test_room_decoder() {
        let mut store = VariableStore::standard();
        store.update(
            "ROOM",
            &table(&[
                ("VNUM", s("3001")),
                ("NAME", s("Temple")),
                ("AREA", s("Midgaard")),
                ("TERRAIN", s("inside")),
                ("EXITS", table(&[("n", s("3002"))])),
            ]),
        );
        let st = store.state();
        assert_eq!(st.room_vnum, "3001");
        assert_eq!(st.area_name, "Midgaard");
        assert_eq!(st.room_exits.get("n").map(String::as_str), Some("3002"));
    }

    #[test]
    fn test_bad_structured_value_kept_raw() {
        let mut store = VariableStore::standard();
        store.update("AFFECTS", &s("garbage"));
        assert!(store.state().affects.is_empty());
        assert_eq!(store.state().other.get("AFFECTS"), Some(&s("garbage")));
    }

    #[test]
    fn test_without_decoders_structured_goes_to_other() {
        let mut store = VariableStore::new();
        store.update("GROUP", &MsdpValue::Array(vec![]));
        assert!(store.state().other.contains_key("GROUP"));
    }
}
