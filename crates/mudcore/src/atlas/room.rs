use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 目的地未知的出口
pub const UNKNOWN_VNUM: &str = "?";

/// 房間旗標
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomFlags {
    pub silent: bool,
    pub deathtrap: bool,
    pub peaceful: bool,
    pub no_magic: bool,
    pub no_recall: bool,
    pub regen_hp: bool,
    pub regen_mp: bool,
    pub regen_sp: bool,
    pub bank: bool,
    pub set_recall: bool,
    pub narrow: bool,
    pub wild_magic: bool,
}

impl RoomFlags {
    /// 設定具名旗標；名稱不存在時回傳 false
    pub fn set(&mut self, name: &str, value: bool) -> bool {
        let flag = match name {
            "silent" => &mut self.silent,
            "deathtrap" => &mut self.deathtrap,
            "peaceful" => &mut self.peaceful,
            "no_magic" => &mut self.no_magic,
            "no_recall" => &mut self.no_recall,
            "regen_hp" => &mut self.regen_hp,
            "regen_mp" => &mut self.regen_mp,
            "regen_sp" => &mut self.regen_sp,
            "bank" => &mut self.bank,
            "set_recall" => &mut self.set_recall,
            "narrow" => &mut self.narrow,
            "wild_magic" => &mut self.wild_magic,
            _ => return false,
        };
        *flag = value;
        true
    }

    /// 已設定的旗標名稱
    pub fn names(&self) -> Vec<&'static str> {
        [
            ("silent", self.silent),
            ("deathtrap", self.deathtrap),
            ("peaceful", self.peaceful),
            ("no_magic", self.no_magic),
            ("no_recall", self.no_recall),
            ("regen_hp", self.regen_hp),
            ("regen_mp", self.regen_mp),
            ("regen_sp", self.regen_sp),
            ("bank", self.bank),
            ("set_recall", self.set_recall),
            ("narrow", self.narrow),
            ("wild_magic", self.wild_magic),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect()
    }
}

/// 出口
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    pub from_vnum: String,
    pub direction: String,
    pub to_vnum: String,
    #[serde(default)]
    pub door: Option<String>,
    #[serde(default)]
    pub closes: bool,
    #[serde(default)]
    pub locks: bool,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub min_level: Option<u32>,
    #[serde(default)]
    pub max_level: Option<u32>,
    #[serde(default)]
    pub deathtrap: bool,
    /// 取代方向的移動命令
    #[serde(default)]
    pub command: Option<String>,
}

impl Exit {
    pub fn new(from: impl Into<String>, direction: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_vnum: from.into(),
            direction: direction.into(),
            to_vnum: to.into(),
            door: None,
            closes: false,
            locks: false,
            weight: 0,
            min_level: None,
            max_level: None,
            deathtrap: false,
            command: None,
        }
    }

    /// 有門的出口
    pub fn door(mut self, name: impl Into<String>) -> Self {
        self.door = Some(name.into());
        self.closes = true;
        self
    }

    pub fn locked(mut self) -> Self {
        self.locks = true;
        self
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn levels(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_level = min;
        self.max_level = max;
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn is_unknown(&self) -> bool {
        self.to_vnum == UNKNOWN_VNUM
    }
}

/// MUD 房間
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub vnum: String,
    pub name: String,
    pub area: String,
    pub terrain: String,
    #[serde(default)]
    pub flags: RoomFlags,
    #[serde(default)]
    pub last_visited: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_harvested: Option<DateTime<Utc>>,
    /// 出口另存，序列化時不寫入房間紀錄
    #[serde(skip)]
    pub exits: BTreeMap<String, Exit>,
}

impl Room {
    pub fn new(vnum: impl Into<String>) -> Self {
        Self {
            vnum: vnum.into(),
            ..Self::default()
        }
    }

    /// 加入出口，`from_vnum` 一律改成本房間
    pub fn add_exit(&mut self, mut exit: Exit) {
        exit.from_vnum = self.vnum.clone();
        self.exits.insert(exit.direction.clone(), exit);
    }

    pub fn exit(&self, direction: &str) -> Option<&Exit> {
        self.exits.get(direction)
    }

    /// 房間內容指紋
    /// 使用 SHA256(name + area + terrain + sorted exits)，不含時間戳
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0]);
        hasher.update(self.area.as_bytes());
        hasher.update([0]);
        hasher.update(self.terrain.as_bytes());
        for exit in self.exits.values() {
            hasher.update([0]);
            hasher.update(exit.direction.as_bytes());
            hasher.update([1]);
            hasher.update(exit.to_vnum.as_bytes());
        }

        let result = hasher.finalize();
        let mut hex_string = String::with_capacity(64);
        for byte in result {
            let _ = write!(&mut hex_string, "{:02x}", byte);
        }
        hex_string
    }
}
