//! 地圖：房間與出口構成的有向圖
//!
//! 每次變動立即寫入 sled。多個 session 共用同一份地圖時以 `SharedAtlas` 持有。

mod area;
pub mod direction;
mod path;
mod room;
mod store;
mod tour;
mod wilderness;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::rc::Rc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

pub use area::{Area, TourStrategy};
pub use path::{PathOptions, Route, Step, TerrainWeights, TravelerState, VIRTUAL_EXIT_WEIGHT};
pub use room::{Exit, Room, RoomFlags, UNKNOWN_VNUM};
pub use store::AtlasStore;
pub use tour::{POCKET_BUDGET, POCKET_CANDIDATES, POCKET_LIMIT};
pub use wilderness::Wilderness;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("未知房間: {0}")]
    UnknownRoom(String),

    #[error("未知區域: {0}")]
    UnknownArea(String),

    #[error("房間 {vnum} 沒有 {direction} 出口")]
    UnknownExit { vnum: String, direction: String },

    #[error("等級 {level} 不在區域 {area} 的範圍內")]
    LevelOutOfBand { area: String, level: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SharedAtlas = Rc<RefCell<Atlas>>;

pub struct Atlas {
    rooms: HashMap<String, Room>,
    areas: BTreeMap<String, Area>,
    store: Option<AtlasStore>,
    pub terrain: TerrainWeights,
    pub wilderness: Option<Wilderness>,
}

impl Atlas {
    /// 不落地的地圖
    pub fn in_memory() -> Self {
        Self {
            rooms: HashMap::new(),
            areas: BTreeMap::new(),
            store: None,
            terrain: TerrainWeights::default(),
            wilderness: None,
        }
    }

    /// 開啟地圖檔並載入全部房間與區域
    pub fn open(path: &Path) -> Result<Self, AtlasError> {
        let store = AtlasStore::open(path)?;
        let rooms = store.load_rooms()?;
        let areas = store
            .load_areas()?
            .into_iter()
            .map(|a| (a.name.clone(), a))
            .collect();
        info!("地圖載入完成：{} 個房間", rooms.len());
        Ok(Self {
            rooms,
            areas,
            store: Some(store),
            ..Self::in_memory()
        })
    }

    pub fn shared(self) -> SharedAtlas {
        Rc::new(RefCell::new(self))
    }

    pub fn room(&self, vnum: &str) -> Option<&Room> {
        self.rooms.get(vnum)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    fn persist(&self, vnum: &str) -> Result<(), AtlasError> {
        if let (Some(store), Some(room)) = (&self.store, self.rooms.get(vnum)) {
            store.save_room(room)?;
        }
        Ok(())
    }

    /// 觀察到房間：建立或更新，並記下造訪時間
    ///
    /// 只新增或更新列出的出口，不會移除既有出口。
    pub fn visit(
        &mut self,
        vnum: &str,
        name: &str,
        area: &str,
        terrain: &str,
        exits: &BTreeMap<String, String>,
    ) -> Result<&Room, AtlasError> {
        let room = self
            .rooms
            .entry(vnum.to_string())
            .or_insert_with(|| Room::new(vnum));
        let before = room.fingerprint();
        room.name = name.to_string();
        room.area = area.to_string();
        room.terrain = terrain.to_string();
        for (dir, to) in exits {
            let full = direction::expand(dir).to_string();
            match room.exits.get_mut(&full) {
                Some(exit) => exit.to_vnum = to.clone(),
                None => room.add_exit(Exit::new(vnum, full, to.clone())),
            }
        }
        room.last_visited = Some(Utc::now());
        if room.fingerprint() != before {
            debug!("房間 {} 內容更新", vnum);
        }
        self.persist(vnum)?;
        self.room(vnum).ok_or_else(|| AtlasError::UnknownRoom(vnum.to_string()))
    }

    /// 修改房間並寫回
    pub fn update_room(
        &mut self,
        vnum: &str,
        change: impl FnOnce(&mut Room),
    ) -> Result<(), AtlasError> {
        let room = self
            .rooms
            .get_mut(vnum)
            .ok_or_else(|| AtlasError::UnknownRoom(vnum.to_string()))?;
        change(room);
        self.persist(vnum)
    }

    pub fn mark_harvested(&mut self, vnum: &str) -> Result<(), AtlasError> {
        self.update_room(vnum, |room| room.last_harvested = Some(Utc::now()))
    }

    pub fn delete_room(&mut self, vnum: &str) -> Result<Room, AtlasError> {
        let room = self
            .rooms
            .remove(vnum)
            .ok_or_else(|| AtlasError::UnknownRoom(vnum.to_string()))?;
        if let Some(store) = &self.store {
            store.delete_room(vnum)?;
        }
        info!("刪除房間 {}", vnum);
        Ok(room)
    }

    pub fn set_exit(&mut self, exit: Exit) -> Result<(), AtlasError> {
        let vnum = exit.from_vnum.clone();
        self.update_room(&vnum, |room| room.add_exit(exit))
    }

    pub fn remove_exit(&mut self, vnum: &str, dir: &str) -> Result<Exit, AtlasError> {
        let room = self
            .rooms
            .get_mut(vnum)
            .ok_or_else(|| AtlasError::UnknownRoom(vnum.to_string()))?;
        let exit = room
            .exits
            .remove(dir)
            .or_else(|| room.exits.remove(direction::expand(dir)))
            .ok_or_else(|| AtlasError::UnknownExit {
                vnum: vnum.to_string(),
                direction: dir.to_string(),
            })?;
        self.persist(vnum)?;
        Ok(exit)
    }

    pub fn area(&self, name: &str) -> Option<&Area> {
        self.areas.get(name)
    }

    pub fn areas(&self) -> impl Iterator<Item = &Area> {
        self.areas.values()
    }

    pub fn set_area(&mut self, area: Area) -> Result<(), AtlasError> {
        if let Some(store) = &self.store {
            store.save_area(&area)?;
        }
        self.areas.insert(area.name.clone(), area);
        Ok(())
    }
}
