//! 地圖持久化
//!
//! sled 樹 `rooms`（鍵 vnum）、`exits`（鍵 from_vnum + 0x00 + direction）、`areas`（鍵名稱）。
//! 房間與它的出口在同一個交易裡寫入。

use std::collections::HashMap;
use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;
use tracing::debug;

use super::area::Area;
use super::room::{Exit, Room};
use crate::store::{self, StoreError};

fn exit_key(from: &str, direction: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(from.len() + direction.len() + 1);
    key.extend_from_slice(from.as_bytes());
    key.push(0);
    key.extend_from_slice(direction.as_bytes());
    key
}

fn exit_prefix(from: &str) -> Vec<u8> {
    let mut key = from.as_bytes().to_vec();
    key.push(0);
    key
}

pub struct AtlasStore {
    db: sled::Db,
    rooms: sled::Tree,
    exits: sled::Tree,
    areas: sled::Tree,
}

impl AtlasStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_db(store::open_db(path)?)
    }

    pub fn temporary() -> Result<Self, StoreError> {
        Self::with_db(store::temporary_db()?)
    }

    fn with_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            rooms: db.open_tree("rooms")?,
            exits: db.open_tree("exits")?,
            areas: db.open_tree("areas")?,
            db,
        })
    }

    /// 寫入房間並以它的出口取代舊出口
    pub fn save_room(&self, room: &Room) -> Result<(), StoreError> {
        let stale: Vec<sled::IVec> = self
            .exits
            .scan_prefix(exit_prefix(&room.vnum))
            .keys()
            .collect::<Result<_, _>>()?;
        let record = store::encode(room)?;
        let exits = room
            .exits
            .values()
            .map(|e| Ok((exit_key(&room.vnum, &e.direction), store::encode(e)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        (&self.rooms, &self.exits).transaction(
            |(rooms, exit_tree): &(TransactionalTree, TransactionalTree)| {
                rooms.insert(room.vnum.as_bytes(), record.as_slice())?;
                for key in &stale {
                    exit_tree.remove(key)?;
                }
                for (key, value) in &exits {
                    exit_tree.insert(key.as_slice(), value.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            },
        )?;
        self.db.flush()?;
        debug!("房間 {} 已寫入（{} 個出口）", room.vnum, exits.len());
        Ok(())
    }

    pub fn delete_room(&self, vnum: &str) -> Result<(), StoreError> {
        let stale: Vec<sled::IVec> = self
            .exits
            .scan_prefix(exit_prefix(vnum))
            .keys()
            .collect::<Result<_, _>>()?;
        (&self.rooms, &self.exits).transaction(
            |(rooms, exit_tree): &(TransactionalTree, TransactionalTree)| {
                rooms.remove(vnum.as_bytes())?;
                for key in &stale {
                    exit_tree.remove(key)?;
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            },
        )?;
        self.db.flush()?;
        Ok(())
    }

    /// 讀出所有房間（含出口）
    pub fn load_rooms(&self) -> Result<HashMap<String, Room>, StoreError> {
        let mut rooms = HashMap::new();
        for item in self.rooms.iter() {
            let (_, value) = item?;
            let room: Room = store::decode(&value)?;
            rooms.insert(room.vnum.clone(), room);
        }
        for item in self.exits.iter() {
            let (_, value) = item?;
            let exit: Exit = store::decode(&value)?;
            match rooms.get_mut(&exit.from_vnum) {
                Some(room) => room.add_exit(exit),
                None => debug!("略過孤立出口 {} {}", exit.from_vnum, exit.direction),
            }
        }
        Ok(rooms)
    }

    pub fn save_area(&self, area: &Area) -> Result<(), StoreError> {
        self.areas
            .insert(area.name.as_bytes(), store::encode(area)?)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn load_areas(&self) -> Result<Vec<Area>, StoreError> {
        self.areas
            .iter()
            .map(|item| {
                let (_, value) = item?;
                store::decode(&value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::room::UNKNOWN_VNUM;

    fn sample_room() -> Room {
        let mut room = Room::new("3001");
        room.name = "Temple".into();
        room.area = "Midgaard".into();
        room.terrain = "inside".into();
        room.flags.peaceful = true;
        room.add_exit(Exit::new("3001", "north", "3002").weight(1));
        room.add_exit(Exit::new("3001", "down", UNKNOWN_VNUM).door("trapdoor"));
        room
    }

    #[test]
    fn test_save_and_reload_room() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world");
        let room = sample_room();
        {
            let store = AtlasStore::open(&path).unwrap();
            store.save_room(&room).unwrap();
        }
        let store = AtlasStore::open(&path).unwrap();
        let rooms = store.load_rooms().unwrap();
        assert_eq!(rooms.get("3001"), Some(&room));
    }

    #[test]
    fn test_save_replaces_exits() {
        let store = AtlasStore::temporary().unwrap();
        let mut room = sample_room();
        store.save_room(&room).unwrap();
        room.exits.remove("down");
        store.save_room(&room).unwrap();
        let rooms = store.load_rooms().unwrap();
        assert_eq!(rooms["3001"].exits.len(), 1);
    }

    #[test]
    fn test_delete_room() {
        let store = AtlasStore::temporary().unwrap();
        store.save_room(&sample_room()).unwrap();
        store.delete_room("3001").unwrap();
        assert!(store.load_rooms().unwrap().is_empty());
    }

    #[test]
    fn test_areas() {
        let store = AtlasStore::temporary().unwrap();
        let mut area = Area::new("Midgaard");
        area.scout.insert("3014".into());
        store.save_area(&area).unwrap();
        assert_eq!(store.load_areas().unwrap(), vec![area]);
    }
}
