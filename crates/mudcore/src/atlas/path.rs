//! 路徑搜尋
//!
//! 以 Dijkstra 走出口圖。邊的成本 = 目的地地形權重 + 出口權重 + (有門 ? 1 : 0)，
//! 野外路段另加「離目標更遠」的懲罰。

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::direction;
use super::room::Exit;
use super::Atlas;

/// 虛擬出口（home、recall、depart）的權重
pub const VIRTUAL_EXIT_WEIGHT: u32 = 5;

/// 地形權重表，None 代表無法通行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TerrainWeights(BTreeMap<String, Option<u32>>);

impl Default for TerrainWeights {
    fn default() -> Self {
        let table = [
            ("inside", Some(0)),
            ("city", Some(0)),
            ("road", Some(0)),
            ("field", Some(1)),
            ("forest", Some(2)),
            ("hills", Some(3)),
            ("desert", Some(4)),
            ("swamp", Some(4)),
            ("mountain", Some(5)),
            ("water_swim", Some(3)),
            ("water_noswim", None),
            ("underwater", None),
            ("air", None),
        ];
        Self(
            table
                .into_iter()
                .map(|(name, w)| (name.to_string(), w))
                .collect(),
        )
    }
}

impl TerrainWeights {
    /// 未列出的地形權重為 0
    pub fn weight(&self, terrain: &str) -> Option<u32> {
        self.0.get(terrain).copied().unwrap_or(Some(0))
    }

    pub fn set(&mut self, terrain: impl Into<String>, weight: Option<u32>) {
        self.0.insert(terrain.into(), weight);
    }

    /// 以設定檔的值覆蓋
    pub fn merge(&mut self, overrides: &TerrainWeights) {
        for (terrain, weight) in &overrides.0 {
            self.0.insert(terrain.clone(), *weight);
        }
    }
}

/// 玩家狀態：決定等級限制、上鎖的門與虛擬出口
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TravelerState {
    pub level: u32,
    pub keys: HashSet<String>,
    pub home: Option<String>,
    pub recall: Option<String>,
    pub depart: Option<String>,
}

impl TravelerState {
    pub fn has_key(&self, door: &str) -> bool {
        self.keys.contains(door)
    }
}

/// 路徑限制
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathOptions {
    /// 不可進入的房間
    pub avoid: HashSet<String>,
    /// 不受死亡陷阱、地形與區域排除限制的房間
    pub allow: HashSet<String>,
}

/// 路徑中的一步
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// 出發房間
    pub vnum: String,
    pub exit: Exit,
    pub cost: u32,
}

impl Step {
    /// 走這一步要送出的命令
    pub fn commands(&self) -> Vec<String> {
        if let Some(cmd) = &self.exit.command {
            return vec![cmd.clone()];
        }
        let mut cmds = Vec::new();
        if self.exit.closes {
            if let Some(door) = &self.exit.door {
                cmds.push(format!("open {}", door));
            }
        }
        cmds.push(direction::abbreviate(&self.exit.direction).to_string());
        cmds
    }
}

/// 路徑
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub steps: Vec<Step>,
    pub total_cost: u32,
}

impl Route {
    fn from_steps(steps: Vec<Step>) -> Self {
        let total_cost = steps.iter().map(|s| s.cost).sum();
        Self { steps, total_cost }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn destination(&self) -> Option<&str> {
        self.steps.last().map(|s| s.exit.to_vnum.as_str())
    }

    pub fn commands(&self) -> Vec<String> {
        self.steps.iter().flat_map(Step::commands).collect()
    }

    /// 連續同方向壓縮成 `Nd`，以 `;` 串接
    pub fn simplified(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut run: Option<(String, usize)> = None;
        for cmd in self.commands() {
            match &mut run {
                Some((prev, n)) if *prev == cmd && direction::is_direction(&cmd) => *n += 1,
                _ => {
                    if let Some((prev, n)) = run.take() {
                        parts.push(compress(&prev, n));
                    }
                    run = Some((cmd, 1));
                }
            }
        }
        if let Some((prev, n)) = run {
            parts.push(compress(&prev, n));
        }
        parts.join(";")
    }

    /// 從 `vnum` 出發的後半段；不在路徑上時回傳 None
    pub fn truncate_at(&self, vnum: &str) -> Option<Route> {
        let pos = self.steps.iter().position(|s| s.vnum == vnum)?;
        Some(Self::from_steps(self.steps[pos..].to_vec()))
    }
}

fn compress(cmd: &str, n: usize) -> String {
    if n > 1 {
        format!("{}{}", n, cmd)
    } else {
        cmd.to_string()
    }
}

/// 搜尋結果：成本與前驅
pub(crate) struct SearchTree {
    pub from: String,
    pub dist: HashMap<String, u32>,
    prev: HashMap<String, (Exit, u32)>,
    pub reached: Option<String>,
}

impl SearchTree {
    pub fn route_to(&self, target: &str) -> Route {
        let mut steps = Vec::new();
        let mut current = target.to_string();
        while current != self.from {
            let Some((exit, cost)) = self.prev.get(&current) else {
                return Route::default();
            };
            steps.push(Step {
                vnum: exit.from_vnum.clone(),
                exit: exit.clone(),
                cost: *cost,
            });
            current = exit.from_vnum.clone();
        }
        steps.reverse();
        Route::from_steps(steps)
    }
}

impl Atlas {
    /// 某房間可用的出口：存檔的、野外推得的、虛擬的
    pub(crate) fn edges(&self, vnum: &str, traveler: &TravelerState) -> Vec<Exit> {
        let Some(room) = self.rooms.get(vnum) else {
            return Vec::new();
        };
        let mut exits: Vec<Exit> = room.exits.values().cloned().collect();

        if let Some(wild) = &self.wilderness {
            for (dir, to) in wild.neighbours(vnum) {
                let stored = room
                    .exits
                    .keys()
                    .any(|d| direction::expand(d) == dir);
                if !stored && self.rooms.contains_key(&to) {
                    exits.push(Exit::new(vnum, dir, to));
                }
            }
        }

        let virtuals = [
            ("home", &traveler.home),
            ("recall", &traveler.recall),
            ("depart", &traveler.depart),
        ];
        for (name, target) in virtuals {
            let Some(target) = target else { continue };
            if name == "recall" && room.flags.no_recall {
                continue;
            }
            if target != vnum {
                exits.push(
                    Exit::new(vnum, name, target.clone())
                        .weight(VIRTUAL_EXIT_WEIGHT)
                        .command(name),
                );
            }
        }
        exits
    }

    /// 邊的成本；不能走時為 None
    pub(crate) fn edge_cost(
        &self,
        exit: &Exit,
        traveler: &TravelerState,
        opts: &PathOptions,
        goal: Option<&str>,
    ) -> Option<u32> {
        if exit.is_unknown() || opts.avoid.contains(&exit.to_vnum) {
            return None;
        }
        let dest = self.rooms.get(&exit.to_vnum)?;
        let allowed = opts.allow.contains(&exit.to_vnum);
        if exit.max_level.is_some_and(|max| max < traveler.level)
            || exit.min_level.is_some_and(|min| min > traveler.level)
        {
            return None;
        }
        let terrain = match self.terrain.weight(&dest.terrain) {
            Some(w) => w,
            None if allowed => 0,
            None => return None,
        };
        if (dest.flags.deathtrap || exit.deathtrap) && !allowed {
            return None;
        }
        if exit.locks {
            let key = exit.door.as_deref().unwrap_or(&exit.direction);
            if !traveler.has_key(key) {
                return None;
            }
        }

        let mut cost = terrain + exit.weight + u32::from(exit.closes);
        if let (Some(wild), Some(goal)) = (&self.wilderness, goal) {
            if let (Some(before), Some(after)) = (
                wild.distance(&exit.from_vnum, goal),
                wild.distance(&exit.to_vnum, goal),
            ) {
                cost += (after - before).max(0) as u32;
            }
        }
        Some(cost)
    }

    /// Dijkstra；`stop` 回傳 true 時停在該房間
    pub(crate) fn search(
        &self,
        from: &str,
        traveler: &TravelerState,
        opts: &PathOptions,
        goal: Option<&str>,
        within: Option<&dyn Fn(&str) -> bool>,
        budget: Option<u32>,
        mut stop: impl FnMut(&str) -> bool,
    ) -> SearchTree {
        let mut tree = SearchTree {
            from: from.to_string(),
            dist: HashMap::new(),
            prev: HashMap::new(),
            reached: None,
        };
        if !self.rooms.contains_key(from) {
            return tree;
        }
        let mut settled: HashSet<String> = HashSet::new();
        let mut heap = BinaryHeap::new();
        tree.dist.insert(from.to_string(), 0);
        heap.push(Reverse((0u32, from.to_string())));

        while let Some(Reverse((cost, vnum))) = heap.pop() {
            if !settled.insert(vnum.clone()) {
                continue;
            }
            if vnum != from && stop(&vnum) {
                tree.reached = Some(vnum);
                break;
            }
            for exit in self.edges(&vnum, traveler) {
                if let Some(within) = within {
                    if !within(&exit.to_vnum) {
                        continue;
                    }
                }
                let Some(step) = self.edge_cost(&exit, traveler, opts, goal) else {
                    continue;
                };
                let next = cost + step;
                if budget.is_some_and(|b| next > b) {
                    continue;
                }
                let better = tree.dist.get(&exit.to_vnum).map_or(true, |&d| next < d);
                if better && !settled.contains(&exit.to_vnum) {
                    tree.dist.insert(exit.to_vnum.clone(), next);
                    heap.push(Reverse((next, exit.to_vnum.clone())));
                    tree.prev.insert(exit.to_vnum.clone(), (exit, step));
                }
            }
        }
        tree
    }

    /// 最短路徑；起點或終點不在地圖上、或無路可走時回傳空路徑
    pub fn get_path(
        &self,
        from: &str,
        to: &str,
        traveler: &TravelerState,
        opts: &PathOptions,
    ) -> Route {
        if from == to || !self.rooms.contains_key(to) {
            return Route::default();
        }
        let tree = self.search(from, traveler, opts, Some(to), None, None, |v| v == to);
        match tree.reached {
            Some(_) => tree.route_to(to),
            None => Route::default(),
        }
    }

    /// 區域內可到達的房間（BFS 順序，含起點）
    ///
    /// 屬於區域：房間的 area 相同且不在區域的排除名單，或在 `allow` 內。
    pub fn reachable_in_area(
        &self,
        from: &str,
        area: &str,
        allow: &HashSet<String>,
        max_steps: usize,
        traveler: &TravelerState,
    ) -> Vec<String> {
        let member = |vnum: &str| self.in_area(vnum, area, allow);
        if !member(from) {
            return Vec::new();
        }
        let opts = PathOptions {
            allow: allow.clone(),
            ..PathOptions::default()
        };
        let mut seen: HashSet<String> = HashSet::from([from.to_string()]);
        let mut order = vec![from.to_string()];
        let mut frontier = VecDeque::from([(from.to_string(), 0usize)]);
        while let Some((vnum, depth)) = frontier.pop_front() {
            if depth >= max_steps {
                continue;
            }
            for exit in self.edges(&vnum, traveler) {
                if seen.contains(&exit.to_vnum) || !member(&exit.to_vnum) {
                    continue;
                }
                if self.edge_cost(&exit, traveler, &opts, None).is_none() {
                    continue;
                }
                seen.insert(exit.to_vnum.clone());
                order.push(exit.to_vnum.clone());
                frontier.push_back((exit.to_vnum, depth + 1));
            }
        }
        order
    }

    pub(crate) fn in_area(&self, vnum: &str, area: &str, allow: &HashSet<String>) -> bool {
        if allow.contains(vnum) {
            return true;
        }
        let Some(room) = self.rooms.get(vnum) else {
            return false;
        };
        room.area == area
            && !self
                .areas
                .get(area)
                .is_some_and(|a| a.excluded.contains(vnum))
    }
}
