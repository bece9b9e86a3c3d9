//! 區域巡遊：依區域的策略決定下一步
//!
//! 「未造訪」指 `last_visited` 為空，或早於這趟巡遊開始的時間。

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use super::area::{Area, TourStrategy};
use super::path::{PathOptions, Step, TravelerState};
use super::direction;
use super::room::{Exit, UNKNOWN_VNUM};
use super::{Atlas, AtlasError};

/// NUP 最多比較幾個候選目標
pub const POCKET_CANDIDATES: usize = 8;
/// NUP 候選目標的成本上限
pub const POCKET_BUDGET: u32 = 200;
/// 計算未造訪區塊大小時的上限
pub const POCKET_LIMIT: usize = 30;

impl Atlas {
    fn unvisited(&self, vnum: &str, since: Option<DateTime<Utc>>) -> bool {
        self.rooms.get(vnum).is_some_and(|room| match room.last_visited {
            None => true,
            Some(t) => since.is_some_and(|s| t < s),
        })
    }

    /// 巡遊目標：區域內未造訪的房間，加上必經房間
    fn is_target(&self, area: &Area, vnum: &str, since: Option<DateTime<Utc>>) -> bool {
        let member = self.in_area(vnum, &area.name, &HashSet::new()) || area.scout.contains(vnum);
        member && self.unvisited(vnum, since)
    }

    /// 下一步；區域已走完時回傳 None
    pub fn next_tour_step<R: Rng + ?Sized>(
        &self,
        area_name: &str,
        from: &str,
        traveler: &TravelerState,
        since: Option<DateTime<Utc>>,
        rng: &mut R,
    ) -> Result<Option<Step>, AtlasError> {
        let area = self
            .areas
            .get(area_name)
            .ok_or_else(|| AtlasError::UnknownArea(area_name.to_string()))?;
        if !area.allows_level(traveler.level) {
            return Err(AtlasError::LevelOutOfBand {
                area: area.name.clone(),
                level: traveler.level,
            });
        }
        if !self.rooms.contains_key(from) {
            return Err(AtlasError::UnknownRoom(from.to_string()));
        }

        let step = match area.strategy {
            TourStrategy::LeastRecentlyVisited => self.least_recently_visited(area, from, traveler, rng),
            TourStrategy::NearestUnvisited => self.nearest_unvisited(area, from, traveler, since),
            TourStrategy::NearestUnvisitedPocket => self.smallest_pocket(area, from, traveler, since),
            TourStrategy::Scripted => self.scripted(area, from, traveler),
        };
        Ok(step)
    }

    fn tour_member<'a>(&'a self, area: &'a Area) -> impl Fn(&str) -> bool + 'a {
        let allow: HashSet<String> = area.scout.iter().cloned().collect();
        move |vnum: &str| self.in_area(vnum, &area.name, &allow)
    }

    fn least_recently_visited<R: Rng + ?Sized>(
        &self,
        area: &Area,
        from: &str,
        traveler: &TravelerState,
        rng: &mut R,
    ) -> Option<Step> {
        let member = self.tour_member(area);
        let opts = PathOptions::default();
        let candidates: Vec<(Exit, u32)> = self
            .edges(from, traveler)
            .into_iter()
            .filter(|e| member(&e.to_vnum))
            .filter_map(|e| self.edge_cost(&e, traveler, &opts, None).map(|c| (e, c)))
            .collect();
        let oldest = candidates
            .iter()
            .map(|(e, _)| self.rooms.get(&e.to_vnum).and_then(|r| r.last_visited))
            .min()?;
        let ties: Vec<&(Exit, u32)> = candidates
            .iter()
            .filter(|(e, _)| self.rooms.get(&e.to_vnum).and_then(|r| r.last_visited) == oldest)
            .collect();
        ties.choose(rng).map(|(exit, cost)| Step {
            vnum: from.to_string(),
            exit: exit.clone(),
            cost: *cost,
        })
    }

    fn nearest_unvisited(
        &self,
        area: &Area,
        from: &str,
        traveler: &TravelerState,
        since: Option<DateTime<Utc>>,
    ) -> Option<Step> {
        let member = self.tour_member(area);
        let tree = self.search(
            from,
            traveler,
            &PathOptions::default(),
            None,
            Some(&member),
            None,
            |v| self.is_target(area, v, since),
        );
        let target = tree.reached.as_ref()?;
        tree.route_to(target).steps.into_iter().next()
    }

    fn smallest_pocket(
        &self,
        area: &Area,
        from: &str,
        traveler: &TravelerState,
        since: Option<DateTime<Utc>>,
    ) -> Option<Step> {
        let member = self.tour_member(area);
        let tree = self.search(
            from,
            traveler,
            &PathOptions::default(),
            None,
            Some(&member),
            Some(POCKET_BUDGET),
            |_| false,
        );
        let mut targets: Vec<(&String, u32)> = tree
            .dist
            .iter()
            .filter(|(v, _)| v.as_str() != from && self.is_target(area, v, since))
            .map(|(v, c)| (v, *c))
            .collect();
        targets.sort_by(|a, b| (a.1, a.0).cmp(&(b.1, b.0)));
        targets.truncate(POCKET_CANDIDATES);

        let best = targets
            .into_iter()
            .map(|(vnum, cost)| (self.pocket_size(area, vnum, traveler, since), cost, vnum))
            .min()?;
        tree.route_to(best.2).steps.into_iter().next()
    }

    /// 從 `start` 出發、只經過未造訪房間能碰到的房間數
    fn pocket_size(
        &self,
        area: &Area,
        start: &str,
        traveler: &TravelerState,
        since: Option<DateTime<Utc>>,
    ) -> usize {
        let opts = PathOptions::default();
        let mut seen: HashSet<String> = HashSet::from([start.to_string()]);
        let mut frontier = VecDeque::from([start.to_string()]);
        while let Some(vnum) = frontier.pop_front() {
            if seen.len() >= POCKET_LIMIT {
                break;
            }
            for exit in self.edges(&vnum, traveler) {
                if seen.contains(&exit.to_vnum) || !self.is_target(area, &exit.to_vnum, since) {
                    continue;
                }
                if self.edge_cost(&exit, traveler, &opts, None).is_some() {
                    seen.insert(exit.to_vnum.clone());
                    frontier.push_back(exit.to_vnum);
                }
            }
        }
        seen.len()
    }

    fn scripted(&self, area: &Area, from: &str, traveler: &TravelerState) -> Option<Step> {
        let command = area.script.get(from)?;
        let opts = PathOptions::default();
        let known = self.edges(from, traveler).into_iter().find(|e| {
            e.direction == *command
                || direction::abbreviate(&e.direction) == command.as_str()
        });
        Some(match known {
            Some(exit) => {
                let cost = self.edge_cost(&exit, traveler, &opts, None).unwrap_or(0);
                Step {
                    vnum: from.to_string(),
                    exit,
                    cost,
                }
            }
            None => Step {
                vnum: from.to_string(),
                exit: Exit::new(from, command.clone(), UNKNOWN_VNUM)
                    .command(command.clone()),
                cost: 0,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::room::Room;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn put(atlas: &mut Atlas, vnum: &str, visited: Option<DateTime<Utc>>) {
        let mut room = Room::new(vnum);
        room.area = "Zoo".into();
        room.last_visited = visited;
        atlas.rooms.insert(vnum.into(), room);
    }

    fn link(atlas: &mut Atlas, from: &str, dir: &str, to: &str) {
        if let Some(r) = atlas.rooms.get_mut(from) {
            r.add_exit(Exit::new(from, dir, to));
        }
    }

    fn zoo(strategy: TourStrategy) -> Atlas {
        let mut atlas = Atlas::in_memory();
        let mut area = Area::new("Zoo");
        area.strategy = strategy;
        atlas.areas.insert("Zoo".into(), area);
        atlas
    }

    #[test]
    fn test_unknown_area() {
        let atlas = zoo(TourStrategy::NearestUnvisited);
        let mut rng = StdRng::seed_from_u64(1);
        let err = atlas
            .next_tour_step("Nowhere", "1", &TravelerState::default(), None, &mut rng)
            .unwrap_err();
        assert!(matches!(err, AtlasError::UnknownArea(_)));
    }

    #[test]
    fn test_level_band_enforced() {
        let mut atlas = zoo(TourStrategy::NearestUnvisited);
        atlas.areas.get_mut("Zoo").unwrap().min_level = 10;
        put(&mut atlas, "1", None);
        let mut rng = StdRng::seed_from_u64(1);
        let err = atlas
            .next_tour_step("Zoo", "1", &TravelerState::default(), None, &mut rng)
            .unwrap_err();
        assert!(matches!(err, AtlasError::LevelOutOfBand { .. }));
    }

    #[test]
    fn test_least_recently_visited() {
        let mut atlas = zoo(TourStrategy::LeastRecentlyVisited);
        let now = Utc::now();
        put(&mut atlas, "1", Some(now));
        put(&mut atlas, "2", Some(now - Duration::minutes(5)));
        put(&mut atlas, "3", Some(now - Duration::minutes(60)));
        link(&mut atlas, "1", "north", "2");
        link(&mut atlas, "1", "south", "3");
        let mut rng = StdRng::seed_from_u64(7);
        let step = atlas
            .next_tour_step("Zoo", "1", &TravelerState::default(), None, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(step.exit.to_vnum, "3");
    }

    #[test]
    fn test_nearest_unvisited() {
        let mut atlas = zoo(TourStrategy::NearestUnvisited);
        let now = Utc::now();
        put(&mut atlas, "1", Some(now));
        put(&mut atlas, "2", Some(now));
        put(&mut atlas, "3", None);
        put(&mut atlas, "4", None);
        link(&mut atlas, "1", "north", "2");
        link(&mut atlas, "2", "north", "3");
        link(&mut atlas, "1", "south", "4");
        atlas.rooms.get_mut("1").unwrap().exits.get_mut("south").unwrap().weight = 10;
        let mut rng = StdRng::seed_from_u64(1);
        let step = atlas
            .next_tour_step("Zoo", "1", &TravelerState::default(), None, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(step.exit.direction, "north");
    }

    #[test]
    fn test_tour_done_returns_none() {
        let mut atlas = zoo(TourStrategy::NearestUnvisited);
        let now = Utc::now();
        put(&mut atlas, "1", Some(now));
        put(&mut atlas, "2", Some(now));
        link(&mut atlas, "1", "north", "2");
        let mut rng = StdRng::seed_from_u64(1);
        let step = atlas
            .next_tour_step("Zoo", "1", &TravelerState::default(), None, &mut rng)
            .unwrap();
        assert!(step.is_none());
        // 巡遊開始時間之後才算造訪過
        let step = atlas
            .next_tour_step(
                "Zoo",
                "1",
                &TravelerState::default(),
                Some(now + Duration::seconds(1)),
                &mut rng,
            )
            .unwrap();
        assert_eq!(step.map(|s| s.exit.to_vnum), Some("2".to_string()));
    }

    #[test]
    fn test_smallest_pocket_first() {
        let mut atlas = zoo(TourStrategy::NearestUnvisitedPocket);
        let now = Utc::now();
        put(&mut atlas, "1", Some(now));
        // 北邊一間孤立的未造訪房間，南邊三間相連
        put(&mut atlas, "n1", None);
        put(&mut atlas, "s1", None);
        put(&mut atlas, "s2", None);
        put(&mut atlas, "s3", None);
        link(&mut atlas, "1", "north", "n1");
        link(&mut atlas, "1", "south", "s1");
        link(&mut atlas, "s1", "south", "s2");
        link(&mut atlas, "s2", "south", "s3");
        link(&mut atlas, "s3", "north", "s2");
        link(&mut atlas, "s2", "north", "s1");
        link(&mut atlas, "s1", "north", "1");
        atlas.rooms.get_mut("1").unwrap().exits.get_mut("north").unwrap().weight = 2;
        let mut rng = StdRng::seed_from_u64(1);
        let step = atlas
            .next_tour_step("Zoo", "1", &TravelerState::default(), None, &mut rng)
            .unwrap()
            .unwrap();
        assert_eq!(step.exit.to_vnum, "n1");
    }

    #[test]
    fn test_scripted() {
        let mut atlas = zoo(TourStrategy::Scripted);
        put(&mut atlas, "1", None);
        put(&mut atlas, "2", None);
        link(&mut atlas, "1", "north", "2");
        let area = atlas.areas.get_mut("Zoo").unwrap();
        area.script.insert("1".into(), "n".into());
        area.script.insert("2".into(), "pull lever".into());
        let mut rng = StdRng::seed_from_u64(1);
        let traveler = TravelerState::default();
        let step = atlas.next_tour_step("Zoo", "1", &traveler, None, &mut rng).unwrap().unwrap();
        assert_eq!(step.exit.to_vnum, "2");
        let step = atlas.next_tour_step("Zoo", "2", &traveler, None, &mut rng).unwrap().unwrap();
        assert_eq!(step.commands(), vec!["pull lever"]);
    }
}
