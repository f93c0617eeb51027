//! Scripted quest runner: a flat list of NPC visits and hunts, no branching.

use crate::client::{GameControl, ENTITY_TYPE_MONSTER};
use crate::nav::locator::LocationResolver;
use crate::nav::navigator::{pause, Navigator};
use crate::nav::routing::RouteSource;
use crate::shutdown::StopSignal;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum QuestStep {
    Talk { npc: String },
    Hunt { monster: String, count: u32 },
}

/// Act 2-1 "build the Noscamp outpost".
pub fn default_script() -> Vec<QuestStep> {
    ["Koaren", "Colly", "Slugg", "Annie", "Mimi Mentor"]
        .into_iter()
        .map(|npc| QuestStep::Talk {
            npc: npc.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestTimings {
    pub npc_walk_wait: Duration,
    pub talk_settle: Duration,
    pub step_pause: Duration,
    pub attack_settle: Duration,
    pub hunt_retry: Duration,
    pub approach_wait: Duration,
    pub hunt_timeout: Duration,
}

impl Default for QuestTimings {
    fn default() -> Self {
        Self {
            npc_walk_wait: Duration::from_millis(1500),
            talk_settle: Duration::from_millis(1500),
            step_pause: Duration::from_millis(2000),
            attack_settle: Duration::from_millis(3000),
            hunt_retry: Duration::from_millis(2000),
            approach_wait: Duration::from_millis(500),
            hunt_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuestReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub interrupted: bool,
}

/// Monsters farther than this (Manhattan) are approached before attacking.
const ATTACK_RANGE: u32 = 2;
const TALK_REQUEST_KIND: u8 = 2;

pub struct QuestRunner<C, S> {
    nav: Navigator<C, S>,
    locator: LocationResolver,
    timings: QuestTimings,
    stop: StopSignal,
}

impl<C: GameControl, S: RouteSource> QuestRunner<C, S> {
    pub fn new(nav: Navigator<C, S>, locator: LocationResolver, timings: QuestTimings) -> Self {
        Self {
            nav,
            locator,
            timings,
            stop: StopSignal::new(),
        }
    }

    /// Stop request checked between steps and between hunt attacks.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn navigator(&mut self) -> &mut Navigator<C, S> {
        &mut self.nav
    }

    /// Runs every step in order. Failed steps are logged and skipped; nothing is undone.
    pub fn run_script(&mut self, steps: &[QuestStep]) -> QuestReport {
        let mut report = QuestReport::default();
        for (index, step) in steps.iter().enumerate() {
            if self.stop.is_triggered() {
                warn!(index = index + 1, total = steps.len(), "quest interrupted");
                report.interrupted = true;
                break;
            }
            info!(index = index + 1, total = steps.len(), ?step, "quest step");
            report.attempted += 1;
            let ok = match step {
                QuestStep::Talk { npc } => self.go_to_npc_and_talk(npc),
                QuestStep::Hunt { monster, count } => self.hunt_monster_by_name(monster, *count) >= *count,
            };
            if ok {
                report.succeeded += 1;
            } else {
                warn!(index = index + 1, ?step, "quest step failed, continuing");
            }
            pause(self.timings.step_pause);
        }
        report.interrupted = self.stop.is_triggered();
        info!(attempted = report.attempted, succeeded = report.succeeded, "quest script finished");
        report
    }

    /// Looks the NPC up by name, travels to its map, walks to it and opens the dialogue.
    pub fn go_to_npc_and_talk(&mut self, name: &str) -> bool {
        let (vnum, npc_name) = match self.nav.dataset().find_npc_by_name(name) {
            Some(record) => (record.id, self.nav.dataset().display_name(record, name).to_string()),
            None => {
                warn!(name, "npc not in dataset");
                return false;
            }
        };
        info!(npc = %npc_name, vnum, "npc resolved");

        let Some(map_id) = self.locator.search_entity_location(vnum) else {
            warn!(npc = %npc_name, vnum, "npc location unknown");
            return false;
        };
        if !self.nav.travel_to_map(map_id) {
            return false;
        }

        let Some((x, y)) = self.nav.dataset().find_npc_on_map(map_id, vnum) else {
            warn!(npc = %npc_name, vnum, map_id, "npc coordinates missing from map file");
            return false;
        };
        info!(npc = %npc_name, x, y, "npc position");
        self.nav.walk_to(x, y, self.timings.npc_walk_wait);

        let visible = match self.nav.control_mut().scene_npcs() {
            Ok(npcs) => npcs,
            Err(err) => {
                warn!(npc = %npc_name, error = %err, "scene npc listing failed");
                return false;
            }
        };
        let Some(entity) = visible.iter().find(|npc| npc.vnum == vnum) else {
            warn!(npc = %npc_name, vnum, "npc not visible in scene");
            return false;
        };

        info!(npc = %npc_name, entity_id = entity.id, "talking");
        let packet = format!("npc_req {} {}", TALK_REQUEST_KIND, entity.id);
        if let Err(err) = self.nav.control_mut().send_packet(&packet) {
            warn!(npc = %npc_name, error = %err, "dialogue request failed");
            return false;
        }
        pause(self.timings.talk_settle);
        true
    }

    /// Attacks visible monsters of the named kind until `count` kills or the hunt
    /// timeout. Returns the kills counted.
    pub fn hunt_monster_by_name(&mut self, name: &str, count: u32) -> u32 {
        let (vnum, monster_name) = match self.nav.dataset().find_monster_by_name(name) {
            Some(record) => (record.id, self.nav.dataset().display_name(record, name).to_string()),
            None => {
                warn!(name, "monster not in dataset");
                return 0;
            }
        };
        info!(monster = %monster_name, vnum, count, "hunting");

        let deadline = Instant::now() + self.timings.hunt_timeout;
        let mut killed = 0;
        while killed < count && Instant::now() < deadline && !self.stop.is_triggered() {
            let visible = match self.nav.control_mut().scene_monsters() {
                Ok(monsters) => monsters,
                Err(err) => {
                    warn!(monster = %monster_name, error = %err, "scene monster listing failed");
                    pause(self.timings.hunt_retry);
                    continue;
                }
            };
            let Some(target) = visible.into_iter().find(|monster| monster.vnum == vnum) else {
                info!(monster = %monster_name, "waiting for target");
                pause(self.timings.hunt_retry);
                continue;
            };

            let in_range = self
                .nav
                .position()
                .map(|position| position.distance_to(target.position.x, target.position.y) <= ATTACK_RANGE)
                .unwrap_or(false);
            if !in_range {
                self.nav
                    .walk_to(target.position.x, target.position.y, self.timings.approach_wait);
            }

            if let Err(err) = self
                .nav
                .control_mut()
                .attack(ENTITY_TYPE_MONSTER, target.id, 0)
            {
                warn!(monster = %monster_name, error = %err, "attack failed");
                pause(self.timings.hunt_retry);
                continue;
            }
            pause(self.timings.attack_settle);
            killed += 1;
            info!(monster = %monster_name, killed, count, "kill counted");
        }

        if killed >= count {
            info!(monster = %monster_name, count, "hunt complete");
        } else {
            warn!(monster = %monster_name, killed, count, "hunt timed out");
        }
        killed
    }
}
