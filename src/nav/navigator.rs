use crate::client::GameControl;
use crate::nav::routing::{RouteProvider, RouteSource};
use crate::world::dataset::GameDataset;
use crate::world::position::{MapId, PlayerPosition};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavState {
    Idle,
    Traveling,
    Arrived,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationSettings {
    /// Wait after commanding the walk onto a portal.
    pub portal_walk_wait: Duration,
    /// Extra wait for the map change to land before the next decision.
    pub portal_settle: Duration,
    /// Route restarts allowed after the live map disagrees with the route.
    pub max_desync_restarts: u32,
}

impl Default for NavigationSettings {
    fn default() -> Self {
        Self {
            portal_walk_wait: Duration::from_millis(2000),
            portal_settle: Duration::from_millis(1500),
            max_desync_restarts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavFailure {
    #[error("player position unavailable")]
    PositionUnavailable,
    #[error("no route from map {from} to map {to}")]
    NoRoute { from: MapId, to: MapId },
    #[error("no portal on map {from} leading to map {to}")]
    PortalNotFound { from: MapId, to: MapId },
    #[error("ended on map {actual} instead of map {target}")]
    WrongMap { target: MapId, actual: MapId },
    #[error("gave up after {restarts} desync restarts")]
    DesyncLimit { restarts: u32 },
}

enum Leg {
    Arrived,
    Desync { expected: MapId, actual: MapId },
}

/// Walks the character across maps portal by portal.
pub struct Navigator<C, S> {
    control: C,
    routes: RouteProvider<S>,
    dataset: Arc<GameDataset>,
    settings: NavigationSettings,
    state: NavState,
    position: Option<PlayerPosition>,
}

impl<C: GameControl, S: RouteSource> Navigator<C, S> {
    pub fn new(
        control: C,
        routes: RouteProvider<S>,
        dataset: Arc<GameDataset>,
        settings: NavigationSettings,
    ) -> Self {
        Self {
            control,
            routes,
            dataset,
            settings,
            state: NavState::Idle,
            position: None,
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    /// Last successfully polled position.
    pub fn position(&self) -> Option<PlayerPosition> {
        self.position
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    pub fn dataset(&self) -> &GameDataset {
        &self.dataset
    }

    /// Polls the game for the live position. A failed poll keeps the previous snapshot.
    pub fn refresh_position(&mut self) -> Option<PlayerPosition> {
        match self.control.player_position() {
            Ok(position) => self.position = Some(position),
            Err(err) => warn!(error = %err, "position refresh failed"),
        }
        self.position
    }

    /// Commands a walk, waits, then re-polls. Control errors are logged only.
    pub fn walk_to(&mut self, x: i32, y: i32, wait: Duration) {
        info!(x, y, "walking");
        if let Err(err) = self.control.walk(x, y) {
            warn!(x, y, error = %err, "walk command failed");
            return;
        }
        pause(wait);
        self.refresh_position();
    }

    pub fn travel_to_map(&mut self, target: MapId) -> bool {
        match self.travel(target) {
            Ok(()) => true,
            Err(failure) => {
                warn!(target_map = target, map = %self.dataset.map_name(target), %failure, "travel failed");
                false
            }
        }
    }

    /// Travels to `target`, restarting from the live map when the game drifts off the
    /// route, at most `max_desync_restarts` times.
    pub fn travel(&mut self, target: MapId) -> Result<(), NavFailure> {
        self.state = NavState::Traveling;
        let mut restarts = 0;
        let result = loop {
            match self.travel_leg(target) {
                Ok(Leg::Arrived) => break Ok(()),
                Ok(Leg::Desync { expected, actual }) => {
                    warn!(expected, actual, restarts, "desync, recomputing route from live map");
                    if restarts >= self.settings.max_desync_restarts {
                        break Err(NavFailure::DesyncLimit { restarts });
                    }
                    restarts += 1;
                }
                Err(failure) => break Err(failure),
            }
        };
        self.state = if result.is_ok() {
            NavState::Arrived
        } else {
            NavState::Failed
        };
        result
    }

    fn travel_leg(&mut self, target: MapId) -> Result<Leg, NavFailure> {
        let current = self.current_map()?;
        if current == target {
            info!(target_map = target, map = %self.dataset.map_name(target), "already on target map");
            return Ok(Leg::Arrived);
        }

        let route = self.routes.get_route(current, target);
        if route.len() < 2 {
            return Err(NavFailure::NoRoute {
                from: current,
                to: target,
            });
        }
        let names: Vec<String> = route.iter().map(|&map| self.dataset.map_name(map)).collect();
        info!(route = %names.join(" -> "), "route");

        for hop in route.windows(2) {
            let (expected, next) = (hop[0], hop[1]);
            let actual = self.current_map()?;
            if actual != expected {
                return Ok(Leg::Desync { expected, actual });
            }

            let portal = self
                .dataset
                .portal_to(expected, next)
                .ok_or(NavFailure::PortalNotFound {
                    from: expected,
                    to: next,
                })?;
            info!(
                from = expected,
                to = next,
                map = %self.dataset.map_name(next),
                x = portal.source_map_x,
                y = portal.source_map_y,
                "taking portal"
            );
            self.walk_to(
                portal.source_map_x,
                portal.source_map_y,
                self.settings.portal_walk_wait,
            );
            pause(self.settings.portal_settle);
        }

        let actual = self.current_map()?;
        if actual == target {
            info!(target_map = target, map = %self.dataset.map_name(target), "arrived");
            Ok(Leg::Arrived)
        } else {
            Err(NavFailure::WrongMap { target, actual })
        }
    }

    /// Live map for travel decisions. A failed poll never falls back to the last snapshot.
    fn current_map(&mut self) -> Result<MapId, NavFailure> {
        match self.control.player_position() {
            Ok(position) => {
                self.position = Some(position);
                Ok(position.map_id)
            }
            Err(err) => {
                warn!(error = %err, "position poll failed");
                Err(NavFailure::PositionUnavailable)
            }
        }
    }
}

pub(crate) fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::client::{ControlError, SceneEntity};
    use crate::nav::routing::{Route, RouteError};
    use crate::persistence::cache::{CacheStore, PATHFINDING};
    use crate::world::map_file::{MapFile, MapFileError, MapSource, Portal};
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::rc::Rc;
    use tempfile::TempDir;

    /// Game stand-in: replays a sequence of positions (the last one repeats) and
    /// records every command.
    #[derive(Default)]
    pub(crate) struct FakeGame {
        pub positions: VecDeque<PlayerPosition>,
        pub current: Option<PlayerPosition>,
        pub walks: Vec<(i32, i32)>,
        pub attacks: Vec<(u8, u32, u32)>,
        pub packets: Vec<String>,
        pub npcs: Vec<SceneEntity>,
        pub monsters: VecDeque<Vec<SceneEntity>>,
        pub polls_fail: bool,
    }

    impl FakeGame {
        pub fn at(maps: &[MapId]) -> Self {
            Self {
                positions: maps.iter().map(|&map| PlayerPosition::new(map, 0, 0)).collect(),
                ..Self::default()
            }
        }
    }

    impl GameControl for FakeGame {
        fn player_position(&mut self) -> Result<PlayerPosition, ControlError> {
            if self.polls_fail {
                return Err(ControlError::Closed);
            }
            if let Some(next) = self.positions.pop_front() {
                self.current = Some(next);
            }
            self.current.ok_or(ControlError::Closed)
        }

        fn walk(&mut self, x: i32, y: i32) -> Result<(), ControlError> {
            self.walks.push((x, y));
            Ok(())
        }

        fn scene_npcs(&mut self) -> Result<Vec<SceneEntity>, ControlError> {
            Ok(self.npcs.clone())
        }

        fn scene_monsters(&mut self) -> Result<Vec<SceneEntity>, ControlError> {
            Ok(self.monsters.pop_front().unwrap_or_default())
        }

        fn attack(&mut self, entity_type: u8, entity_id: u32, skill_id: u32) -> Result<(), ControlError> {
            self.attacks.push((entity_type, entity_id, skill_id));
            Ok(())
        }

        fn send_packet(&mut self, packet: &str) -> Result<(), ControlError> {
            self.packets.push(packet.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct StaticMaps(pub HashMap<MapId, MapFile>);

    impl StaticMaps {
        pub fn portal(mut self, from: MapId, to: MapId, x: i32, y: i32) -> Self {
            self.0.entry(from).or_default().portals.push(Portal {
                destination_map_id: to,
                source_map_x: x,
                source_map_y: y,
            });
            self
        }
    }

    impl MapSource for StaticMaps {
        fn load_map(&self, map_id: MapId) -> Result<Option<MapFile>, MapFileError> {
            Ok(self.0.get(&map_id).cloned())
        }
    }

    /// Route source that must not be reached unless a route is scripted.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingRoutes {
        pub routes: HashMap<(MapId, MapId), Route>,
        pub calls: Rc<RefCell<Vec<(MapId, MapId)>>>,
    }

    impl RouteSource for RecordingRoutes {
        fn fetch_route(&self, from: MapId, to: MapId) -> Result<Route, RouteError> {
            self.calls.borrow_mut().push((from, to));
            self.routes
                .get(&(from, to))
                .cloned()
                .ok_or(RouteError::Status(404))
        }
    }

    pub(crate) fn instant_settings() -> NavigationSettings {
        NavigationSettings {
            portal_walk_wait: Duration::ZERO,
            portal_settle: Duration::ZERO,
            max_desync_restarts: 3,
        }
    }

    struct Fixture {
        _dir: TempDir,
        cache: Arc<CacheStore>,
        calls: Rc<RefCell<Vec<(MapId, MapId)>>>,
        nav: Navigator<FakeGame, RecordingRoutes>,
    }

    fn fixture(game: FakeGame, maps: StaticMaps, routes: RecordingRoutes) -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheStore::open(dir.path()).unwrap());
        let calls = Rc::clone(&routes.calls);
        let dataset = Arc::new(GameDataset::with_source(maps, "fr", 10));
        let provider = RouteProvider::new(Arc::clone(&cache), routes);
        let nav = Navigator::new(game, provider, dataset, instant_settings());
        Fixture {
            _dir: dir,
            cache,
            calls,
            nav,
        }
    }

    fn chain_maps() -> StaticMaps {
        StaticMaps::default()
            .portal(1, 2, 10, 11)
            .portal(2, 3, 20, 21)
            .portal(2, 3, 99, 99)
    }

    #[test]
    fn already_on_target_issues_no_movement() {
        let mut fx = fixture(FakeGame::at(&[3]), chain_maps(), RecordingRoutes::default());

        assert!(fx.nav.travel_to_map(3));
        assert_eq!(fx.nav.state(), NavState::Arrived);
        assert!(fx.nav.control_mut().walks.is_empty());
        assert!(fx.calls.borrow().is_empty());
    }

    #[test]
    fn follows_route_through_first_matching_portals() {
        let mut routes = RecordingRoutes::default();
        routes.routes.insert((1, 3), vec![1, 2, 3]);
        // start, check hop 1, after walk, check hop 2, after walk, final
        let game = FakeGame::at(&[1, 1, 2, 2, 3, 3]);
        let mut fx = fixture(game, chain_maps(), routes);

        assert!(fx.nav.travel_to_map(3));
        assert_eq!(fx.nav.control_mut().walks, vec![(10, 11), (20, 21)]);
        assert_eq!(fx.nav.position().map(|p| p.map_id), Some(3));
        assert!(fx.cache.exists(PATHFINDING, "1_to_3"));
    }

    #[test]
    fn short_route_fails_without_movement() {
        let mut fx = fixture(FakeGame::at(&[1]), chain_maps(), RecordingRoutes::default());
        fx.cache.set(PATHFINDING, "1_to_3", &json!({"from": 1, "to": 3, "path": [1]}));

        assert_eq!(fx.nav.travel(3), Err(NavFailure::NoRoute { from: 1, to: 3 }));
        assert_eq!(fx.nav.state(), NavState::Failed);
        assert!(fx.nav.control_mut().walks.is_empty());

        // Remote failure gives an empty route and the same outcome.
        assert!(!fx.nav.travel_to_map(5));
        assert!(fx.nav.control_mut().walks.is_empty());
    }

    #[test]
    fn desync_recomputes_from_live_map() {
        let mut routes = RecordingRoutes::default();
        routes.routes.insert((1, 3), vec![1, 2, 3]);
        routes.routes.insert((2, 3), vec![2, 3]);
        // Start on 1, but the hop check already sees map 2.
        let game = FakeGame::at(&[1, 2, 2, 2, 3, 3]);
        let mut fx = fixture(game, chain_maps(), routes);

        assert!(fx.nav.travel_to_map(3));
        assert_eq!(*fx.calls.borrow(), vec![(1, 3), (2, 3)]);
        // The stale 1 -> 2 portal was never taken.
        assert_eq!(fx.nav.control_mut().walks, vec![(20, 21)]);
    }

    #[test]
    fn desync_restart_reuses_cached_route_for_new_source() {
        let mut routes = RecordingRoutes::default();
        routes.routes.insert((1, 3), vec![1, 2, 3]);
        let game = FakeGame::at(&[1, 2, 2, 2, 3, 3]);
        let mut fx = fixture(game, chain_maps(), routes);
        fx.cache.set(PATHFINDING, "2_to_3", &json!({"from": 2, "to": 3, "path": [2, 3]}));

        assert!(fx.nav.travel_to_map(3));
        assert_eq!(*fx.calls.borrow(), vec![(1, 3)]);
    }

    #[test]
    fn persistent_desync_is_bounded() {
        let mut routes = RecordingRoutes::default();
        // The service claims the route starts on 1 while the player stays on 4.
        routes.routes.insert((4, 3), vec![1, 2, 3]);
        let mut fx = fixture(FakeGame::at(&[4]), chain_maps(), routes);

        assert_eq!(fx.nav.travel(3), Err(NavFailure::DesyncLimit { restarts: 3 }));
        assert_eq!(fx.nav.state(), NavState::Failed);
        assert!(fx.nav.control_mut().walks.is_empty());
        // Fetched once, then served from cache on every restart.
        assert_eq!(fx.calls.borrow().len(), 1);
    }

    #[test]
    fn missing_portal_fails() {
        let mut routes = RecordingRoutes::default();
        routes.routes.insert((1, 7), vec![1, 7]);
        let mut fx = fixture(FakeGame::at(&[1]), chain_maps(), routes);

        assert_eq!(fx.nav.travel(7), Err(NavFailure::PortalNotFound { from: 1, to: 7 }));
        assert!(fx.nav.control_mut().walks.is_empty());
    }

    #[test]
    fn ending_on_wrong_map_fails() {
        let mut routes = RecordingRoutes::default();
        routes.routes.insert((1, 2), vec![1, 2]);
        // The walk never changes the map.
        let mut fx = fixture(FakeGame::at(&[1]), chain_maps(), routes);

        assert_eq!(fx.nav.travel(2), Err(NavFailure::WrongMap { target: 2, actual: 1 }));
        assert_eq!(fx.nav.control_mut().walks, vec![(10, 11)]);
    }

    #[test]
    fn no_position_fails() {
        let mut fx = fixture(FakeGame::default(), chain_maps(), RecordingRoutes::default());
        assert_eq!(fx.nav.travel(2), Err(NavFailure::PositionUnavailable));
        assert_eq!(fx.nav.state(), NavState::Failed);
    }

    #[test]
    fn failed_poll_does_not_reuse_last_snapshot() {
        let mut fx = fixture(FakeGame::at(&[3]), chain_maps(), RecordingRoutes::default());
        assert_eq!(fx.nav.refresh_position().map(|p| p.map_id), Some(3));

        fx.nav.control_mut().polls_fail = true;
        assert_eq!(fx.nav.travel(3), Err(NavFailure::PositionUnavailable));
        assert_eq!(fx.nav.state(), NavState::Failed);
        assert!(fx.calls.borrow().is_empty());
    }
}
