//! Cached view of the game as far as this agent can tell.
//!
//! The world is owned by the strategy loop; the reader task never touches
//! it. Vision and inventory are cached with an action-counter stamp: vision
//! survives one action, inventory two, and any successful mutating command
//! drops both immediately.

use crate::api::{Handshake, Inventory, Resource, Tile};

/// How many actions an inventory snapshot stays usable.
const INVENTORY_MAX_AGE: u64 = 2;
/// How many actions a look result stays usable.
const VISION_MAX_AGE: u64 = 1;

/// What one elevation takes: co-located same-level players and stones on
/// the tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub players: u32,
    /// Stone counts, indexed like [`Resource::STONES`].
    pub stones: [u32; 6],
}

impl Requirement {
    pub fn stone_count(&self, stone: Resource) -> u32 {
        Resource::STONES
            .iter()
            .position(|&s| s == stone)
            .map_or(0, |i| self.stones[i])
    }
}

/// Requirements for elevating from level `i + 1`.
const ELEVATION_REQUIREMENTS: [Requirement; 7] = [
    Requirement { players: 1, stones: [1, 0, 0, 0, 0, 0] },
    Requirement { players: 2, stones: [1, 1, 1, 0, 0, 0] },
    Requirement { players: 2, stones: [2, 0, 1, 0, 2, 0] },
    Requirement { players: 4, stones: [1, 1, 2, 0, 1, 0] },
    Requirement { players: 4, stones: [1, 2, 1, 3, 0, 0] },
    Requirement { players: 6, stones: [1, 2, 3, 0, 1, 0] },
    Requirement { players: 6, stones: [2, 2, 2, 2, 2, 1] },
];

/// Returns what elevating from `level` takes, or `None` at the level cap.
pub fn requirement_for(level: u32) -> Option<&'static Requirement> {
    match level {
        1..=7 => Some(&ELEVATION_REQUIREMENTS[(level - 1) as usize]),
        _ => None,
    }
}

#[derive(Debug)]
struct Cached<T> {
    value: T,
    stamp: u64,
}

/// The agent's view of the game.
#[derive(Debug)]
pub struct World {
    /// Current elevation level, 1 to 8.
    pub level: u32,
    pub map_width: u32,
    pub map_height: u32,
    /// Unused team slots, from the handshake and `Connect_nbr`.
    pub open_team_slots: u32,
    /// Quarter turns away from the initial direction, 0 to 3.
    pub facing: u8,
    /// Monotonic count of issued commands; drives cache aging and cooldowns.
    pub action_counter: u64,
    inventory: Option<Cached<Inventory>>,
    vision: Option<Cached<Vec<Tile>>>,
}

impl World {
    pub fn new(handshake: &Handshake) -> Self {
        Self {
            level: 1,
            map_width: handshake.width,
            map_height: handshake.height,
            open_team_slots: handshake.open_team_slots,
            facing: 0,
            action_counter: 0,
            inventory: None,
            vision: None,
        }
    }

    /// Records that one more command has been issued.
    pub fn bump_action(&mut self) {
        self.action_counter += 1;
    }

    /// Drops both caches, after a successful mutating command.
    pub fn invalidate_caches(&mut self) {
        self.inventory = None;
        self.vision = None;
    }

    pub fn store_inventory(&mut self, inventory: Inventory) {
        self.inventory = Some(Cached {
            value: inventory,
            stamp: self.action_counter,
        });
    }

    pub fn store_vision(&mut self, tiles: Vec<Tile>) {
        self.vision = Some(Cached {
            value: tiles,
            stamp: self.action_counter,
        });
    }

    /// The cached inventory, only while it is fresh enough to act on.
    pub fn inventory_fresh(&self) -> Option<&Inventory> {
        self.inventory
            .as_ref()
            .filter(|c| self.action_counter - c.stamp <= INVENTORY_MAX_AGE)
            .map(|c| &c.value)
    }

    /// The last known inventory, however old.
    pub fn inventory_any(&self) -> Option<&Inventory> {
        self.inventory.as_ref().map(|c| &c.value)
    }

    /// The cached look result, only while it is fresh enough to act on.
    pub fn vision_fresh(&self) -> Option<&[Tile]> {
        self.vision
            .as_ref()
            .filter(|c| self.action_counter - c.stamp <= VISION_MAX_AGE)
            .map(|c| c.value.as_slice())
    }

    pub fn vision_any(&self) -> Option<&[Tile]> {
        self.vision.as_ref().map(|c| c.value.as_slice())
    }

    /// Food units from the last known inventory; food is life.
    pub fn food_count(&self) -> u32 {
        self.inventory_any().map_or(0, Inventory::food)
    }

    /// The tile the agent is standing on, if a look result is known.
    pub fn current_tile(&self) -> Option<&Tile> {
        self.vision_any().and_then(|tiles| tiles.first())
    }

    /// Number of players on our tile, ourselves included.
    pub fn players_on_current_tile(&self) -> u32 {
        self.current_tile().map_or(1, |tile| tile.players.max(1))
    }

    /// Smallest tile index where `resource` is visible.
    pub fn find_resource_in_vision(&self, resource: Resource) -> Option<usize> {
        self.vision_any()?
            .iter()
            .position(|tile| tile.has(resource))
    }

    /// Stones our inventory is still short of for the current level, in
    /// canonical order.
    pub fn needed_resources(&self) -> Vec<Resource> {
        let Some(requirement) = requirement_for(self.level) else {
            return Vec::new();
        };
        let empty = Inventory::default();
        let inventory = self.inventory_any().unwrap_or(&empty);

        Resource::STONES
            .iter()
            .copied()
            .filter(|&stone| inventory.count(stone) < requirement.stone_count(stone))
            .collect()
    }

    /// Whether every stone for the current level is in our inventory.
    pub fn has_all_elevation_resources(&self) -> bool {
        requirement_for(self.level).is_some() && self.needed_resources().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_world() -> World {
        World::new(&Handshake {
            width: 10,
            height: 10,
            open_team_slots: 3,
        })
    }

    #[test]
    fn requirement_table_matches_the_rules() {
        let first = requirement_for(1).unwrap();
        assert_eq!(first.players, 1);
        assert_eq!(first.stone_count(Resource::Linemate), 1);
        assert_eq!(first.stones.iter().sum::<u32>(), 1);

        let last = requirement_for(7).unwrap();
        assert_eq!(last.players, 6);
        assert_eq!(last.stone_count(Resource::Thystame), 1);
        assert_eq!(last.stones, [2, 2, 2, 2, 2, 1]);

        assert!(requirement_for(8).is_none());
        assert!(requirement_for(0).is_none());
    }

    #[test]
    fn inventory_cache_survives_two_actions() {
        let mut world = test_world();
        let mut inventory = Inventory::default();
        inventory.set_count(Resource::Food, 5);
        world.store_inventory(inventory);

        world.bump_action();
        world.bump_action();
        assert!(world.inventory_fresh().is_some());

        world.bump_action();
        assert!(world.inventory_fresh().is_none());
        // The stale value is still available as a fallback.
        assert_eq!(world.food_count(), 5);
    }

    #[test]
    fn vision_cache_survives_one_action() {
        let mut world = test_world();
        world.store_vision(vec![Tile::default()]);

        world.bump_action();
        assert!(world.vision_fresh().is_some());
        world.bump_action();
        assert!(world.vision_fresh().is_none());
    }

    #[test]
    fn mutating_commands_drop_both_caches() {
        let mut world = test_world();
        world.store_inventory(Inventory::default());
        world.store_vision(vec![Tile::default()]);

        world.invalidate_caches();
        assert!(world.inventory_any().is_none());
        assert!(world.vision_any().is_none());
    }

    #[test]
    fn needed_resources_report_the_shortfall_in_order() {
        let mut world = test_world();
        world.level = 2;
        let mut inventory = Inventory::default();
        inventory.set_count(Resource::Deraumere, 1);
        world.store_inventory(inventory);

        assert_eq!(
            world.needed_resources(),
            vec![Resource::Linemate, Resource::Sibur]
        );
        assert!(!world.has_all_elevation_resources());

        let mut full = inventory;
        full.set_count(Resource::Linemate, 1);
        full.set_count(Resource::Sibur, 1);
        world.store_inventory(full);
        assert!(world.has_all_elevation_resources());
    }

    #[test]
    fn level_cap_never_wants_resources() {
        let mut world = test_world();
        world.level = 8;
        world.store_inventory(Inventory::default());
        assert!(world.needed_resources().is_empty());
        assert!(!world.has_all_elevation_resources());
    }

    #[test]
    fn tile_queries_default_when_blind() {
        let world = test_world();
        assert_eq!(world.players_on_current_tile(), 1);
        assert!(world.find_resource_in_vision(Resource::Food).is_none());
        assert!(world.current_tile().is_none());
    }
}
