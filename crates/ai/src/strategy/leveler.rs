//! The leveler: gathers stones, coordinates with same-level peers and runs
//! the elevation ritual.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::api::{Resource, Result};
use crate::strategy::Agent;
use crate::team;
use crate::world::requirement_for;

/// Food level at which everything else stops mattering.
const CRITICAL_FOOD: u32 = 5;
/// Food level a leveler is comfortable working with.
const SAFE_FOOD: u32 = 15;
/// Food required before starting a ritual of our own.
const MIN_FOOD_FOR_ELEVATION: u32 = 8;
/// Food required of a joiner before it answers a help request.
const MIN_FOOD_TO_HELP: u32 = 5;
/// Wall-time cap on any ritual state.
const COORDINATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Refused incantations tolerated before giving up.
const MAX_ATTEMPTS: u32 = 2;
/// Steps a joiner walks before abandoning a help request.
const MAX_SEEKING_STEPS: u32 = 40;
/// Ticks between help rebroadcasts while still gathering peers.
const REBROADCAST_CALLING: u64 = 10;
const REBROADCAST_WAITING: u64 = 15;

/// Where a leveler stands in the elevation ritual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ElevationState {
    #[default]
    Idle,
    Gathering,
    Broadcasting,
    Waiting,
    Joining,
    Executing,
}

/// Everything a ritual in progress needs to remember.
///
/// When `state` is [`ElevationState::Idle`], every optional field is empty;
/// only `attempts` may carry over between two tries of the same ritual.
#[derive(Debug, Default)]
pub struct ElevationContext {
    pub state: ElevationState,
    pub attempts: u32,
    pub started_at: Option<Instant>,
    pub help_target: Option<String>,
    pub help_direction: Option<u8>,
    pub steps_toward_target: u32,
    pub last_help_broadcast_tick: u64,
}

impl ElevationContext {
    /// Back to idle with every field cleared, attempts included.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Enters a ritual state, starting the wall clock.
    fn begin(&mut self, state: ElevationState) {
        self.state = state;
        self.started_at = Some(Instant::now());
    }

    /// Records a refused incantation, keeping the attempt count across the
    /// soft reset so the retry budget holds. Returns true once the budget
    /// is exhausted.
    fn record_refusal(&mut self) -> bool {
        let attempts = self.attempts + 1;
        self.reset();
        if attempts >= MAX_ATTEMPTS {
            true
        } else {
            self.attempts = attempts;
            false
        }
    }

    /// Whether the ritual has been stuck past the coordination cap.
    fn timed_out_at(&self, now: Instant) -> bool {
        self.state != ElevationState::Idle
            && self
                .started_at
                .is_some_and(|start| now.duration_since(start) > COORDINATION_TIMEOUT)
    }

    fn timed_out(&self) -> bool {
        self.timed_out_at(Instant::now())
    }
}

impl Agent {
    /// One leveler decision; the first matching priority consumes the tick.
    pub(super) async fn leveler_tick(&mut self) -> Result<()> {
        let food = self.food().await?;
        if food < CRITICAL_FOOD {
            // Survival overrides any ritual, however many peers are here.
            return self.emergency_food_collection().await;
        }

        if self.world.level == 1 && self.can_attempt_level_1().await? {
            return self.attempt_immediate_level_1().await;
        }

        if self.elevation.state != ElevationState::Idle && self.advance_elevation().await? {
            return Ok(());
        }

        if self.elevation.help_target.is_some() && self.navigate_to_help().await? {
            return Ok(());
        }

        if self.can_start_elevation(food).await? {
            return self.start_elevation().await;
        }

        if self.collect_rare_stones().await? {
            return Ok(());
        }

        if food >= SAFE_FOOD
            && !self.world.has_all_elevation_resources()
            && self.gather_missing_stones().await?
        {
            return Ok(());
        }

        if food < SAFE_FOOD && self.collect_food().await? {
            return Ok(());
        }

        self.explore_for_resources().await?;
        // Notice reopened slots even if the survivor is gone.
        self.refresh_team_slots().await?;
        Ok(())
    }

    /// Level 1 only needs ourselves and one linemate on the tile.
    async fn can_attempt_level_1(&mut self) -> Result<bool> {
        if self.world.food_count() < 3 {
            return Ok(false);
        }
        let tile = self.current_tile().await?;
        self.ensure_inventory().await?;
        let in_inventory = self
            .world
            .inventory_any()
            .is_some_and(|inv| inv.count(Resource::Linemate) > 0);
        Ok(tile.has(Resource::Linemate) || in_inventory)
    }

    async fn attempt_immediate_level_1(&mut self) -> Result<()> {
        info!("attempting an immediate level 1 ritual");

        self.ensure_inventory().await?;
        let in_inventory = self
            .world
            .inventory_any()
            .map_or(0, |inv| inv.count(Resource::Linemate));
        if in_inventory > 0
            && !self.cmd_set(Resource::Linemate).await?
            && !self.current_tile().await?.has(Resource::Linemate)
        {
            return Ok(());
        }

        self.elevation.begin(ElevationState::Executing);
        match self.cmd_incantation().await? {
            Some(_) => self.elevation.reset(),
            None => {
                debug!("level 1 ritual refused");
                let attempts = self.elevation.attempts;
                self.elevation.reset();
                self.elevation.attempts = attempts;
            }
        }
        Ok(())
    }

    /// Whether a ritual of our own can start this tick.
    ///
    /// The stones may come from our inventory or already sit on the tile, as
    /// they do after a refused attempt.
    async fn can_start_elevation(&mut self, food: u32) -> Result<bool> {
        if self.elevation.state != ElevationState::Idle || self.elevation.help_target.is_some() {
            return Ok(false);
        }
        if food < MIN_FOOD_FOR_ELEVATION {
            return Ok(false);
        }
        if requirement_for(self.world.level).is_none() {
            return Ok(false);
        }
        self.ensure_inventory().await?;
        if self.world.has_all_elevation_resources() {
            return Ok(true);
        }
        // A refused attempt left the stones on the tile; they still count
        // for the retry.
        if self.elevation.attempts > 0 {
            return self.site_satisfies_stones().await;
        }
        Ok(false)
    }

    /// Whether the current tile already carries every required stone.
    async fn site_satisfies_stones(&mut self) -> Result<bool> {
        let Some(requirement) = requirement_for(self.world.level) else {
            return Ok(false);
        };
        let tile = self.current_tile().await?;
        Ok(Resource::STONES
            .iter()
            .enumerate()
            .all(|(i, &stone)| tile.count(stone) >= requirement.stones[i]))
    }

    async fn start_elevation(&mut self) -> Result<()> {
        let Some(requirement) = requirement_for(self.world.level) else {
            return Ok(());
        };
        let players_needed = requirement.players;
        self.elevation.begin(ElevationState::Gathering);

        if players_needed == 1 {
            return self.attempt_solo_elevation().await;
        }

        if self.prepare_site().await? {
            self.elevation.state = ElevationState::Broadcasting;
            self.broadcast_for_help().await?;
        } else {
            warn!("could not stock the ritual site");
            self.elevation.reset();
        }
        Ok(())
    }

    async fn attempt_solo_elevation(&mut self) -> Result<()> {
        if !self.prepare_site().await? {
            self.elevation.reset();
            return Ok(());
        }

        self.elevation.state = ElevationState::Executing;
        match self.cmd_incantation().await? {
            Some(level) => {
                info!(level, "solo ritual succeeded");
                self.elevation.reset();
            }
            None => {
                if self.elevation.record_refusal() {
                    warn!("ritual refused twice, giving up");
                } else {
                    debug!("ritual refused, one retry left");
                }
            }
        }
        Ok(())
    }

    /// Drops the stones the site is still missing, in canonical order.
    ///
    /// Returns whether the site holds the full requirement afterwards.
    async fn prepare_site(&mut self) -> Result<bool> {
        let Some(requirement) = requirement_for(self.world.level) else {
            return Ok(false);
        };
        self.ensure_inventory().await?;
        let tile = self.current_tile().await?;
        let inventory = self.world.inventory_any().copied().unwrap_or_default();

        let mut plan = Vec::new();
        let mut complete = true;
        for (i, &stone) in Resource::STONES.iter().enumerate() {
            let shortfall = requirement.stones[i].saturating_sub(tile.count(stone));
            let available = inventory.count(stone);
            if shortfall > available {
                complete = false;
            }
            for _ in 0..shortfall.min(available) {
                plan.push(stone);
            }
        }

        let planned = plan.len();
        let mut dropped = 0;
        for stone in plan {
            if self.cmd_set(stone).await? {
                dropped += 1;
                // Let the server commit the drop before the next one.
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        if dropped > 0 {
            debug!(dropped, "stocked the ritual site");
        }
        Ok(complete && dropped == planned)
    }

    async fn broadcast_for_help(&mut self) -> Result<()> {
        let Some(requirement) = requirement_for(self.world.level) else {
            return Ok(());
        };
        let need = requirement.players - 1;
        let message = team::format_elevation_request(
            &self.config.team_name,
            self.world.level,
            need,
            &self.config.unique_id,
        );
        info!(need, "calling same-level peers to the site");
        if self.cmd_broadcast(&message).await? {
            self.elevation.last_help_broadcast_tick = self.world.action_counter;
            self.elevation.state = ElevationState::Waiting;
        }
        Ok(())
    }

    /// Advances an ongoing ritual; returns whether the tick was consumed.
    async fn advance_elevation(&mut self) -> Result<bool> {
        if self.elevation.timed_out() {
            warn!(state = ?self.elevation.state, "ritual timed out, resetting");
            self.elevation.reset();
            return Ok(false);
        }

        match self.elevation.state {
            ElevationState::Waiting => {
                self.wait_for_helpers().await?;
                Ok(true)
            }
            ElevationState::Broadcasting => {
                if self.world.action_counter - self.elevation.last_help_broadcast_tick
                    > REBROADCAST_CALLING
                {
                    self.broadcast_for_help().await?;
                } else {
                    self.refresh_inventory().await?;
                }
                Ok(true)
            }
            ElevationState::Idle
            | ElevationState::Gathering
            | ElevationState::Joining
            | ElevationState::Executing => Ok(false),
        }
    }

    async fn wait_for_helpers(&mut self) -> Result<()> {
        let Some(requirement) = requirement_for(self.world.level) else {
            self.elevation.reset();
            return Ok(());
        };

        // A fresh look both spots arrivals and keeps the action clock
        // moving toward the rebroadcast.
        self.refresh_vision().await?;
        let players = self.world.players_on_current_tile();

        if players >= requirement.players {
            if self.verify_site().await? {
                self.attempt_coordinated_elevation().await?;
            } else {
                debug!("site lost stones, restocking");
                self.prepare_site().await?;
            }
        } else if self.world.action_counter - self.elevation.last_help_broadcast_tick
            > REBROADCAST_WAITING
        {
            self.broadcast_for_help().await?;
        }
        Ok(())
    }

    /// Recounts players and stones right before committing to the ritual.
    async fn verify_site(&mut self) -> Result<bool> {
        let Some(requirement) = requirement_for(self.world.level) else {
            return Ok(false);
        };
        let tile = self.current_tile().await?;
        if tile.players.max(1) < requirement.players {
            return Ok(false);
        }
        Ok(Resource::STONES
            .iter()
            .enumerate()
            .all(|(i, &stone)| tile.count(stone) >= requirement.stones[i]))
    }

    async fn attempt_coordinated_elevation(&mut self) -> Result<()> {
        info!(
            players = self.world.players_on_current_tile(),
            "starting the coordinated ritual"
        );
        self.elevation.state = ElevationState::Executing;
        match self.cmd_incantation().await? {
            Some(level) => {
                info!(level, "coordinated ritual succeeded");
                self.elevation.reset();
            }
            None => {
                if self.elevation.record_refusal() {
                    warn!("ritual refused twice, giving up");
                } else {
                    debug!("ritual refused, one retry left");
                }
            }
        }
        Ok(())
    }

    /// Decides whether to answer a peer's call for ritual helpers.
    pub(super) async fn consider_joining(
        &mut self,
        from_level: u32,
        direction: u8,
        sender: &str,
    ) -> Result<()> {
        if self.world.level != from_level {
            return Ok(());
        }
        if self.elevation.state != ElevationState::Idle || self.elevation.help_target.is_some() {
            return Ok(());
        }
        // Direction 0 means the caller already shares our tile.
        if direction == 0 {
            return Ok(());
        }
        if self.food().await? < MIN_FOOD_TO_HELP {
            return Ok(());
        }

        info!(requester = sender, direction, "joining a ritual");
        self.elevation.help_target = Some(sender.to_owned());
        self.elevation.help_direction = Some(direction);
        self.elevation.steps_toward_target = 0;
        self.elevation.begin(ElevationState::Joining);

        let reply =
            team::format_join_response(&self.config.team_name, sender, &self.config.unique_id);
        self.cmd_broadcast(&reply).await?;
        Ok(())
    }

    /// Walks toward the peer we promised to help; returns whether the tick
    /// was consumed.
    async fn navigate_to_help(&mut self) -> Result<bool> {
        let Some(direction) = self.elevation.help_direction else {
            self.elevation.reset();
            return Ok(false);
        };

        let moved = self.move_towards_broadcast_direction(direction).await?;
        if moved {
            self.elevation.steps_toward_target += 1;

            if self.elevation.steps_toward_target % 3 == 0 && self.arrived_at_site().await? {
                info!("reached the ritual site");
                self.elevation.state = ElevationState::Waiting;
                return Ok(true);
            }
            if self.elevation.steps_toward_target > MAX_SEEKING_STEPS {
                warn!("gave up reaching the ritual site");
                self.elevation.reset();
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// A ritual site is another player plus at least one stone on our tile.
    async fn arrived_at_site(&mut self) -> Result<bool> {
        let tile = self.current_tile().await?;
        Ok(tile.players >= 2 && tile.stone_count() >= 1)
    }

    /// Rare stones are worth a detour whatever the current needs are.
    async fn collect_rare_stones(&mut self) -> Result<bool> {
        let tile = self.current_tile().await?;
        for stone in [Resource::Thystame, Resource::Phiras] {
            if tile.has(stone) && self.cmd_take(stone).await? {
                info!(stone = stone.name(), "picked up a rare stone");
                return Ok(true);
            }
        }
        for stone in [Resource::Thystame, Resource::Phiras] {
            if let Some(tile_index) = self.world.find_resource_in_vision(stone) {
                if tile_index > 0 {
                    self.move_towards_tile(tile_index).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Picks up or walks toward the stones the current level still needs.
    async fn gather_missing_stones(&mut self) -> Result<bool> {
        let mut needed = self.world.needed_resources();
        needed.sort_by_key(|stone| !stone.is_rare());

        let tile = self.current_tile().await?;
        for &stone in &needed {
            if tile.has(stone) && self.cmd_take(stone).await? {
                debug!(stone = stone.name(), "collected a stone");
                return Ok(true);
            }
        }
        for &stone in &needed {
            if let Some(tile_index) = self.world.find_resource_in_vision(stone) {
                if tile_index > 0 {
                    self.move_towards_tile(tile_index).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// One unit of food at a time, unlike the survivor's sweep.
    async fn collect_food(&mut self) -> Result<bool> {
        let tile = self.current_tile().await?;
        if tile.has(Resource::Food) && self.cmd_take(Resource::Food).await? {
            return Ok(true);
        }
        if let Some(tile_index) = self.world.find_resource_in_vision(Resource::Food) {
            if tile_index > 0 {
                self.move_towards_tile(tile_index).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn explore_for_resources(&mut self) -> Result<()> {
        if self.stuck_counter > 5 {
            self.random_turns(1, 3).await?;
            self.stuck_counter = 0;
        }
        if self.world.action_counter % 10 == 0 && rand::rng().random_bool(0.4) {
            self.random_turn().await?;
        }
        self.cmd_forward().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_soft_reset_until_the_budget_runs_out() {
        let mut context = ElevationContext::default();

        context.begin(ElevationState::Executing);
        assert!(!context.record_refusal());
        assert_eq!(context.state, ElevationState::Idle);
        assert_eq!(context.attempts, 1);
        assert!(context.started_at.is_none());

        context.begin(ElevationState::Executing);
        assert!(context.record_refusal());
        assert_eq!(context.state, ElevationState::Idle);
        assert_eq!(context.attempts, 0);
    }

    #[test]
    fn reset_clears_every_field() {
        let mut context = ElevationContext::default();
        context.begin(ElevationState::Waiting);
        context.attempts = 1;
        context.help_target = Some("abc".to_owned());
        context.help_direction = Some(3);
        context.steps_toward_target = 12;
        context.last_help_broadcast_tick = 99;

        context.reset();
        assert_eq!(context.state, ElevationState::Idle);
        assert_eq!(context.attempts, 0);
        assert!(context.started_at.is_none());
        assert!(context.help_target.is_none());
        assert!(context.help_direction.is_none());
        assert_eq!(context.steps_toward_target, 0);
        assert_eq!(context.last_help_broadcast_tick, 0);
    }

    #[test]
    fn ritual_states_abort_past_the_coordination_cap() {
        let mut context = ElevationContext::default();
        assert!(!context.timed_out());

        context.begin(ElevationState::Waiting);
        let start = context.started_at.unwrap();
        assert!(!context.timed_out_at(start + COORDINATION_TIMEOUT));
        assert!(context.timed_out_at(start + COORDINATION_TIMEOUT + Duration::from_secs(1)));

        // Idle never times out, however old the clock is.
        context.reset();
        assert!(!context.timed_out_at(start + COORDINATION_TIMEOUT * 2));
    }
}
