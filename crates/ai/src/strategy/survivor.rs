//! The survivor: stays at level 1, keeps itself fed, and grows the team.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::api::Result;
use crate::spawner::MAX_TEAM_MEMBERS;
use crate::strategy::Agent;

/// Ticks a fork must wait after the previous one.
const FORK_COOLDOWN: u64 = 6;

impl Agent {
    /// One survivor decision; the first matching priority consumes the
    /// tick.
    pub(super) async fn survivor_tick(&mut self) -> Result<()> {
        self.spawner.sweep();

        let food = self.food().await?;
        if food <= 2 {
            return self.emergency_food_collection().await;
        }
        if food <= 4 {
            if self.collect_food_aggressively().await? {
                return Ok(());
            }
            return self.explore_for_food_only().await;
        }

        let slots = self.refresh_team_slots().await?;
        if slots > 0 && food >= 6 && self.should_spawn(slots, food) {
            return self.spawn_team_members(slots).await;
        }

        if slots == 0
            && food >= 15
            && self.world.action_counter - self.spawner.last_fork_tick > FORK_COOLDOWN
        {
            info!("no slots left, laying an egg");
            if self.cmd_fork().await? {
                self.spawner.last_fork_tick = self.world.action_counter;
                return Ok(());
            }
        }

        if food < 12 && self.collect_food_aggressively().await? {
            return Ok(());
        }
        if food < 20 && self.collect_food_aggressively().await? {
            return Ok(());
        }

        self.explore_and_support().await
    }

    /// Fills every open slot the moment the survivor role is taken, then
    /// lets the regular ladder run in the same tick.
    pub(super) async fn immediate_survivor_setup(&mut self) -> Result<()> {
        let slots = self.refresh_team_slots().await?;
        if slots == 0 {
            return Ok(());
        }
        info!(slots, "filling every open slot immediately");
        for _ in 0..slots {
            if let Err(err) = self.spawner.spawn_peer(&self.config) {
                warn!(error = %err, "failed to spawn a teammate");
                break;
            }
        }
        self.spawner.last_spawn_tick = 0;
        Ok(())
    }

    fn should_spawn(&mut self, slots: u32, food: u32) -> bool {
        let min_food = if slots >= 3 && food >= 12 { 6 } else { 8 };
        if food < min_food {
            debug!(food, "not enough food to spawn yet");
            return false;
        }
        if self.spawner.active_children() + 1 >= MAX_TEAM_MEMBERS {
            return false;
        }
        // Many open slots warrant a tighter spawn cadence.
        let cooldown: u64 = if slots >= 3 { 2 } else { 3 };
        self.world.action_counter - self.spawner.last_spawn_tick > cooldown
    }

    /// Spawns a batch of peers sized by the food reserve.
    async fn spawn_team_members(&mut self, slots: u32) -> Result<()> {
        let active = self.spawner.active_children();
        let slots_to_fill = (slots as usize).min(MAX_TEAM_MEMBERS.saturating_sub(active + 1));
        let food = self.food().await?;

        let mut batch: usize = match food {
            20.. => 4,
            15.. => 3,
            10.. => 2,
            _ => 1,
        };
        if slots >= 4 && food >= 8 {
            debug!(slots, "many open slots, boosting the batch");
            batch += 1;
        }
        let batch = batch.min(slots_to_fill);
        let reserve = if batch > 1 { 6 } else { 4 };

        let mut spawned = 0;
        for _ in 0..batch {
            if self.food().await? < reserve {
                debug!("food too low to keep spawning");
                break;
            }
            if let Err(err) = self.spawner.spawn_peer(&self.config) {
                warn!(error = %err, "failed to spawn a teammate");
                break;
            }
            spawned += 1;
            // Give each child a head start on the connection queue.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        if spawned > 0 {
            self.spawner.last_spawn_tick = self.world.action_counter;
            info!(
                spawned,
                food = self.world.food_count(),
                "spawned teammates"
            );
        }
        Ok(())
    }

    /// Wanders, eating whatever food shows up and leaving stones behind for
    /// the levelers.
    async fn explore_and_support(&mut self) -> Result<()> {
        if self.take_all_food_here().await? > 0 {
            return Ok(());
        }

        if self.stuck_counter > 5 {
            self.random_turns(1, 3).await?;
            self.stuck_counter = 0;
        }

        let tile = self.current_tile().await?;
        if tile.stone_count() > 0 {
            debug!("stones here, leaving them to the levelers");
            self.random_turn().await?;
        }
        if self.world.action_counter % 8 == 0 && rand::rng().random_bool(0.3) {
            self.random_turn().await?;
        }
        self.cmd_forward().await?;
        Ok(())
    }
}
