//! The decision engine driving the agent.
//!
//! One tick of the loop: drain the events gathered by the reader task, then
//! let the role strategy issue commands. Every command goes through a
//! tracked wrapper that advances the action counter, maintains the caches
//! and swallows recoverable protocol errors; only a lost connection or our
//! own death ends the loop.

pub mod leveler;
pub mod movement;
pub mod survivor;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::api::{Event, Handshake, Resource, Result, Tile, ZappyClient};
use crate::args::AgentConfig;
use crate::spawner::Spawner;
use crate::team::{self, TeamMessage};
use crate::world::World;

use self::leveler::ElevationContext;

/// Which job this agent performs for the team.
///
/// The decision is taken once, shortly after startup, and never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Undetermined,
    Survivor,
    Leveler,
}

pub struct Agent {
    pub(crate) client: ZappyClient,
    pub(crate) world: World,
    pub(crate) config: AgentConfig,
    pub(crate) role: Role,
    pub(crate) spawner: Spawner,
    pub(crate) elevation: ElevationContext,
    /// Consecutive failed forward steps.
    pub(crate) stuck_counter: u32,
    role_check_sent: bool,
    role_probe_tick: u64,
    role_responses: u32,
    last_status_tick: u64,
}

impl Agent {
    pub fn new(client: ZappyClient, handshake: &Handshake, config: AgentConfig) -> Self {
        Self {
            client,
            world: World::new(handshake),
            config,
            role: Role::Undetermined,
            spawner: Spawner::new(),
            elevation: ElevationContext::default(),
            stuck_counter: 0,
            role_check_sent: false,
            role_probe_tick: 0,
            role_responses: 0,
            last_status_tick: 0,
        }
    }

    /// Runs the strategy loop until death or a lost connection.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            id = %self.config.unique_id,
            team = %self.config.team_name,
            map_width = self.world.map_width,
            map_height = self.world.map_height,
            slots = self.world.open_team_slots,
            "agent ready"
        );

        loop {
            self.process_events().await?;
            if self.client.is_dead() {
                info!("starved to death, stopping");
                self.spawner.sweep();
                return Ok(());
            }

            let tick = match self.role {
                Role::Undetermined => self.determine_role().await,
                Role::Survivor => self.survivor_tick().await,
                Role::Leveler => self.leveler_tick().await,
            };
            if let Err(err) = tick {
                if self.client.is_dead() {
                    info!("starved to death, stopping");
                    self.spawner.sweep();
                    return Ok(());
                }
                return Err(err);
            }

            self.report_status();
        }
    }

    /// Reaps finished teammate processes; called on shutdown.
    pub fn sweep_children(&mut self) {
        self.spawner.sweep();
    }

    /// Handles the events the reader task queued since the last tick.
    ///
    /// Runs on the strategy's context, so replies may be sent from here.
    async fn process_events(&mut self) -> Result<()> {
        for event in self.client.poll_events() {
            match event {
                Event::Dead => {}
                Event::Ejected { direction } => {
                    debug!(direction, "ejected, our surroundings are stale");
                    self.world.invalidate_caches();
                }
                Event::Broadcast { direction, text } => {
                    self.handle_team_broadcast(direction, &text).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_team_broadcast(&mut self, direction: u8, text: &str) -> Result<()> {
        let Some(message) = team::parse(&self.config.team_name, text) else {
            return Ok(());
        };

        match message {
            TeamMessage::RoleCheck { sender } if sender != self.config.unique_id => {
                match self.role {
                    Role::Undetermined => self.role_responses += 1,
                    Role::Survivor => {
                        let reply = team::format_survivor_exists(
                            &self.config.team_name,
                            &self.config.unique_id,
                        );
                        self.cmd_broadcast(&reply).await?;
                    }
                    Role::Leveler => {}
                }
            }
            TeamMessage::SurvivorExists { sender } if sender != self.config.unique_id => {
                if self.role == Role::Undetermined {
                    self.role_responses += 1;
                }
            }
            TeamMessage::ElevationRequest {
                from_level, sender, ..
            } if sender != self.config.unique_id => {
                self.consider_joining(from_level, direction, &sender).await?;
            }
            TeamMessage::JoinResponse { to, from } => {
                if to == self.config.unique_id {
                    debug!(helper = %from, "a peer is on its way to our site");
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Decides between survivor and leveler, once.
    ///
    /// A probe broadcast goes out early; if nobody claims to be (or to look
    /// for) a survivor within the listening window, we take the job.
    async fn determine_role(&mut self) -> Result<()> {
        if self.world.action_counter < 3 && !self.role_check_sent {
            let probe = team::format_role_check(&self.config.team_name, &self.config.unique_id);
            self.cmd_broadcast(&probe).await?;
            self.role_check_sent = true;
            self.role_probe_tick = self.world.action_counter;
            return Ok(());
        }

        if self.role_check_sent && self.world.action_counter - self.role_probe_tick < 2 {
            // Listening window: keep the action clock moving while replies
            // trickle in.
            self.refresh_inventory().await?;
            return Ok(());
        }

        if self.role_responses == 0 && self.world.action_counter < 15 {
            self.role = Role::Survivor;
            info!("nobody answered the role probe, taking the survivor role");
            self.immediate_survivor_setup().await?;
            self.survivor_tick().await?;
        } else {
            self.role = Role::Leveler;
            info!(
                responses = self.role_responses,
                "a survivor exists, taking the leveler role"
            );
        }
        Ok(())
    }

    fn report_status(&mut self) {
        if self.world.action_counter - self.last_status_tick < 50 {
            return;
        }
        self.last_status_tick = self.world.action_counter;
        info!(
            role = ?self.role,
            level = self.world.level,
            food = self.world.food_count(),
            actions = self.world.action_counter,
            facing = self.world.facing,
            elevation = ?self.elevation.state,
            team_size = self.spawner.active_children() + 1,
            "status"
        );
    }

    /// Keeps recoverable command failures out of the strategy's way.
    fn absorb<T>(&mut self, result: Result<T>, command: &str) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                debug!(command, error = %err, "command failed");
                Ok(None)
            }
        }
    }

    pub(crate) async fn cmd_forward(&mut self) -> Result<bool> {
        let result = self.client.forward().await;
        self.world.bump_action();
        match self.absorb(result, "Forward")? {
            Some(true) => {
                self.stuck_counter = 0;
                self.world.invalidate_caches();
                Ok(true)
            }
            _ => {
                self.stuck_counter += 1;
                Ok(false)
            }
        }
    }

    pub(crate) async fn cmd_turn_left(&mut self) -> Result<bool> {
        let result = self.client.turn_left().await;
        self.world.bump_action();
        match self.absorb(result, "Left")? {
            Some(true) => {
                self.world.facing = (self.world.facing + 3) % 4;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) async fn cmd_turn_right(&mut self) -> Result<bool> {
        let result = self.client.turn_right().await;
        self.world.bump_action();
        match self.absorb(result, "Right")? {
            Some(true) => {
                self.world.facing = (self.world.facing + 1) % 4;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) async fn cmd_take(&mut self, resource: Resource) -> Result<bool> {
        let result = self.client.take(resource).await;
        self.world.bump_action();
        match self.absorb(result, "Take")? {
            Some(true) => {
                self.world.invalidate_caches();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) async fn cmd_set(&mut self, resource: Resource) -> Result<bool> {
        let result = self.client.set(resource).await;
        self.world.bump_action();
        match self.absorb(result, "Set")? {
            Some(true) => {
                self.world.invalidate_caches();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) async fn cmd_broadcast(&mut self, text: &str) -> Result<bool> {
        let result = self.client.broadcast(text).await;
        self.world.bump_action();
        Ok(self.absorb(result, "Broadcast")? == Some(true))
    }

    pub(crate) async fn cmd_fork(&mut self) -> Result<bool> {
        let result = self.client.fork().await;
        self.world.bump_action();
        match self.absorb(result, "Fork")? {
            Some(true) => {
                self.world.invalidate_caches();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Runs the incantation; on success the level is taken from the
    /// server's answer.
    pub(crate) async fn cmd_incantation(&mut self) -> Result<Option<u32>> {
        let result = self.client.incantation().await;
        self.world.bump_action();
        match self.absorb(result, "Incantation")? {
            Some(Some(level)) => {
                info!(level, "leveled up");
                self.world.level = level;
                self.world.invalidate_caches();
                Ok(Some(level))
            }
            _ => Ok(None),
        }
    }

    pub(crate) async fn refresh_inventory(&mut self) -> Result<()> {
        let result = self.client.inventory().await;
        self.world.bump_action();
        if let Some(inventory) = self.absorb(result, "Inventory")? {
            self.world.store_inventory(inventory);
        }
        Ok(())
    }

    pub(crate) async fn ensure_inventory(&mut self) -> Result<()> {
        if self.world.inventory_fresh().is_none() {
            self.refresh_inventory().await?;
        }
        Ok(())
    }

    pub(crate) async fn refresh_vision(&mut self) -> Result<()> {
        let result = self.client.look().await;
        self.world.bump_action();
        if let Some(tiles) = self.absorb(result, "Look")? {
            self.world.store_vision(tiles);
        }
        Ok(())
    }

    pub(crate) async fn ensure_vision(&mut self) -> Result<()> {
        if self.world.vision_fresh().is_none() {
            self.refresh_vision().await?;
        }
        Ok(())
    }

    /// Current food reserve, refreshing the inventory when stale.
    pub(crate) async fn food(&mut self) -> Result<u32> {
        self.ensure_inventory().await?;
        Ok(self.world.food_count())
    }

    /// Refreshes the open-slot count through `Connect_nbr`.
    pub(crate) async fn refresh_team_slots(&mut self) -> Result<u32> {
        let result = self.client.connect_nbr().await;
        self.world.bump_action();
        if let Some(slots) = self.absorb(result, "Connect_nbr")? {
            self.world.open_team_slots = slots;
        }
        Ok(self.world.open_team_slots)
    }

    /// The tile we are standing on, refreshing vision when stale.
    pub(crate) async fn current_tile(&mut self) -> Result<Tile> {
        self.ensure_vision().await?;
        Ok(self.world.current_tile().copied().unwrap_or_default())
    }

    /// Takes every food unit on the current tile, returning how many.
    pub(crate) async fn take_all_food_here(&mut self) -> Result<u32> {
        let on_tile = self.current_tile().await?.count(Resource::Food);
        let mut taken = 0;
        for _ in 0..on_tile {
            if self.cmd_take(Resource::Food).await? {
                taken += 1;
            } else {
                break;
            }
        }
        if taken > 0 {
            debug!(
                taken,
                food = self.world.food_count(),
                "collected food from the current tile"
            );
        }
        Ok(taken)
    }

    /// Grabs food here, else heads for the closest visible food.
    pub(crate) async fn collect_food_aggressively(&mut self) -> Result<bool> {
        let mut found = self.take_all_food_here().await? > 0;

        self.ensure_vision().await?;
        let target = self.world.vision_any().and_then(|tiles| {
            tiles
                .iter()
                .enumerate()
                .skip(1)
                .take(8)
                .find(|(_, tile)| tile.has(Resource::Food))
                .map(|(index, _)| index)
        });
        if let Some(tile) = target {
            debug!(tile, "heading for visible food");
            self.move_towards_tile(tile).await?;
            found = true;
        }
        Ok(found)
    }

    /// Exploration that only cares about food.
    pub(crate) async fn explore_for_food_only(&mut self) -> Result<()> {
        if self.take_all_food_here().await? > 0 {
            return Ok(());
        }
        if self.collect_food_aggressively().await? {
            return Ok(());
        }

        if self.stuck_counter > 2 {
            self.random_turns(1, 2).await?;
            self.stuck_counter = 0;
        }
        if rand::rng().random_bool(0.6) {
            self.random_turn().await?;
        }
        if !self.cmd_forward().await? {
            self.random_turn().await?;
        }
        Ok(())
    }

    /// Last-resort food hunt; drops any ongoing coordination first.
    pub(crate) async fn emergency_food_collection(&mut self) -> Result<()> {
        warn!(food = self.world.food_count(), "emergency food collection");
        self.elevation.reset();

        if self.take_all_food_here().await? > 0 {
            return Ok(());
        }
        if self.collect_food_aggressively().await? {
            return Ok(());
        }

        if rand::rng().random_bool(0.8) {
            self.random_turns(1, 3).await?;
        }
        if !self.cmd_forward().await? {
            self.cmd_turn_right().await?;
            self.cmd_forward().await?;
        }
        Ok(())
    }
}
