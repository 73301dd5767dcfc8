//! Navigation primitives shared by both roles.

use rand::Rng;

use crate::api::Result;
use crate::strategy::Agent;

/// One movement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Left,
    Right,
    Forward,
}

use Step::*;

/// Steps bringing a visible tile within reach.
///
/// Only the three tiles adjacent in the first vision row are addressed
/// precisely; anything further degrades to a plain forward step and gets
/// refined on the next look.
pub fn tile_approach(tile: usize) -> &'static [Step] {
    match tile {
        0 => &[],
        1 => &[Left, Forward],
        2 => &[Forward],
        3 => &[Right, Forward],
        _ => &[Forward],
    }
}

/// Steps toward the source of a broadcast heard from direction `k`.
///
/// Direction 2 is ambiguous between straight ahead and ahead-right; `coin`
/// picks one so repeated attempts do not always walk the same line.
pub fn broadcast_approach(k: u8, coin: bool) -> &'static [Step] {
    match k {
        1 => &[Left, Forward],
        2 if coin => &[Forward],
        2 => &[Right, Forward],
        3 | 4 => &[Right, Forward],
        5 => &[Right, Right, Forward],
        6 | 7 | 8 => &[Left, Forward],
        _ => &[Forward],
    }
}

impl Agent {
    /// Walks one step toward a tile index from the last look result.
    pub(super) async fn move_towards_tile(&mut self, tile: usize) -> Result<bool> {
        self.execute_steps(tile_approach(tile)).await
    }

    /// Walks one step toward the origin of a broadcast.
    pub(super) async fn move_towards_broadcast_direction(&mut self, k: u8) -> Result<bool> {
        let coin = rand::rng().random_bool(0.5);
        self.execute_steps(broadcast_approach(k, coin)).await
    }

    /// Runs a movement sequence, reporting whether the final step succeeded.
    async fn execute_steps(&mut self, steps: &[Step]) -> Result<bool> {
        let mut outcome = true;
        for step in steps {
            outcome = match step {
                Left => self.cmd_turn_left().await?,
                Right => self.cmd_turn_right().await?,
                Forward => self.cmd_forward().await?,
            };
        }
        Ok(outcome)
    }

    /// Turns a random direction once.
    pub(super) async fn random_turn(&mut self) -> Result<()> {
        if rand::rng().random_bool(0.5) {
            self.cmd_turn_right().await?;
        } else {
            self.cmd_turn_left().await?;
        }
        Ok(())
    }

    /// Turns a random direction between `min` and `max` times.
    pub(super) async fn random_turns(&mut self, min: u32, max: u32) -> Result<()> {
        let turns = rand::rng().random_range(min..=max);
        for _ in 0..turns {
            self.random_turn().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_tiles_are_addressed_precisely() {
        assert_eq!(tile_approach(0), &[] as &[Step]);
        assert_eq!(tile_approach(1), &[Left, Forward]);
        assert_eq!(tile_approach(2), &[Forward]);
        assert_eq!(tile_approach(3), &[Right, Forward]);
    }

    #[test]
    fn distant_tiles_degrade_to_forward() {
        for tile in 4..20 {
            assert_eq!(tile_approach(tile), &[Forward]);
        }
    }

    #[test]
    fn broadcast_directions_map_to_turn_sequences() {
        assert_eq!(broadcast_approach(1, false), &[Left, Forward]);
        assert_eq!(broadcast_approach(2, true), &[Forward]);
        assert_eq!(broadcast_approach(2, false), &[Right, Forward]);
        assert_eq!(broadcast_approach(3, false), &[Right, Forward]);
        assert_eq!(broadcast_approach(4, false), &[Right, Forward]);
        assert_eq!(broadcast_approach(5, false), &[Right, Right, Forward]);
        for k in 6..=8 {
            assert_eq!(broadcast_approach(k, false), &[Left, Forward]);
        }
    }

    #[test]
    fn every_direction_ends_with_a_forward_step() {
        for k in 1..=8 {
            for coin in [false, true] {
                assert_eq!(broadcast_approach(k, coin).last(), Some(&Forward));
            }
        }
    }
}
