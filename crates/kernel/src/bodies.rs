//! Simple entity bodies for demos and tests.

use glam::Vec3;

use crate::entity::{TickContext, TickError, Tickable};

/// Moves by a constant velocity every step.
#[derive(Debug, Clone)]
pub struct Drifter {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl Drifter {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }
}

impl Tickable for Drifter {
    fn tick(&mut self, _ctx: &TickContext) -> Result<(), TickError> {
        self.position += self.velocity;
        Ok(())
    }

    fn position(&self) -> Vec3 {
        self.position
    }
}

/// Never moves; counts its own steps.
#[derive(Debug, Clone, Default)]
pub struct Resting {
    pub position: Vec3,
    pub steps: u64,
}

impl Resting {
    pub fn at(position: Vec3) -> Self {
        Self { position, steps: 0 }
    }
}

impl Tickable for Resting {
    fn tick(&mut self, _ctx: &TickContext) -> Result<(), TickError> {
        self.steps += 1;
        Ok(())
    }

    fn position(&self) -> Vec3 {
        self.position
    }
}
