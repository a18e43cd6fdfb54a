#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const ELEMENTS_SMALL: usize = 4_096;
pub const ELEMENTS_MED: usize = 262_144;
pub const ELEMENTS_LARGE: usize = 4_194_304;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Agent {
    pub wealth: f32,
    pub id: u32,
}

impl hetsort::SortElement for Agent {}

pub fn random_u32(len: usize, seed: u64) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random()).collect()
}

pub fn random_f64(len: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-1.0e9..1.0e9)).collect()
}

pub fn random_agents(len: usize, seed: u64) -> Vec<Agent> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len as u32)
        .map(|id| Agent { wealth: rng.random_range(0.0..1.0e4), id })
        .collect()
}
