//! Core flocking simulation shared across the FlockSim workspace.
//!
//! Each step the flock is advanced by three local steering rules
//! (separation, alignment, cohesion) evaluated against grid-discovered
//! neighbors only, writing into a second state buffer that swaps roles with
//! the first once every agent has been processed.

pub use flocksim_index::{IndexError, UniformGrid};

use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Sub};
use std::time::{Duration, Instant};
use thiserror::Error;

/// 2D vector used for positions, velocities, and steering forces.
///
/// All operations are total over finite floats; normalizing the zero vector
/// returns the zero vector rather than raising an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    /// The zero vector.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean norm.
    #[must_use]
    pub fn magnitude_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Euclidean norm.
    #[must_use]
    pub fn magnitude(self) -> f32 {
        self.magnitude_sq().sqrt()
    }

    /// Unit vector in the same direction, or the zero vector unchanged.
    #[must_use]
    pub fn normalized(self) -> Self {
        let mag = self.magnitude();
        if mag > 0.0 { self / mag } else { self }
    }

    /// Rescale in place to magnitude at most `max`; a vector already within
    /// bound is left untouched.
    pub fn limit(&mut self, max: f32) {
        let mag = self.magnitude();
        if mag > max {
            *self = *self / mag * max;
        }
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, scalar: f32) -> Self {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

impl Div<f32> for Vec2 {
    type Output = Self;

    fn div(self, scalar: f32) -> Self {
        Self::new(self.x / scalar, self.y / scalar)
    }
}

/// A point agent: position plus velocity.
///
/// Identity is the index in the store; the population is fixed for the
/// lifetime of a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Boid {
    pub position: Vec2,
    pub velocity: Vec2,
}

impl Boid {
    /// Construct a new agent.
    #[must_use]
    pub const fn new(position: Vec2, velocity: Vec2) -> Self {
        Self { position, velocity }
    }
}

/// Errors surfaced while configuring or constructing a simulation.
#[derive(Debug, Error)]
pub enum FlockError {
    /// Indicates a configuration value that cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The current and next buffers must hold the same population.
    #[error("state buffer length mismatch: current={current}, next={next}")]
    BufferMismatch { current: usize, next: usize },
    /// Propagated spatial index construction failure.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Static configuration for a flock run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlockConfig {
    /// Width of the simulation plane in world units.
    pub world_width: f32,
    /// Height of the simulation plane in world units.
    pub world_height: f32,
    /// Distance under which neighbors contribute to alignment and cohesion.
    pub view_radius: f32,
    /// Distance under which neighbors contribute to separation.
    pub separation_radius: f32,
    /// Upper bound on agent speed per step.
    pub max_speed: f32,
    /// Upper bound on the steering force applied per step.
    pub max_force: f32,
    /// Weight of the separation rule in the combined acceleration.
    pub separation_weight: f32,
    /// Weight of the alignment rule in the combined acceleration.
    pub alignment_weight: f32,
    /// Weight of the cohesion rule in the combined acceleration.
    pub cohesion_weight: f32,
    /// Edge length of one grid cell. Must be at least the largest interaction
    /// radius so the 3×3 stencil covers every agent in range; defaults to
    /// twice the view radius.
    pub cell_size: f32,
    /// Soft boundary band: a coordinate past `dimension + wrap_margin` is
    /// teleported to `-wrap_margin` (and symmetrically).
    pub wrap_margin: f32,
    /// Number of steps a run executes.
    pub steps: u32,
    /// Build the grid with the partition-then-merge parallel path.
    pub parallel_grid_build: bool,
    /// Optional RNG seed for reproducible populations.
    pub rng_seed: Option<u64>,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            world_width: 1000.0,
            world_height: 800.0,
            view_radius: 100.0,
            separation_radius: 20.0,
            max_speed: 3.0,
            max_force: 0.1,
            separation_weight: 2.0,
            alignment_weight: 1.0,
            cohesion_weight: 1.5,
            cell_size: 200.0,
            wrap_margin: 5.0,
            steps: 600,
            parallel_grid_build: false,
            rng_seed: None,
        }
    }
}

impl FlockConfig {
    /// Validate the configuration before a simulation is built.
    fn validate(&self) -> Result<(), FlockError> {
        if !self.world_width.is_finite()
            || !self.world_height.is_finite()
            || self.world_width <= 0.0
            || self.world_height <= 0.0
        {
            return Err(FlockError::InvalidConfig(
                "world dimensions must be positive and finite",
            ));
        }
        if !self.view_radius.is_finite() || self.view_radius <= 0.0 {
            return Err(FlockError::InvalidConfig("view_radius must be positive"));
        }
        if !self.separation_radius.is_finite() || self.separation_radius <= 0.0 {
            return Err(FlockError::InvalidConfig(
                "separation_radius must be positive",
            ));
        }
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(FlockError::InvalidConfig("cell_size must be positive"));
        }
        if self.cell_size < self.view_radius || self.cell_size < self.separation_radius {
            return Err(FlockError::InvalidConfig(
                "cell_size must cover the largest interaction radius",
            ));
        }
        if !self.max_speed.is_finite() || self.max_speed <= 0.0 {
            return Err(FlockError::InvalidConfig("max_speed must be positive"));
        }
        if !self.max_force.is_finite() || self.max_force < 0.0 {
            return Err(FlockError::InvalidConfig("max_force must be non-negative"));
        }
        if !(self.separation_weight.is_finite()
            && self.alignment_weight.is_finite()
            && self.cohesion_weight.is_finite())
            || self.separation_weight < 0.0
            || self.alignment_weight < 0.0
            || self.cohesion_weight < 0.0
        {
            return Err(FlockError::InvalidConfig(
                "rule weights must be non-negative and finite",
            ));
        }
        if !self.wrap_margin.is_finite() || self.wrap_margin < 0.0 {
            return Err(FlockError::InvalidConfig(
                "wrap_margin must be non-negative",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, generating a seed from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Storage seam over the two memory layouts.
///
/// Implementations hold position and velocity for a fixed population. The
/// stepper reads one store and scatters into another, so the layout can
/// change without touching the steering rules.
pub trait AgentStore: Send + Sync + Sized {
    /// Store with `population` zero-initialized agents.
    #[must_use]
    fn with_population(population: usize) -> Self;

    /// Number of agents held.
    fn len(&self) -> usize;

    /// Returns true when the store holds no agents.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Position of agent `index`.
    fn position(&self, index: usize) -> Vec2;

    /// Velocity of agent `index`.
    fn velocity(&self, index: usize) -> Vec2;

    /// Overwrite agent `index`.
    fn set(&mut self, index: usize, position: Vec2, velocity: Vec2);

    /// Flat `(x, y)` snapshot of every position in index order, consumed by
    /// the grid rebuild.
    fn position_pairs(&self) -> Vec<(f32, f32)> {
        (0..self.len())
            .map(|index| {
                let position = self.position(index);
                (position.x, position.y)
            })
            .collect()
    }

    /// Data-parallel scatter: write `compute(index)` into every row.
    ///
    /// Each worker owns a disjoint set of rows, so the phase needs no locks;
    /// the call returns only after every row has been written.
    fn par_fill<F>(&mut self, compute: F)
    where
        F: Fn(usize) -> (Vec2, Vec2) + Sync;
}

/// Array-of-structures store: one [`Boid`] record per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoidVec {
    boids: Vec<Boid>,
}

impl BoidVec {
    /// Wrap an existing population.
    #[must_use]
    pub fn from_boids(boids: Vec<Boid>) -> Self {
        Self { boids }
    }

    /// Borrow the agents as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Boid] {
        &self.boids
    }
}

impl AgentStore for BoidVec {
    fn with_population(population: usize) -> Self {
        Self {
            boids: vec![Boid::default(); population],
        }
    }

    fn len(&self) -> usize {
        self.boids.len()
    }

    fn position(&self, index: usize) -> Vec2 {
        self.boids[index].position
    }

    fn velocity(&self, index: usize) -> Vec2 {
        self.boids[index].velocity
    }

    fn set(&mut self, index: usize, position: Vec2, velocity: Vec2) {
        self.boids[index] = Boid::new(position, velocity);
    }

    fn par_fill<F>(&mut self, compute: F)
    where
        F: Fn(usize) -> (Vec2, Vec2) + Sync,
    {
        self.boids
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, boid)| {
                let (position, velocity) = compute(index);
                *boid = Boid::new(position, velocity);
            });
    }
}

/// Structure-of-arrays store: one scalar column per field.
///
/// Semantically identical to [`BoidVec`]; the flat columns change how the
/// scatter vectorizes, nothing else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoidColumns {
    pos_x: Vec<f32>,
    pos_y: Vec<f32>,
    vel_x: Vec<f32>,
    vel_y: Vec<f32>,
}

impl BoidColumns {
    /// Immutable access to the position x column.
    #[must_use]
    pub fn pos_x(&self) -> &[f32] {
        &self.pos_x
    }

    /// Immutable access to the position y column.
    #[must_use]
    pub fn pos_y(&self) -> &[f32] {
        &self.pos_y
    }

    /// Immutable access to the velocity x column.
    #[must_use]
    pub fn vel_x(&self) -> &[f32] {
        &self.vel_x
    }

    /// Immutable access to the velocity y column.
    #[must_use]
    pub fn vel_y(&self) -> &[f32] {
        &self.vel_y
    }
}

impl AgentStore for BoidColumns {
    fn with_population(population: usize) -> Self {
        Self {
            pos_x: vec![0.0; population],
            pos_y: vec![0.0; population],
            vel_x: vec![0.0; population],
            vel_y: vec![0.0; population],
        }
    }

    fn len(&self) -> usize {
        self.pos_x.len()
    }

    fn position(&self, index: usize) -> Vec2 {
        Vec2::new(self.pos_x[index], self.pos_y[index])
    }

    fn velocity(&self, index: usize) -> Vec2 {
        Vec2::new(self.vel_x[index], self.vel_y[index])
    }

    fn set(&mut self, index: usize, position: Vec2, velocity: Vec2) {
        self.pos_x[index] = position.x;
        self.pos_y[index] = position.y;
        self.vel_x[index] = velocity.x;
        self.vel_y[index] = velocity.y;
    }

    fn par_fill<F>(&mut self, compute: F)
    where
        F: Fn(usize) -> (Vec2, Vec2) + Sync,
    {
        self.pos_x
            .par_iter_mut()
            .zip(self.pos_y.par_iter_mut())
            .zip(self.vel_x.par_iter_mut())
            .zip(self.vel_y.par_iter_mut())
            .enumerate()
            .for_each(|(index, (((px, py), vx), vy))| {
                let (position, velocity) = compute(index);
                *px = position.x;
                *py = position.y;
                *vx = velocity.x;
                *vy = velocity.y;
            });
    }
}

/// Visit every flockmate candidate of agent `index`: all agents stored in
/// the 3×3 cell neighborhood around its position, excluding the agent
/// itself.
///
/// Exclusion is by index, not by value, so two agents sharing a position
/// still see each other. `visit` receives the flockmate's index, the offset
/// from the flockmate to the agent, and their distance; the rules apply
/// their own radius cut on top.
pub fn for_each_flockmate<S: AgentStore>(
    store: &S,
    grid: &UniformGrid,
    index: usize,
    mut visit: impl FnMut(usize, Vec2, f32),
) {
    let position = store.position(index);
    let (cell_x, cell_y) = grid.cell_coords(position.x, position.y);
    grid.for_each_neighbor(cell_x, cell_y, |other| {
        if other == index {
            return;
        }
        let offset = position - store.position(other);
        visit(other, offset, offset.magnitude());
    });
}

/// Inverse-square repulsion from flockmates closer than the separation
/// radius. Zero matching neighbors yields the zero vector.
fn separation<S: AgentStore>(
    store: &S,
    grid: &UniformGrid,
    config: &FlockConfig,
    index: usize,
) -> Vec2 {
    let mut steer = Vec2::ZERO;
    let mut count = 0u32;
    for_each_flockmate(store, grid, index, |_, offset, dist| {
        if dist < config.separation_radius {
            steer += offset.normalized() / (dist * dist);
            count += 1;
        }
    });
    if count > 0 {
        steer = (steer / count as f32).normalized() * config.max_speed - store.velocity(index);
        steer.limit(config.max_force);
    }
    steer
}

/// Velocity matching with linear falloff over the view radius.
fn alignment<S: AgentStore>(
    store: &S,
    grid: &UniformGrid,
    config: &FlockConfig,
    index: usize,
) -> Vec2 {
    let mut sum = Vec2::ZERO;
    let mut count = 0u32;
    for_each_flockmate(store, grid, index, |other, _, dist| {
        if dist < config.view_radius {
            let weight = (config.view_radius - dist) / config.view_radius;
            sum += store.velocity(other) * weight;
            count += 1;
        }
    });
    if count == 0 {
        return Vec2::ZERO;
    }
    let mut steer = (sum / count as f32).normalized() * config.max_speed - store.velocity(index);
    steer.limit(config.max_force);
    steer
}

/// Steering toward the centroid of flockmates within the view radius.
fn cohesion<S: AgentStore>(
    store: &S,
    grid: &UniformGrid,
    config: &FlockConfig,
    index: usize,
) -> Vec2 {
    let mut center = Vec2::ZERO;
    let mut count = 0u32;
    for_each_flockmate(store, grid, index, |other, _, dist| {
        if dist < config.view_radius {
            center += store.position(other);
            count += 1;
        }
    });
    if count == 0 {
        return Vec2::ZERO;
    }
    let centroid = center / count as f32;
    let desired = (centroid - store.position(index)).normalized() * config.max_speed;
    let mut steer = desired - store.velocity(index);
    steer.limit(config.max_force);
    steer
}

/// Torus-style teleport with a soft margin: crossing `extent + margin`
/// relocates to exactly `-margin`, and symmetrically. Never reflects, never
/// clamps.
fn wrap_coordinate(value: f32, extent: f32, margin: f32) -> f32 {
    if value < -margin {
        extent + margin
    } else if value > extent + margin {
        -margin
    } else {
        value
    }
}

/// Next state of agent `index`: weighted rule combination clamped to max
/// force, velocity integrated and clamped to max speed, position advanced
/// and wrapped.
fn compute_next<S: AgentStore>(
    store: &S,
    grid: &UniformGrid,
    config: &FlockConfig,
    index: usize,
) -> (Vec2, Vec2) {
    let sep = separation(store, grid, config, index) * config.separation_weight;
    let ali = alignment(store, grid, config, index) * config.alignment_weight;
    let coh = cohesion(store, grid, config, index) * config.cohesion_weight;

    let mut acceleration = sep + ali + coh;
    acceleration.limit(config.max_force);

    let mut velocity = store.velocity(index) + acceleration;
    velocity.limit(config.max_speed);

    let mut position = store.position(index) + velocity;
    position.x = wrap_coordinate(position.x, config.world_width, config.wrap_margin);
    position.y = wrap_coordinate(position.y, config.world_height, config.wrap_margin);

    (position, velocity)
}

/// Double-buffered flock stepper.
///
/// Owns two state buffers whose "current"/"next" roles swap each step. The
/// grid rebuild completes before any force is evaluated, and the role swap
/// happens only after every next-state write has finished; between those two
/// barriers the force phase reads the current buffer and grid and writes
/// disjoint rows of the next buffer.
#[derive(Debug)]
pub struct Simulation<S> {
    config: FlockConfig,
    current: S,
    next: S,
    grid: UniformGrid,
    steps_done: u32,
}

impl<S: AgentStore> Simulation<S> {
    /// Build a simulation over pre-initialized equal-length buffers.
    pub fn new(config: FlockConfig, current: S, next: S) -> Result<Self, FlockError> {
        config.validate()?;
        if current.is_empty() {
            return Err(FlockError::InvalidConfig("population must be non-zero"));
        }
        if current.len() != next.len() {
            return Err(FlockError::BufferMismatch {
                current: current.len(),
                next: next.len(),
            });
        }
        let grid = UniformGrid::new(config.world_width, config.world_height, config.cell_size)?;
        Ok(Self {
            config,
            current,
            next,
            grid,
            steps_done: 0,
        })
    }

    /// Advance the flock by one step: rebuild the grid from the current
    /// buffer, evaluate every agent into the next buffer in parallel, then
    /// exchange the buffer roles.
    pub fn step(&mut self) {
        let pairs = self.current.position_pairs();
        if self.config.parallel_grid_build {
            self.grid.par_rebuild(&pairs);
        } else {
            self.grid.rebuild(&pairs);
        }

        let Self {
            config,
            current,
            next,
            grid,
            ..
        } = self;
        let current = &*current;
        let grid = &*grid;
        let config = &*config;
        next.par_fill(|index| compute_next(current, grid, config, index));

        std::mem::swap(&mut self.current, &mut self.next);
        self.steps_done += 1;
    }

    /// Run the configured number of steps, returning elapsed wall-clock time.
    pub fn run(&mut self) -> Duration {
        let start = Instant::now();
        while !self.finished() {
            self.step();
        }
        start.elapsed()
    }

    /// Steps completed so far.
    #[must_use]
    pub const fn steps_completed(&self) -> u32 {
        self.steps_done
    }

    /// Whether the configured step count has been reached.
    #[must_use]
    pub const fn finished(&self) -> bool {
        self.steps_done >= self.config.steps
    }

    /// Read-only view of the freshest state buffer.
    #[must_use]
    pub fn current(&self) -> &S {
        &self.current
    }

    /// The simulation configuration.
    #[must_use]
    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    /// The spatial index in its most recently rebuilt state.
    #[must_use]
    pub fn grid(&self) -> &UniformGrid {
        &self.grid
    }
}

/// Seed `population` agents uniformly at random: positions anywhere in the
/// domain, velocities in a random direction at max speed.
///
/// Returns the pair of equal-length buffers a [`Simulation`] starts from.
pub fn seed_uniform<S: AgentStore>(
    config: &FlockConfig,
    population: usize,
    rng: &mut SmallRng,
) -> (S, S) {
    let mut current = S::with_population(population);
    for index in 0..population {
        let position = Vec2::new(
            rng.random_range(0.0..config.world_width),
            rng.random_range(0.0..config.world_height),
        );
        let direction = Vec2::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0));
        current.set(index, position, direction.normalized() * config.max_speed);
    }
    (current, S::with_population(population))
}

/// Seed `population` agents on a regular `ceil(sqrt(n))` lattice with
/// radially-outward velocities from the domain center.
pub fn seed_lattice<S: AgentStore>(config: &FlockConfig, population: usize) -> (S, S) {
    let side = (population as f32).sqrt().ceil() as usize;
    let spacing_x = config.world_width / side as f32;
    let spacing_y = config.world_height / side as f32;
    let center_x = config.world_width / 2.0;
    let center_y = config.world_height / 2.0;

    let mut current = S::with_population(population);
    for index in 0..population {
        let row = index / side;
        let col = index % side;
        let position = Vec2::new(
            col as f32 * spacing_x + spacing_x / 2.0,
            row as f32 * spacing_y + spacing_y / 2.0,
        );
        let angle = (position.y - center_y).atan2(position.x - center_x);
        current.set(
            index,
            position,
            Vec2::new(angle.cos(), angle.sin()) * config.max_speed,
        );
    }
    (current, S::with_population(population))
}

/// Seed a uniform-random population from the config's RNG seed and run the
/// configured number of steps, returning elapsed wall-clock time.
pub fn run_timed<S: AgentStore>(
    config: &FlockConfig,
    population: usize,
) -> Result<Duration, FlockError> {
    let mut rng = config.seeded_rng();
    let (current, next) = seed_uniform::<S>(config, population, &mut rng);
    let mut simulation = Simulation::new(config.clone(), current, next)?;
    Ok(simulation.run())
}
