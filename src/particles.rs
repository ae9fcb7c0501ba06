// Particle simulation state
//
// Each frame slot owns one particle array. The compute pass of slot i reads
// the array written by the previous slot and writes its own, so a dispatch
// never reads and writes the same buffer.

use bytemuck::{Pod, Zeroable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::TAU;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SimulationConfig;
use crate::frame::FRAMES_IN_FLIGHT;

/// One particle as laid out in the storage buffer (std430, 32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub color: [f32; 3],
    pub orientation: f32,
}

/// Slot whose array the compute pass of `current` reads from.
pub fn read_slot(current: usize) -> usize {
    (current + FRAMES_IN_FLIGHT - 1) % FRAMES_IN_FLIGHT
}

/// Launch parameters for a burst
#[derive(Debug, Clone, Copy)]
pub struct SpawnParams {
    pub spawn_radius: f32,
    pub min_speed: f32,
    pub max_speed: f32,
}

impl From<&SimulationConfig> for SpawnParams {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            spawn_radius: config.spawn_radius,
            min_speed: config.min_speed,
            max_speed: config.max_speed,
        }
    }
}

/// Launch a new burst: every particle starts at one shared random center
/// and flies off with its own heading, speed, orientation and color.
pub fn randomize<R: Rng>(rng: &mut R, params: &SpawnParams, particles: &mut [Particle]) {
    // Equi-area sampling of the disk
    let r = params.spawn_radius * rng.gen::<f32>().sqrt();
    let phi = rng.gen::<f32>() * TAU;
    let center = [r * phi.cos(), r * phi.sin()];

    for particle in particles.iter_mut() {
        let orientation = rng.gen::<f32>() * TAU;
        let heading = rng.gen::<f32>() * TAU;
        let xi = rng.gen::<f32>();
        let speed = (params.max_speed - params.min_speed) * xi + params.min_speed;

        *particle = Particle {
            position: center,
            velocity: [speed * heading.cos(), speed * heading.sin()],
            color: [rng.gen(), rng.gen(), rng.gen()],
            orientation,
        };
    }
}

/// CPU mirror of the compute pass: `previous` advanced by `dt` into `current`.
#[cfg(test)]
pub fn integrate(previous: &[Particle], current: &mut [Particle], dt: f32) {
    for (src, dst) in previous.iter().zip(current.iter_mut()) {
        *dst = Particle {
            position: [
                src.position[0] + src.velocity[0] * dt,
                src.position[1] + src.velocity[1] * dt,
            ],
            ..*src
        };
    }
}

/// Seed taken once per process from the wall clock
pub fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Owns the RNG and produces launch snapshots for the frame slots.
pub struct ParticleState {
    rng: StdRng,
    params: SpawnParams,
    count: usize,
}

impl ParticleState {
    pub fn new(config: &SimulationConfig) -> Self {
        let seed = config.seed.unwrap_or_else(clock_seed);
        log::info!(
            "Particle simulation: {} particles, seed {}",
            config.particle_count,
            seed
        );

        Self {
            rng: StdRng::seed_from_u64(seed),
            params: SpawnParams::from(config),
            count: config.particle_count as usize,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Fresh burst for a single slot
    pub fn launch(&mut self) -> Vec<Particle> {
        let mut particles = vec![Particle::default(); self.count];
        randomize(&mut self.rng, &self.params, &mut particles);
        particles
    }

    /// Independent bursts for every slot, used at startup
    pub fn launch_all(&mut self) -> [Vec<Particle>; FRAMES_IN_FLIGHT] {
        std::array::from_fn(|_| self.launch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> SpawnParams {
        SpawnParams {
            spawn_radius: 0.5,
            min_speed: 0.1,
            max_speed: 1.0,
        }
    }

    fn burst(seed: u64, count: usize) -> Vec<Particle> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut particles = vec![Particle::default(); count];
        randomize(&mut rng, &params(), &mut particles);
        particles
    }

    #[test]
    fn particle_matches_std430_stride() {
        assert_eq!(std::mem::size_of::<Particle>(), 32);
        assert_eq!(std::mem::offset_of!(Particle, color), 16);
        assert_eq!(std::mem::offset_of!(Particle, orientation), 28);
    }

    #[test]
    fn read_and_write_slots_are_disjoint() {
        for slot in 0..FRAMES_IN_FLIGHT {
            assert_ne!(read_slot(slot), slot);
            assert!(read_slot(slot) < FRAMES_IN_FLIGHT);
        }
        assert_eq!(read_slot(0), FRAMES_IN_FLIGHT - 1);
        assert_eq!(read_slot(1), 0);
    }

    #[test]
    fn burst_shares_one_center_inside_spawn_disk() {
        let particles = burst(1, 256);
        let center = particles[0].position;

        assert!(particles.iter().all(|p| p.position == center));
        let r = (center[0] * center[0] + center[1] * center[1]).sqrt();
        assert!(r <= 0.5 + 1e-6);
    }

    #[test]
    fn speeds_orientations_and_colors_stay_in_range() {
        for p in burst(2, 1024) {
            let speed = (p.velocity[0].powi(2) + p.velocity[1].powi(2)).sqrt();
            assert!((0.1 - 1e-5..=1.0 + 1e-5).contains(&speed), "speed {}", speed);
            assert!((0.0..TAU).contains(&p.orientation) || p.orientation == TAU);
            assert!(p.color.iter().all(|c| (0.0..=1.0).contains(c)));
        }
    }

    #[test]
    fn independent_draws_per_slot() {
        let mut state = ParticleState::new(&SimulationConfig {
            particle_count: 256,
            seed: Some(9),
            ..SimulationConfig::default()
        });
        let [a, b] = state.launch_all();

        assert_eq!(a.len(), 256);
        assert_ne!(a, b);
    }

    #[test]
    fn integration_moves_along_velocity() {
        let previous = burst(3, 4);
        let mut current = vec![Particle::default(); 4];
        integrate(&previous, &mut current, 0.5);

        for (src, dst) in previous.iter().zip(&current) {
            assert_relative_eq!(dst.position[0], src.position[0] + 0.5 * src.velocity[0]);
            assert_relative_eq!(dst.position[1], src.position[1] + 0.5 * src.velocity[1]);
            assert_eq!(dst.velocity, src.velocity);
            assert_eq!(dst.color, src.color);
            assert_eq!(dst.orientation, src.orientation);
        }
    }

    #[test]
    fn replay_without_reset_is_deterministic() {
        let deltas = [0.016, 0.017, 0.015, 0.033, 0.016];

        let run = || {
            let mut slots = [burst(42, 64), burst(42, 64)];
            let mut current = 0;
            for dt in deltas {
                let previous = slots[read_slot(current)].clone();
                integrate(&previous, &mut slots[current], dt);
                current = (current + 1) % FRAMES_IN_FLIGHT;
            }
            slots
        };

        assert_eq!(run(), run());
    }
}
