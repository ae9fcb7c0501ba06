// Frame synchronization controller
//
// Drives one animation tick across the compute queue, the graphics queue
// and the presentation engine:
//
//   wait compute fence ─> update slot ─> submit compute ──(compute_finished)──┐
//                                                                            v
//   wait graphics fence ─> acquire image ──(image_available)──> submit graphics
//                                                                            │
//                                    present <──(render_finished)────────────┘
//
// A relaunch rewrites the particle arrays of every slot, so it first drains
// the fences of all slots.
//
// The GPU side lives behind `FramePipeline`; `FrameScheduler` only owns the
// ordering and the slot rotation, so it can be exercised without a device.

use anyhow::Result;

/// Number of frame slots pipelined between CPU and GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Result of a surface operation that may find the chain out of date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceStatus<T> {
    Ready(T),
    /// The chain no longer matches the surface and must be rebuilt
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Image presented and the chain is still valid
    Presented { slot: usize, image_index: u32 },
    /// Image presented, but the chain must be rebuilt before the next tick
    PresentedStale { slot: usize, image_index: u32 },
    /// Acquire found the chain out of date; nothing was drawn and the slot
    /// did not advance
    Aborted { slot: usize },
}

impl FrameOutcome {
    pub fn needs_recreate(&self) -> bool {
        !matches!(self, FrameOutcome::Presented { .. })
    }
}

/// Device-side half of a tick, one call per step of the frame algorithm.
///
/// Every wait is unbounded; a failing call is fatal for the process.
pub trait FramePipeline {
    /// Block until the slot's previous compute submission has finished.
    fn wait_for_compute(&mut self, slot: usize) -> Result<()>;

    /// Write the slot's parameter data. Returns `true` when the particles
    /// are due to be relaunched.
    fn update_slot(&mut self, slot: usize) -> Result<bool>;

    /// Write one fresh burst into the particle array of every slot.
    /// Only called while no slot has GPU work pending.
    fn relaunch(&mut self) -> Result<()>;

    /// Reset the compute fence, re-record and submit the compute pass,
    /// signalling the slot's compute-finished semaphore.
    fn submit_compute(&mut self, slot: usize) -> Result<()>;

    /// Block until the slot's previous graphics submission has finished.
    fn wait_for_graphics(&mut self, slot: usize) -> Result<()>;

    /// Acquire the next presentable image, signalling image-available.
    fn acquire_image(&mut self, slot: usize) -> Result<SurfaceStatus<u32>>;

    /// Consume the compute-finished semaphore of a tick that never reached
    /// the graphics submission.
    fn discard_compute(&mut self, slot: usize) -> Result<()>;

    /// Reset the graphics fence, re-record and submit the draw, waiting on
    /// compute-finished and image-available and signalling render-finished.
    fn submit_graphics(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Queue the image for presentation once render-finished is signalled.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus<()>>;
}

/// Owns the current slot and advances it once per completed tick.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    current: usize,
    frames_presented: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot the next tick will use
    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Run one tick. `resize_requested` is the externally raised staleness
    /// flag, checked after presenting.
    pub fn tick<P: FramePipeline>(
        &mut self,
        pipeline: &mut P,
        resize_requested: bool,
    ) -> Result<FrameOutcome> {
        let slot = self.current;

        // Compute: the fence wait is what makes the CPU writes below safe
        pipeline.wait_for_compute(slot)?;
        if pipeline.update_slot(slot)? {
            Self::drain(pipeline)?;
            pipeline.relaunch()?;
        }
        pipeline.submit_compute(slot)?;

        // Graphics: bounds the outstanding frames to FRAMES_IN_FLIGHT
        pipeline.wait_for_graphics(slot)?;

        let image_index = match pipeline.acquire_image(slot)? {
            SurfaceStatus::Ready(index) => index,
            SurfaceStatus::Stale => {
                log::debug!("Acquire found surface out of date (slot {})", slot);
                pipeline.discard_compute(slot)?;
                return Ok(FrameOutcome::Aborted { slot });
            }
        };

        pipeline.submit_graphics(slot, image_index)?;
        let presented = pipeline.present(slot, image_index)?;

        self.current = (self.current + 1) % FRAMES_IN_FLIGHT;
        self.frames_presented += 1;

        log::trace!("Presented image {} from slot {}", image_index, slot);

        Ok(match presented {
            SurfaceStatus::Ready(()) if !resize_requested => {
                FrameOutcome::Presented { slot, image_index }
            }
            _ => FrameOutcome::PresentedStale { slot, image_index },
        })
    }

    /// Wait until no slot has compute or graphics work in flight
    fn drain<P: FramePipeline>(pipeline: &mut P) -> Result<()> {
        for slot in 0..FRAMES_IN_FLIGHT {
            pipeline.wait_for_compute(slot)?;
            pipeline.wait_for_graphics(slot)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        WaitCompute(usize),
        Update(usize),
        Relaunch,
        SubmitCompute(usize),
        WaitGraphics(usize),
        Acquire(usize),
        Discard(usize),
        SubmitGraphics(usize, u32),
        Present(usize, u32),
    }

    /// Models fences as "submission pending until waited on", and checks the
    /// hazards the scheduler must avoid.
    #[derive(Default)]
    struct MockPipeline {
        calls: Vec<Call>,
        compute_pending: [bool; FRAMES_IN_FLIGHT],
        graphics_pending: [bool; FRAMES_IN_FLIGHT],
        compute_semaphore_signalled: [bool; FRAMES_IN_FLIGHT],
        param_writes: [u32; FRAMES_IN_FLIGHT],
        burst_writes: [u32; FRAMES_IN_FLIGHT],
        relaunch_due: Vec<bool>,
        next_image: u32,
        stale_acquires: Vec<bool>,
        stale_presents: Vec<bool>,
        fail_submit: bool,
    }

    impl FramePipeline for MockPipeline {
        fn wait_for_compute(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::WaitCompute(slot));
            self.compute_pending[slot] = false;
            Ok(())
        }

        fn update_slot(&mut self, slot: usize) -> Result<bool> {
            self.calls.push(Call::Update(slot));
            assert!(
                !self.compute_pending[slot],
                "CPU wrote slot {} while its compute pass was pending",
                slot
            );
            self.param_writes[slot] += 1;
            Ok(!self.relaunch_due.is_empty() && self.relaunch_due.remove(0))
        }

        fn relaunch(&mut self) -> Result<()> {
            self.calls.push(Call::Relaunch);
            for slot in 0..FRAMES_IN_FLIGHT {
                assert!(
                    !self.compute_pending[slot] && !self.graphics_pending[slot],
                    "particle array of slot {} rewritten while the GPU may use it",
                    slot
                );
                self.burst_writes[slot] += 1;
            }
            Ok(())
        }

        fn submit_compute(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::SubmitCompute(slot));
            if self.fail_submit {
                anyhow::bail!("device lost");
            }
            assert!(!self.compute_pending[slot], "compute fence reset while in use");
            assert!(
                !self.compute_semaphore_signalled[slot],
                "compute-finished semaphore signalled twice"
            );
            self.compute_pending[slot] = true;
            self.compute_semaphore_signalled[slot] = true;
            Ok(())
        }

        fn wait_for_graphics(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::WaitGraphics(slot));
            self.graphics_pending[slot] = false;
            Ok(())
        }

        fn acquire_image(&mut self, slot: usize) -> Result<SurfaceStatus<u32>> {
            self.calls.push(Call::Acquire(slot));
            if !self.stale_acquires.is_empty() && self.stale_acquires.remove(0) {
                return Ok(SurfaceStatus::Stale);
            }
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            Ok(SurfaceStatus::Ready(index))
        }

        fn discard_compute(&mut self, slot: usize) -> Result<()> {
            self.calls.push(Call::Discard(slot));
            self.compute_semaphore_signalled[slot] = false;
            Ok(())
        }

        fn submit_graphics(&mut self, slot: usize, image_index: u32) -> Result<()> {
            self.calls.push(Call::SubmitGraphics(slot, image_index));
            assert!(!self.graphics_pending[slot], "graphics fence reset while in use");
            assert!(
                self.compute_semaphore_signalled[slot],
                "graphics submitted without a compute pass to wait on"
            );
            self.compute_semaphore_signalled[slot] = false;
            self.graphics_pending[slot] = true;
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> Result<SurfaceStatus<()>> {
            self.calls.push(Call::Present(slot, image_index));
            if !self.stale_presents.is_empty() && self.stale_presents.remove(0) {
                return Ok(SurfaceStatus::Stale);
            }
            Ok(SurfaceStatus::Ready(()))
        }
    }

    #[test]
    fn slots_rotate_zero_one() {
        let mut scheduler = FrameScheduler::new();
        let mut pipeline = MockPipeline::default();

        let slots: Vec<usize> = (0..6)
            .map(|_| match scheduler.tick(&mut pipeline, false).unwrap() {
                FrameOutcome::Presented { slot, .. } => slot,
                other => panic!("unexpected outcome {:?}", other),
            })
            .collect();

        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(scheduler.frames_presented(), 6);
    }

    #[test]
    fn tick_follows_frame_algorithm_order() {
        let mut scheduler = FrameScheduler::new();
        let mut pipeline = MockPipeline::default();

        scheduler.tick(&mut pipeline, false).unwrap();

        assert_eq!(
            pipeline.calls,
            vec![
                Call::WaitCompute(0),
                Call::Update(0),
                Call::SubmitCompute(0),
                Call::WaitGraphics(0),
                Call::Acquire(0),
                Call::SubmitGraphics(0, 0),
                Call::Present(0, 0),
            ]
        );
    }

    #[test]
    fn stale_acquire_aborts_without_advancing() {
        let mut scheduler = FrameScheduler::new();
        let mut pipeline = MockPipeline {
            stale_acquires: vec![false, true],
            ..Default::default()
        };

        scheduler.tick(&mut pipeline, false).unwrap();
        let outcome = scheduler.tick(&mut pipeline, false).unwrap();

        assert_eq!(outcome, FrameOutcome::Aborted { slot: 1 });
        assert!(outcome.needs_recreate());
        assert_eq!(scheduler.current(), 1);
        assert_eq!(scheduler.frames_presented(), 1);
        assert_eq!(pipeline.calls.last(), Some(&Call::Discard(1)));
        assert!(!pipeline
            .calls
            .iter()
            .any(|c| matches!(c, Call::SubmitGraphics(1, _))));

        // The retried tick reuses slot 1
        let outcome = scheduler.tick(&mut pipeline, false).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { slot: 1, .. }));
    }

    #[test]
    fn stale_present_or_resize_flag_still_advances() {
        let mut scheduler = FrameScheduler::new();
        let mut pipeline = MockPipeline {
            stale_presents: vec![true],
            ..Default::default()
        };

        let outcome = scheduler.tick(&mut pipeline, false).unwrap();
        assert_eq!(outcome, FrameOutcome::PresentedStale { slot: 0, image_index: 0 });
        assert_eq!(scheduler.current(), 1);

        let outcome = scheduler.tick(&mut pipeline, true).unwrap();
        assert_eq!(outcome, FrameOutcome::PresentedStale { slot: 1, image_index: 1 });
        assert!(outcome.needs_recreate());
        assert_eq!(scheduler.current(), 0);
    }

    #[test]
    fn device_failure_propagates_and_keeps_slot() {
        let mut scheduler = FrameScheduler::new();
        let mut pipeline = MockPipeline {
            fail_submit: true,
            ..Default::default()
        };

        assert!(scheduler.tick(&mut pipeline, false).is_err());
        assert_eq!(scheduler.current(), 0);
        assert_eq!(scheduler.frames_presented(), 0);
    }

    #[test]
    fn cpu_writes_never_race_pending_compute() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut scheduler = FrameScheduler::new();
        let mut pipeline = MockPipeline {
            stale_acquires: (0..500).map(|_| rng.gen_bool(0.1)).collect(),
            stale_presents: (0..500).map(|_| rng.gen_bool(0.1)).collect(),
            ..Default::default()
        };

        let mut expected_slot = 0;
        for _ in 0..500 {
            let resize = rng.gen_bool(0.05);
            match scheduler.tick(&mut pipeline, resize).unwrap() {
                FrameOutcome::Aborted { slot } => assert_eq!(slot, expected_slot),
                FrameOutcome::Presented { slot, .. } | FrameOutcome::PresentedStale { slot, .. } => {
                    assert_eq!(slot, expected_slot);
                    expected_slot = (expected_slot + 1) % FRAMES_IN_FLIGHT;
                }
            }
        }

        assert_eq!(pipeline.param_writes.iter().sum::<u32>(), 500);
    }

    #[test]
    fn relaunch_drains_every_slot_first() {
        let mut scheduler = FrameScheduler::new();
        let mut pipeline = MockPipeline {
            relaunch_due: vec![false, false, true],
            ..Default::default()
        };

        scheduler.tick(&mut pipeline, false).unwrap();
        scheduler.tick(&mut pipeline, false).unwrap();
        let before = pipeline.calls.len();
        scheduler.tick(&mut pipeline, false).unwrap();

        assert_eq!(
            pipeline.calls[before..],
            [
                Call::WaitCompute(0),
                Call::Update(0),
                Call::WaitCompute(0),
                Call::WaitGraphics(0),
                Call::WaitCompute(1),
                Call::WaitGraphics(1),
                Call::Relaunch,
                Call::SubmitCompute(0),
                Call::WaitGraphics(0),
                Call::Acquire(0),
                Call::SubmitGraphics(0, 2),
                Call::Present(0, 2),
            ]
        );
        assert_eq!(pipeline.burst_writes, [1; FRAMES_IN_FLIGHT]);
    }

    #[test]
    fn relaunch_never_overlaps_gpu_work() {
        let mut rng = StdRng::seed_from_u64(0xf1e5);
        let mut scheduler = FrameScheduler::new();
        let relaunch_due: Vec<bool> = (0..400).map(|_| rng.gen_bool(0.1)).collect();
        let expected = relaunch_due.iter().filter(|&&due| due).count() as u32;
        let mut pipeline = MockPipeline {
            relaunch_due,
            stale_acquires: (0..400).map(|_| rng.gen_bool(0.1)).collect(),
            ..Default::default()
        };

        for _ in 0..400 {
            scheduler.tick(&mut pipeline, false).unwrap();
        }

        // Every burst reaches every slot
        assert_eq!(pipeline.burst_writes, [expected; FRAMES_IN_FLIGHT]);
    }
}
