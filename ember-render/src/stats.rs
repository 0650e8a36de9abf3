//! Per-pass and per-frame statistics.

use std::time::Instant;

use crate::device::DrawStats;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassStats {
    pub batches: u32,
    pub triangles: u32,
    /// Wall-clock time spent issuing the pass, microseconds.
    pub micros: u64,
}

impl PassStats {
    pub fn from_draws(draws: DrawStats, started: Instant) -> Self {
        Self {
            batches: draws.batches,
            triangles: draws.triangles,
            micros: started.elapsed().as_micros() as u64,
        }
    }
}

/// Statistics of the most recent `Gfx::render` call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GfxLastFrameStats {
    /// One entry per rendered eye.
    pub gbuffer: Vec<PassStats>,
    pub deferred: Vec<PassStats>,
    pub point_lights: Vec<DrawStats>,
    pub shadow: PassStats,
    pub hud: PassStats,
}

impl GfxLastFrameStats {
    pub fn total_batches(&self) -> u32 {
        self.gbuffer
            .iter()
            .chain(&self.deferred)
            .chain([&self.shadow, &self.hud])
            .map(|s| s.batches)
            .sum()
    }

    pub fn total_triangles(&self) -> u32 {
        self.gbuffer
            .iter()
            .chain(&self.deferred)
            .chain([&self.shadow, &self.hud])
            .map(|s| s.triangles)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_span_every_pass() {
        let pass = |batches, triangles| PassStats {
            batches,
            triangles,
            micros: 0,
        };
        let stats = GfxLastFrameStats {
            gbuffer: vec![pass(3, 30), pass(3, 30)],
            deferred: vec![pass(2, 4), pass(2, 4)],
            point_lights: Vec::new(),
            shadow: pass(5, 50),
            hud: pass(1, 2),
        };
        assert_eq!(stats.total_batches(), 16);
        assert_eq!(stats.total_triangles(), 150);
    }
}
