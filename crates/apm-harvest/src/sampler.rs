// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Adaptive transaction sampling.
//!
//! Each period aims to sample `target` transactions spread across the
//! period's traffic. While the target has not been reached, a transaction is
//! sampled with probability `target / previous period volume` (the very first
//! period samples its first `target` transactions outright). Past the target,
//! the effective target decays as more samples are taken. A period never
//! samples more than twice its target.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct AdaptiveSampler {
    target: u64,
    period: Duration,
    period_start: Instant,
    computed_count: u64,
    computed_count_last: u64,
    sampled_count: u64,
    adaptive_target: f64,
    rng: StdRng,
}

impl AdaptiveSampler {
    #[must_use]
    pub fn new(target: u64, period: Duration) -> Self {
        Self::with_rng(target, period, StdRng::from_os_rng())
    }

    /// A sampler whose decisions are reproducible for a given `seed`.
    #[must_use]
    pub fn with_seed(target: u64, period: Duration, seed: u64) -> Self {
        Self::with_rng(target, period, StdRng::seed_from_u64(seed))
    }

    fn with_rng(target: u64, period: Duration, rng: StdRng) -> Self {
        Self {
            target,
            period,
            period_start: Instant::now(),
            computed_count: 0,
            computed_count_last: target,
            sampled_count: 0,
            adaptive_target: 0.0,
            rng,
        }
    }

    #[must_use]
    pub fn target(&self) -> u64 {
        self.target
    }

    #[must_use]
    pub fn sampled_count(&self) -> u64 {
        self.sampled_count
    }

    /// Decides whether the next transaction is sampled.
    pub fn compute_sampled(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.period_start) >= self.period {
            self.start_period(now);
        }

        let sampled = if self.sampled_count >= self.target.saturating_mul(2) {
            false
        } else if self.sampled_count < self.target {
            self.draw(self.computed_count_last) < self.target
        } else {
            (self.draw(self.computed_count) as f64) < self.adaptive_target
        };

        if sampled {
            self.sampled_count += 1;
            if self.sampled_count >= self.target {
                self.update_adaptive_target();
            }
        }
        self.computed_count += 1;
        sampled
    }

    fn start_period(&mut self, now: Instant) {
        // Periods with no traffic keep their alignment to the original start.
        let elapsed = now.duration_since(self.period_start);
        let periods = (elapsed.as_nanos() / self.period.as_nanos().max(1)) as u32;
        self.period_start += self.period * periods;

        self.computed_count_last = self.computed_count.max(self.target);
        self.computed_count = 0;
        self.sampled_count = 0;
        self.adaptive_target = 0.0;
    }

    fn update_adaptive_target(&mut self) {
        let target = self.target as f64;
        let ratio = target / self.sampled_count as f64;
        self.adaptive_target = (target.powf(ratio) - target.sqrt()).max(0.0);
    }

    /// Uniform draw from `0..population`.
    fn draw(&mut self, population: u64) -> u64 {
        self.rng.random_range(0..population.max(1))
    }
}
