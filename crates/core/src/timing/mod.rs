//! Clock sources that drive the engine.
//!
//! The engine reads elapsed seconds from a [`TimingProvider`] once per tick.
//! Menus, the editor and tests use [`SimulatedTimingProvider`], which is
//! stepped by the frame delta. Real gameplay uses [`AudioTimingProvider`],
//! whose position comes from the audio callback, because audio buffering and
//! not the render loop determines how much of the song has actually played.

use std::sync::Arc;

use crate::{AudioClock, EngineError, Result};

pub trait TimingProvider: Send {
    /// Elapsed seconds as of the last [`TimingProvider::update`].
    fn seconds(&self) -> Result<f64>;

    /// Invoked exactly once per scheduling tick by the session driver.
    fn update(&mut self, delta: f64) -> Result<()>;

    /// Corrects the clock, e.g. after a seek in the editor.
    fn set_seconds(&mut self, seconds: f64);

    fn is_paused(&self) -> bool;
}

#[derive(Debug, Default, Clone)]
pub struct SimulatedTimingProvider {
    seconds: f64,
    paused: bool,
}

impl SimulatedTimingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.seconds = 0.0;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }
}

impl TimingProvider for SimulatedTimingProvider {
    fn seconds(&self) -> Result<f64> {
        Ok(self.seconds)
    }

    fn update(&mut self, delta: f64) -> Result<()> {
        if !delta.is_finite() {
            return Err(EngineError::invalid(format!(
                "tick delta must be finite, got {delta}"
            )));
        }
        if !self.paused {
            self.seconds = (self.seconds + delta).max(0.0);
        }
        Ok(())
    }

    fn set_seconds(&mut self, seconds: f64) {
        self.seconds = seconds.max(0.0);
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

/// Reads the sample-accurate playback position published by the audio
/// callback. The snapshot is taken in `update` so every consumer within one
/// tick sees the same time.
#[derive(Debug, Clone)]
pub struct AudioTimingProvider {
    clock: Arc<AudioClock>,
    snapshot: f64,
}

impl AudioTimingProvider {
    pub fn new(clock: Arc<AudioClock>) -> Self {
        let snapshot = clock.position_seconds();
        Self { clock, snapshot }
    }

    pub fn clock(&self) -> &Arc<AudioClock> {
        &self.clock
    }

    fn check_fault(&self) -> Result<()> {
        match self.clock.fault() {
            Some(reason) => Err(EngineError::ClockFault(reason.to_string())),
            None => Ok(()),
        }
    }
}

impl TimingProvider for AudioTimingProvider {
    fn seconds(&self) -> Result<f64> {
        self.check_fault()?;
        Ok(self.snapshot)
    }

    fn update(&mut self, _delta: f64) -> Result<()> {
        if let Err(err) = self.check_fault() {
            tracing::warn!(%err, "audio clock faulted");
            return Err(err);
        }
        self.snapshot = self.clock.position_seconds();
        Ok(())
    }

    fn set_seconds(&mut self, seconds: f64) {
        self.clock.seek_seconds(seconds);
        self.snapshot = self.clock.position_seconds();
    }

    fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }
}
