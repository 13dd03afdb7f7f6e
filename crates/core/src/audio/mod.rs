use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc, OnceLock,
    },
    thread::JoinHandle,
    time::Duration,
};

use crate::{AudioConfig, AudioTimingProvider, EngineError, Result};

/// Playback position shared between the realtime audio callback and the
/// simulation thread. Every field is a plain atomic so neither side ever
/// blocks on the other.
#[derive(Debug)]
pub struct AudioClock {
    sample_rate: u32,
    frames: AtomicU64,
    paused: AtomicBool,
    gain_bits: AtomicU32,
    faulted: AtomicBool,
    fault: OnceLock<String>,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames: AtomicU64::new(0),
            paused: AtomicBool::new(false),
            gain_bits: AtomicU32::new(1.0_f32.to_bits()),
            faulted: AtomicBool::new(false),
            fault: OnceLock::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Called from the audio callback after a block has been rendered.
    pub fn advance_frames(&self, frames: u64) {
        if !self.paused.load(Ordering::Acquire) {
            self.frames.fetch_add(frames, Ordering::AcqRel);
        }
    }

    pub fn position_frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn position_seconds(&self) -> f64 {
        self.position_frames() as f64 / self.sample_rate as f64
    }

    pub fn seek_seconds(&self, seconds: f64) {
        let frames = (seconds.max(0.0) * self.sample_rate as f64).round() as u64;
        self.frames.store(frames, Ordering::Release);
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain_bits
            .store(gain.max(0.0).to_bits(), Ordering::Release);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Acquire))
    }

    /// Records a fault raised inside the audio backend. Only the first fault
    /// is kept; the simulation thread re-raises it on its next tick.
    pub fn report_fault(&self, reason: impl Into<String>) {
        let _ = self.fault.set(reason.into());
        self.faulted.store(true, Ordering::Release);
    }

    pub fn fault(&self) -> Option<&str> {
        if self.faulted.load(Ordering::Acquire) {
            self.fault.get().map(String::as_str)
        } else {
            None
        }
    }
}

/// High level audio engine façade. Decoding and mixing live elsewhere; the
/// core only needs the playback position and the pause state.
#[derive(Debug)]
pub struct AudioEngine {
    config: AudioConfig,
    clock: Arc<AudioClock>,
    callback: Option<CallbackThread>,
}

#[derive(Debug)]
struct CallbackThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl AudioEngine {
    pub fn new(config: AudioConfig) -> Self {
        let clock = Arc::new(AudioClock::new(config.sample_rate));
        clock.set_gain(config.gain);
        Self {
            config,
            clock,
            callback: None,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<AudioClock> {
        Arc::clone(&self.clock)
    }

    /// Creates a timing provider that reads this engine's playback position.
    pub fn timing_provider(&self) -> AudioTimingProvider {
        AudioTimingProvider::new(self.clock())
    }

    pub fn position_seconds(&self) -> f64 {
        self.clock.position_seconds()
    }

    pub fn pause(&self, paused: bool) {
        self.clock.set_paused(paused);
    }

    pub fn set_gain(&self, gain: f32) {
        self.clock.set_gain(gain);
    }

    /// Feeds one rendered block into the clock. The realtime callback calls
    /// this once per buffer.
    pub fn push_block(&self, frames: usize) {
        self.clock.advance_frames(frames as u64);
    }

    /// Starts a stand-in for the realtime callback that advances the clock by
    /// `block_size` frames at real-time pace on its own thread.
    pub fn start(&mut self) -> Result<()> {
        if self.callback.is_some() {
            return Err(EngineError::msg("audio callback is already running"));
        }
        if self.config.block_size == 0 {
            return Err(EngineError::invalid("audio block size must be non-zero"));
        }

        let running = Arc::new(AtomicBool::new(true));
        let clock = self.clock();
        let block = self.config.block_size as u64;
        let period = Duration::from_secs_f64(block as f64 / clock.sample_rate() as f64);
        let flag = Arc::clone(&running);

        let handle = std::thread::Builder::new()
            .name("audio-callback".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    clock.advance_frames(block);
                }
            })?;

        tracing::info!(
            sample_rate = self.config.sample_rate,
            block_size = self.config.block_size,
            "audio callback started"
        );
        self.callback = Some(CallbackThread { running, handle });
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(callback) = self.callback.take() {
            callback.running.store(false, Ordering::Release);
            callback
                .handle
                .join()
                .map_err(|_| EngineError::msg("audio callback thread panicked"))?;
            tracing::info!("audio callback stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.callback.is_some()
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
