//! Self-contained game modes that build their own chart instead of loading
//! one from disk.

use serde::{Deserialize, Serialize};

use crate::{
    Chart, Engine, EngineConfig, Event, EventKind, LoopCondition, Result, TempoChange,
    TilesetPalette, TimingProvider,
};

pub const DUNK_BPM: f64 = 129.0;
pub const DUNK_MAX_LIVES: u32 = 5;
pub const DUNK_LOOP_PERIOD: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SideMode {
    /// Endless: a dunk rod every bar until the player runs out of lives.
    Dunk,
}

impl SideMode {
    pub fn name(self) -> &'static str {
        match self {
            SideMode::Dunk => "dunk",
        }
    }

    pub fn max_lives(self) -> u32 {
        match self {
            SideMode::Dunk => DUNK_MAX_LIVES,
        }
    }

    pub fn palette(self) -> TilesetPalette {
        match self {
            SideMode::Dunk => TilesetPalette::gba(),
        }
    }

    pub fn chart(self) -> Result<Chart> {
        let mut chart = Chart::new();
        match self {
            SideMode::Dunk => {
                chart.add_tempo_change(TempoChange::new(0.0, DUNK_BPM)?)?;
                chart.add_events([
                    Event::new(0.0, EventKind::ResetMusicVolume)?,
                    Event::new(
                        0.0,
                        EventKind::looping(
                            DUNK_LOOP_PERIOD,
                            LoopCondition::WhileAlive,
                            EventKind::deploy_rod_dunk(),
                        ),
                    )?,
                ]);
            }
        }
        Ok(chart)
    }

    /// Builds a ready-to-tick session. The mode's life count overrides the
    /// configured one.
    pub fn prepare(self, timing: Box<dyn TimingProvider>, config: &EngineConfig) -> Result<Engine> {
        let mut engine = Engine::with_config(timing, config);
        engine.inputter_mut().set_max_lives(self.max_lives());
        engine.world_mut().palette = self.palette();
        engine.load_chart(&self.chart()?)?;
        tracing::info!(mode = self.name(), lives = self.max_lives(), "side mode prepared");
        Ok(engine)
    }
}
