//! Core library for the beatsync rhythm engine.
//!
//! Song time comes from a [`TimingProvider`], is mapped to beats through a
//! [`TempoMap`], and drives a [`Timeline`] of [`Event`]s that mutate the
//! [`World`] and register expectations with the [`Inputter`]. [`Engine`]
//! ties one session together.

pub mod audio;
pub mod chart;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod input;
pub mod sidemode;
pub mod tempo;
pub mod timeline;
pub mod timing;
pub mod world;

pub use audio::{AudioClock, AudioEngine};
pub use chart::Chart;
pub use config::{AppConfig, AudioConfig, ClockSource, EngineConfig};
pub use engine::{Engine, EnginePoster, TickReport};
pub use error::{EngineError, Result};
pub use event::{CustomHook, Event, EventContext, EventHook, EventKind, LoopCondition, LoopState};
pub use input::{
    Expectation, ExpectationId, InputResult, InputScore, InputStats, InputType, Inputter,
    Judgement, Ranking, ScoreSnapshot,
};
pub use sidemode::SideMode;
pub use tempo::{TempoChange, TempoMap};
pub use timeline::{
    AdvanceReport, EventOrigin, EventSnapshot, EventState, ScheduledEvent, Timeline,
};
pub use timing::{AudioTimingProvider, SimulatedTimingProvider, TimingProvider};
pub use world::{BlockType, Color, Cue, Entity, EntityId, Row, TilesetPalette, World};
