//! Editor-facing chart document.
//!
//! A chart is what the level editor saves: tempo changes, events and the
//! optional skill-star beat. Every mutation bumps the version so the engine
//! can pick up a fresh [`EventSnapshot`] without being edited in place.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    BlockType, Event, EventKind, EventSnapshot, Result, Row, TempoChange, TempoMap,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    #[serde(default)]
    tempo_changes: Vec<TempoChange>,
    #[serde(default)]
    events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    skill_star_beat: Option<f64>,
    #[serde(skip)]
    version: u64,
}

impl Chart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn tempo_changes(&self) -> &[TempoChange] {
        &self.tempo_changes
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn skill_star_beat(&self) -> Option<f64> {
        self.skill_star_beat
    }

    pub fn add_tempo_change(&mut self, change: TempoChange) -> Result<()> {
        change.validate()?;
        self.tempo_changes.retain(|c| c.beat != change.beat);
        self.tempo_changes.push(change);
        self.tempo_changes.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        self.touch();
        Ok(())
    }

    pub fn add_event(&mut self, event: Event) {
        self.events.push(event);
        self.touch();
    }

    pub fn add_events(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.extend(events);
        self.touch();
    }

    /// Removes every event matching `predicate`, returning how many went.
    pub fn remove_events(&mut self, mut predicate: impl FnMut(&Event) -> bool) -> usize {
        let before = self.events.len();
        self.events.retain(|event| !predicate(event));
        let removed = before - self.events.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    pub fn set_skill_star_beat(&mut self, beat: Option<f64>) {
        self.skill_star_beat = beat;
        self.touch();
    }

    /// Builds the tempo map from the explicit changes plus any tempo-change
    /// events.
    pub fn tempo_map(&self) -> Result<TempoMap> {
        let mut map = TempoMap::new();
        for change in &self.tempo_changes {
            map.add_tempo_change(*change)?;
        }
        for event in &self.events {
            if let EventKind::TempoChange { bpm } = event.kind {
                map.add_tempo_change(TempoChange::new(event.beat, bpm)?)?;
            }
        }
        Ok(map)
    }

    /// Immutable copy of the current event list, tagged with the version.
    pub fn snapshot(&self) -> EventSnapshot {
        EventSnapshot::new(self.version, self.events.clone())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut chart: Chart = serde_json::from_str(text)?;
        for change in &chart.tempo_changes {
            change.validate()?;
        }
        chart.tempo_changes.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        chart.version = 1;
        Ok(chart)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let chart = Self::from_json(&std::fs::read_to_string(path)?)?;
        tracing::info!(?path, events = chart.events.len(), "chart loaded");
        Ok(chart)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    fn touch(&mut self) {
        self.version += 1;
    }

    /// Input test pattern at 129 BPM: one A-row phrase and one D-pad phrase,
    /// each fed by a rod.
    pub fn test_patterns() -> Result<Self> {
        let mut chart = Chart::new();
        chart.add_tempo_change(TempoChange::new(0.0, 129.0)?)?;

        let spawn = |row, index, block_type, beat, forward| {
            Event::new(
                beat,
                EventKind::RowBlockSpawn {
                    row,
                    index,
                    block_type,
                    affect_this_index_and_forward: forward,
                },
            )
        };

        let mut events = vec![
            Event::new(0.0, EventKind::ResetMusicVolume)?,
            Event::new(0.0, EventKind::LockInputs { locked: false })?,
            spawn(Row::A, 0, BlockType::PistonA, 0.0, false)?,
            spawn(Row::A, 4, BlockType::PistonA, 1.0, false)?,
            spawn(Row::A, 8, BlockType::Platform, 2.0, true)?,
            Event::new(4.0, EventKind::deploy_rod(Row::A))?,
            Event::new(
                14.5,
                EventKind::RowBlockRetract {
                    row: Row::A,
                    index: -1,
                },
            )?,
            Event::new(
                15.0,
                EventKind::RowBlockDespawn {
                    row: Row::A,
                    index: -1,
                },
            )?,
        ];

        for (index, beat) in [(0, 16.0), (2, 17.0), (4, 18.0), (6, 19.0)] {
            events.push(spawn(Row::Dpad, index, BlockType::PistonDpad, beat, false)?);
        }
        events.push(spawn(Row::Dpad, 8, BlockType::Platform, 20.0, true)?);
        events.push(Event::new(20.0, EventKind::deploy_rod(Row::Dpad))?);
        events.push(Event::palette_change(
            24.0,
            2.0,
            crate::TilesetPalette::gba(),
            true,
            false,
        )?);
        events.push(Event::new(
            31.0,
            EventKind::RowBlockDespawn {
                row: Row::Dpad,
                index: -1,
            },
        )?);
        events.push(Event::new(32.0, EventKind::LockInputs { locked: true })?);

        chart.add_events(events);
        chart.set_skill_star_beat(Some(24.0 + 3.0));
        Ok(chart)
    }
}
