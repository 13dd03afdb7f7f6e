//! Scheduled events.
//!
//! An [`Event`] is a beat, a width and an [`EventKind`]. The timeline owns
//! lifecycle bookkeeping and calls the hooks below; the kinds carry whatever
//! per-run state they need (marked `serde(skip)` so documents stay clean).
//! Hooks never hold on to the engine: everything they may touch is lent to
//! them through [`EventContext`] for the duration of the call.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    world::ROW_LENGTH, BlockType, Cue, EngineError, Entity, EntityId, InputScore, InputType,
    Inputter, Result, Row, TempoChange, TempoMap, TilesetPalette, World,
};

/// Beats between a rod being deployed and it reaching index 0.
pub const ROD_LEAD_IN: f64 = 4.0;
/// Beats a rod needs to cross one block.
pub const ROD_BEATS_PER_BLOCK: f64 = 0.5;
/// How far ahead of the rod a piston has to exist to be expected.
pub const ROD_LOOKAHEAD: f64 = 1.0;
/// Beats between a dunk rod launching and the A press that dunks it.
pub const DUNK_HIT_OFFSET: f64 = 2.0;
pub const DUNK_ROD_WIDTH: f64 = 3.0;
/// Width of a looping event: it stays open for the rest of the song.
pub const LOOP_WIDTH: f64 = f64::MAX;

/// Everything an event hook is allowed to touch.
pub struct EventContext<'a> {
    pub world: &'a mut World,
    pub inputter: &'a mut Inputter,
    pub tempos: &'a TempoMap,
    spawned: &'a mut Vec<Event>,
}

impl<'a> EventContext<'a> {
    pub fn new(
        world: &'a mut World,
        inputter: &'a mut Inputter,
        tempos: &'a TempoMap,
        spawned: &'a mut Vec<Event>,
    ) -> Self {
        Self {
            world,
            inputter,
            tempos,
            spawned,
        }
    }

    /// Queues an event; the engine schedules it once the current advance
    /// returns.
    pub fn spawn(&mut self, event: Event) {
        self.spawned.push(event);
    }
}

/// Script hook used by side modes for behaviour the built-in kinds do not
/// cover.
pub trait EventHook: Send + Sync {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn on_start(&self, ctx: &mut EventContext<'_>, event_beat: f64, current_beat: f64)
        -> Result<()>;

    fn on_update(
        &self,
        _ctx: &mut EventContext<'_>,
        _event_beat: f64,
        _current_beat: f64,
    ) -> Result<()> {
        Ok(())
    }

    fn on_end(&self, _ctx: &mut EventContext<'_>, _event_beat: f64, _current_beat: f64) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct CustomHook(Arc<dyn EventHook>);

impl CustomHook {
    pub fn new(hook: impl EventHook + 'static) -> Self {
        Self(Arc::new(hook))
    }
}

impl fmt::Debug for CustomHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomHook").field(&self.0.name()).finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopCondition {
    #[default]
    Always,
    /// Keep looping while the player has lives left.
    WhileAlive,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RodState {
    entity: Option<EntityId>,
    next_index: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopState {
    next_iteration: u64,
    stopped: bool,
    /// Seek position the loop was rewound to. Iterations respawned at or
    /// before it skip the work that was due before it.
    resume_at: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventKind {
    TempoChange {
        bpm: f64,
    },
    LockInputs {
        locked: bool,
    },
    RowBlockSpawn {
        row: Row,
        index: i32,
        block_type: BlockType,
        #[serde(default)]
        affect_this_index_and_forward: bool,
    },
    /// Negative indices target the whole row.
    RowBlockExtend {
        row: Row,
        index: i32,
    },
    RowBlockRetract {
        row: Row,
        index: i32,
    },
    RowBlockDespawn {
        row: Row,
        index: i32,
    },
    DeployRod {
        row: Row,
        #[serde(skip)]
        state: RodState,
    },
    DeployRodDunk {
        #[serde(skip)]
        rod: Option<EntityId>,
        #[serde(skip)]
        expected: bool,
    },
    PaletteChange {
        tileset: TilesetPalette,
        #[serde(default)]
        pulse: bool,
        #[serde(default)]
        reverse: bool,
        #[serde(skip)]
        from: Option<TilesetPalette>,
    },
    ResetMusicVolume,
    /// Spawns `template` every `period` beats. The condition is checked
    /// before each iteration; once it fails the loop is done.
    Looping {
        period: f64,
        #[serde(default)]
        condition: LoopCondition,
        template: Box<EventKind>,
        #[serde(skip)]
        state: LoopState,
    },
    JudgementCue {
        lane: InputType,
        score: InputScore,
    },
    #[serde(skip)]
    Custom(CustomHook),
}

impl EventKind {
    pub fn deploy_rod(row: Row) -> Self {
        EventKind::DeployRod {
            row,
            state: RodState::default(),
        }
    }

    pub fn deploy_rod_dunk() -> Self {
        EventKind::DeployRodDunk {
            rod: None,
            expected: false,
        }
    }

    pub fn looping(period: f64, condition: LoopCondition, template: EventKind) -> Self {
        EventKind::Looping {
            period,
            condition,
            template: Box::new(template),
            state: LoopState::default(),
        }
    }

    pub fn palette_change(tileset: TilesetPalette, pulse: bool, reverse: bool) -> Self {
        EventKind::PaletteChange {
            tileset,
            pulse,
            reverse,
            from: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::TempoChange { .. } => "tempoChange",
            EventKind::LockInputs { .. } => "lockInputs",
            EventKind::RowBlockSpawn { .. } => "rowBlockSpawn",
            EventKind::RowBlockExtend { .. } => "rowBlockExtend",
            EventKind::RowBlockRetract { .. } => "rowBlockRetract",
            EventKind::RowBlockDespawn { .. } => "rowBlockDespawn",
            EventKind::DeployRod { .. } => "deployRod",
            EventKind::DeployRodDunk { .. } => "deployRodDunk",
            EventKind::PaletteChange { .. } => "paletteChange",
            EventKind::ResetMusicVolume => "resetMusicVolume",
            EventKind::Looping { .. } => "looping",
            EventKind::JudgementCue { .. } => "judgementCue",
            EventKind::Custom(hook) => hook.0.name(),
        }
    }

    /// Width dictated by the kind itself, overriding any authored duration.
    pub fn intrinsic_width(&self) -> Option<f64> {
        match self {
            EventKind::DeployRod { .. } => {
                Some(ROD_LEAD_IN + ROW_LENGTH as f64 * ROD_BEATS_PER_BLOCK)
            }
            EventKind::DeployRodDunk { .. } => Some(DUNK_ROD_WIDTH),
            EventKind::Looping { .. } => Some(LOOP_WIDTH),
            EventKind::PaletteChange { .. } | EventKind::Custom(_) => None,
            _ => Some(0.0),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            EventKind::TempoChange { bpm } => TempoChange::new(0.0, *bpm).map(|_| ()),
            EventKind::RowBlockSpawn { index, .. } => {
                if *index < 0 || *index as usize >= ROW_LENGTH {
                    Err(EngineError::invalid(format!(
                        "row block index must be within 0..{ROW_LENGTH}, got {index}"
                    )))
                } else {
                    Ok(())
                }
            }
            EventKind::Looping {
                period, template, ..
            } => {
                if !period.is_finite() || *period <= 0.0 {
                    return Err(EngineError::invalid(format!(
                        "looping period must be positive, got {period}"
                    )));
                }
                template.validate()
            }
            _ => Ok(()),
        }
    }

    fn reset_state(&mut self) {
        match self {
            EventKind::DeployRod { state, .. } => *state = RodState::default(),
            EventKind::DeployRodDunk { rod, expected } => {
                *rod = None;
                *expected = false;
            }
            EventKind::PaletteChange { from, .. } => *from = None,
            EventKind::Looping { state, .. } => *state = LoopState::default(),
            _ => {}
        }
    }

    /// Rebuilds the progress of an open window after the cursor jumped to
    /// `cursor`. Work due before the cursor counts as done; work at or after
    /// it is redone by the next update.
    fn rewind(&mut self, event_beat: f64, cursor: f64) {
        match self {
            EventKind::DeployRod { state, .. } => {
                state.next_index = (0..ROW_LENGTH)
                    .find(|&index| rod_target(event_beat, index) >= cursor)
                    .unwrap_or(ROW_LENGTH);
            }
            EventKind::DeployRodDunk { expected, .. } => {
                *expected = event_beat + DUNK_HIT_OFFSET < cursor;
            }
            EventKind::Looping {
                period,
                template,
                state,
                ..
            } => {
                // Iterations whose window is still open at the cursor are
                // spawned again.
                let width = template.intrinsic_width().unwrap_or(0.0);
                let open = ((cursor - width - event_beat) / *period).floor() + 1.0;
                *state = LoopState {
                    next_iteration: open.max(0.0) as u64,
                    stopped: false,
                    resume_at: Some(cursor),
                };
            }
            _ => {}
        }
    }
}

fn rod_target(deployed_beat: f64, index: usize) -> f64 {
    deployed_beat + ROD_LEAD_IN + index as f64 * ROD_BEATS_PER_BLOCK
}

fn is_unbounded(width: &f64) -> bool {
    *width >= LOOP_WIDTH
}

fn row_target(index: i32) -> Option<usize> {
    usize::try_from(index).ok()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "EventRepr")]
pub struct Event {
    pub beat: f64,
    #[serde(rename = "duration", skip_serializing_if = "is_unbounded")]
    pub width: f64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Wire shape of an event before validation.
#[derive(Deserialize)]
struct EventRepr {
    beat: f64,
    #[serde(default)]
    duration: f64,
    #[serde(flatten)]
    kind: EventKind,
}

impl TryFrom<EventRepr> for Event {
    type Error = EngineError;

    fn try_from(repr: EventRepr) -> Result<Self> {
        // Authored durations are clamped, authored beats are not.
        let width = if repr.duration.is_finite() {
            repr.duration.max(0.0)
        } else {
            0.0
        };
        Event::with_width(repr.beat, width, repr.kind)
    }
}

impl Event {
    pub fn new(beat: f64, kind: EventKind) -> Result<Self> {
        Self::with_width(beat, 0.0, kind)
    }

    pub fn with_width(beat: f64, width: f64, kind: EventKind) -> Result<Self> {
        if !beat.is_finite() || beat < 0.0 {
            return Err(EngineError::invalid(format!(
                "event `{}` beat must be >= 0, got {beat}",
                kind.name()
            )));
        }
        if !width.is_finite() || width < 0.0 {
            return Err(EngineError::invalid(format!(
                "event `{}` duration must be >= 0, got {width}",
                kind.name()
            )));
        }
        kind.validate()?;
        let width = kind.intrinsic_width().unwrap_or(width);
        Ok(Self { beat, width, kind })
    }

    pub fn palette_change(
        beat: f64,
        duration: f64,
        tileset: TilesetPalette,
        pulse: bool,
        reverse: bool,
    ) -> Result<Self> {
        Self::with_width(
            beat,
            duration,
            EventKind::palette_change(tileset, pulse, reverse),
        )
    }

    pub fn custom(beat: f64, width: f64, hook: impl EventHook + 'static) -> Result<Self> {
        Self::with_width(beat, width, EventKind::Custom(CustomHook::new(hook)))
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn end_beat(&self) -> f64 {
        self.beat + self.width
    }

    pub fn is_instantaneous(&self) -> bool {
        self.width <= 0.0
    }

    /// Forgets per-run state so the event can fire again after a rewind.
    pub(crate) fn reset_state(&mut self) {
        self.kind.reset_state();
    }

    /// Re-derives per-run state for an event whose window is open at
    /// `cursor` after a seek.
    pub(crate) fn rewind(&mut self, cursor: f64) {
        self.kind.rewind(self.beat, cursor);
    }

    pub(crate) fn on_start(&mut self, ctx: &mut EventContext<'_>, current_beat: f64) -> Result<()> {
        let beat = self.beat;
        let width = self.width;
        match &mut self.kind {
            EventKind::TempoChange { bpm } => {
                tracing::debug!(beat, bpm = *bpm, "tempo now active");
            }
            EventKind::LockInputs { locked } => ctx.inputter.set_inputs_locked(*locked),
            EventKind::RowBlockSpawn {
                row,
                index,
                block_type,
                affect_this_index_and_forward,
            } => {
                let index = row_target(*index).ok_or_else(|| {
                    EngineError::invalid(format!("cannot spawn a block at index {index}"))
                })?;
                ctx.world
                    .spawn_block(*row, index, *block_type, *affect_this_index_and_forward);
            }
            EventKind::RowBlockExtend { row, index } => {
                ctx.world.set_extended(*row, row_target(*index), true);
            }
            EventKind::RowBlockRetract { row, index } => {
                ctx.world.set_extended(*row, row_target(*index), false);
            }
            EventKind::RowBlockDespawn { row, index } => {
                ctx.world.despawn_blocks(*row, row_target(*index));
            }
            EventKind::DeployRod { row, state } => {
                state.entity = Some(ctx.world.add_entity(Entity::Rod {
                    row: *row,
                    deployed_beat: beat,
                }));
            }
            EventKind::DeployRodDunk { rod, expected } => {
                *rod = Some(ctx.world.add_entity(Entity::DunkRod {
                    deployed_beat: beat,
                }));
                if !*expected {
                    ctx.inputter.expect(InputType::A, beat + DUNK_HIT_OFFSET)?;
                    *expected = true;
                }
            }
            EventKind::PaletteChange { from, .. } => {
                *from = Some(ctx.world.palette);
                if width <= 0.0 {
                    self.apply_palette(ctx, 1.0);
                }
            }
            EventKind::ResetMusicVolume => ctx.world.music_volume = 1.0,
            EventKind::Looping {
                period,
                condition,
                template,
                state,
            } => run_loop(ctx, beat, *period, *condition, &**template, state, current_beat)?,
            EventKind::JudgementCue { lane, score } => ctx.world.push_cue(Cue {
                beat,
                lane: *lane,
                score: *score,
            }),
            EventKind::Custom(hook) => hook.0.on_start(ctx, beat, current_beat)?,
        }
        Ok(())
    }

    pub(crate) fn on_update(&mut self, ctx: &mut EventContext<'_>, current_beat: f64) -> Result<()> {
        let beat = self.beat;
        match &mut self.kind {
            EventKind::DeployRod { row, state } => {
                register_rod_targets(ctx, *row, beat, state, current_beat)?
            }
            EventKind::DeployRodDunk { expected, .. } => {
                if !*expected {
                    ctx.inputter.expect(InputType::A, beat + DUNK_HIT_OFFSET)?;
                    *expected = true;
                }
            }
            EventKind::Looping {
                period,
                condition,
                template,
                state,
            } => run_loop(ctx, beat, *period, *condition, &**template, state, current_beat)?,
            EventKind::PaletteChange { .. } => {
                let progress = if self.width > 0.0 {
                    (current_beat - beat) / self.width
                } else {
                    1.0
                };
                self.apply_palette(ctx, progress);
            }
            EventKind::Custom(hook) => hook.0.on_update(ctx, beat, current_beat)?,
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn on_end(&mut self, ctx: &mut EventContext<'_>, current_beat: f64) -> Result<()> {
        let beat = self.beat;
        match &mut self.kind {
            EventKind::DeployRod { row, state } => {
                register_rod_targets(ctx, *row, beat, state, f64::INFINITY)?;
                if let Some(entity) = state.entity.take() {
                    ctx.world.remove_entity(entity);
                }
            }
            EventKind::DeployRodDunk { rod, .. } => {
                if let Some(entity) = rod.take() {
                    ctx.world.remove_entity(entity);
                }
            }
            EventKind::PaletteChange { .. } => self.apply_palette(ctx, 1.0),
            EventKind::Custom(hook) => hook.0.on_end(ctx, beat, current_beat)?,
            _ => {}
        }
        Ok(())
    }

    fn apply_palette(&mut self, ctx: &mut EventContext<'_>, progress: f64) {
        let EventKind::PaletteChange {
            tileset,
            pulse,
            reverse,
            from,
        } = &mut self.kind
        else {
            return;
        };
        let start = *from.get_or_insert(ctx.world.palette);
        let progress = progress.clamp(0.0, 1.0);
        let alpha = if *pulse {
            // There and back again over the window.
            if progress < 0.5 {
                progress * 2.0
            } else {
                (1.0 - progress) * 2.0
            }
        } else {
            progress
        };
        let (a, b) = if *reverse {
            (*tileset, start)
        } else {
            (start, *tileset)
        };
        ctx.world.palette = a.lerp(&b, alpha as f32);
    }
}

/// Registers an expectation for every piston the rod will reach within the
/// lookahead of `current_beat`.
fn register_rod_targets(
    ctx: &mut EventContext<'_>,
    row: Row,
    deployed_beat: f64,
    state: &mut RodState,
    current_beat: f64,
) -> Result<()> {
    let pistons: Vec<usize> = ctx.world.pistons(row).collect();
    while state.next_index < ROW_LENGTH {
        let target = rod_target(deployed_beat, state.next_index);
        if target - ROD_LOOKAHEAD > current_beat {
            break;
        }
        if pistons.contains(&state.next_index) {
            ctx.inputter.expect(row.lane(), target)?;
        }
        state.next_index += 1;
    }
    Ok(())
}

/// Spawns every iteration due by `current_beat`.
fn run_loop(
    ctx: &mut EventContext<'_>,
    loop_beat: f64,
    period: f64,
    condition: LoopCondition,
    template: &EventKind,
    state: &mut LoopState,
    current_beat: f64,
) -> Result<()> {
    while !state.stopped {
        let at = loop_beat + state.next_iteration as f64 * period;
        if at > current_beat {
            break;
        }
        let keep_going = match condition {
            LoopCondition::Always => true,
            LoopCondition::WhileAlive => ctx.inputter.is_alive(),
        };
        if !keep_going {
            state.stopped = true;
            tracing::debug!(loop_beat, at, "loop condition failed");
            break;
        }
        let mut child = Event::new(at, template.clone())?;
        if let Some(cursor) = state.resume_at.filter(|&cursor| at <= cursor) {
            child.rewind(cursor);
        }
        ctx.spawn(child);
        state.next_iteration += 1;
    }
    Ok(())
}
