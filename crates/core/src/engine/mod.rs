//! Playback session.
//!
//! One tick: advance the clock, drain work posted from other threads, turn
//! seconds into a beat, advance the timeline, expire missed inputs. Hooks and
//! judgement only ever run on the thread calling [`Engine::tick`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, Sender},
    Arc,
};

use crate::{
    AdvanceReport, Chart, EngineConfig, EngineError, Event, EventContext, EventKind, EventOrigin,
    InputResult, InputScore, InputType, Inputter, Judgement, Result, ScoreSnapshot, TempoChange,
    TempoMap, Timeline, TimingProvider, World,
};

/// Upper bound on hook-spawned follow-up passes within one tick.
const MAX_SPAWN_PASSES: usize = 64;

#[derive(Debug)]
enum Posted {
    Event(Event),
    Input { lane: InputType, at_seconds: f64 },
    Stop,
}

/// Cloneable, thread-safe handle for handing work to the engine. Posted
/// items are applied at the start of the next tick. Posting fails once the
/// session has stopped.
#[derive(Debug, Clone)]
pub struct EnginePoster {
    tx: Sender<Posted>,
    closed: Arc<AtomicBool>,
}

impl EnginePoster {
    pub fn post_event(&self, event: Event) -> Result<()> {
        self.send(Posted::Event(event))
    }

    pub fn post_input(&self, lane: InputType, at_seconds: f64) -> Result<()> {
        self.send(Posted::Input { lane, at_seconds })
    }

    /// Requests teardown at the next tick boundary.
    pub fn post_stop(&self) -> Result<()> {
        self.send(Posted::Stop)
    }

    fn send(&self, posted: Posted) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::msg("engine session has ended"));
        }
        self.tx
            .send(posted)
            .map_err(|_| EngineError::msg("engine session has ended"))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub seconds: f64,
    pub beat: f64,
    pub advance: AdvanceReport,
    pub judgements: Vec<Judgement>,
    pub missed: Vec<InputResult>,
    /// Set on the tick where the player ran out of lives.
    pub failed: bool,
    pub stopped: bool,
}

pub struct Engine {
    tempos: TempoMap,
    timing: Box<dyn TimingProvider>,
    timeline: Timeline,
    inputter: Inputter,
    world: World,
    tx: Sender<Posted>,
    rx: Receiver<Posted>,
    closed: Arc<AtomicBool>,
    seconds: f64,
    beat: f64,
    stopped: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("seconds", &self.seconds)
            .field("beat", &self.beat)
            .field("events", &self.timeline.len())
            .field("pending_inputs", &self.inputter.pending().len())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl Engine {
    pub fn new(timing: Box<dyn TimingProvider>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tempos: TempoMap::new(),
            timing,
            timeline: Timeline::new(),
            inputter: Inputter::new(0),
            world: World::new(),
            tx,
            rx,
            closed: Arc::new(AtomicBool::new(false)),
            seconds: 0.0,
            beat: 0.0,
            stopped: false,
        }
    }

    pub fn with_config(timing: Box<dyn TimingProvider>, config: &EngineConfig) -> Self {
        let mut engine = Self::new(timing);
        engine.inputter.set_max_lives(config.max_lives);
        engine.inputter.set_inputs_locked(config.inputs_locked);
        engine
    }

    pub fn poster(&self) -> EnginePoster {
        EnginePoster {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    pub fn beat(&self) -> f64 {
        self.beat
    }

    pub fn tempos(&self) -> &TempoMap {
        &self.tempos
    }

    pub fn tempos_mut(&mut self) -> &mut TempoMap {
        &mut self.tempos
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn inputter(&self) -> &Inputter {
        &self.inputter
    }

    pub fn inputter_mut(&mut self) -> &mut Inputter {
        &mut self.inputter
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn final_score(&self) -> ScoreSnapshot {
        self.inputter.final_score()
    }

    /// Schedules an event. Tempo-change events are also folded into the
    /// tempo map right away so conversions ahead of the cursor are correct.
    pub fn add_event(&mut self, event: Event) -> Result<()> {
        self.schedule(event, EventOrigin::Authored)
    }

    pub fn add_events(&mut self, events: impl IntoIterator<Item = Event>) -> Result<()> {
        for event in events {
            self.add_event(event)?;
        }
        Ok(())
    }

    /// Installs a chart: tempo map, skill star and a snapshot of its events.
    pub fn load_chart(&mut self, chart: &Chart) -> Result<()> {
        self.tempos = chart.tempo_map()?;
        self.inputter.set_skill_star_beat(chart.skill_star_beat());
        let loaded = self.timeline.load_snapshot(&chart.snapshot());
        tracing::info!(
            version = chart.version(),
            events = chart.events().len(),
            loaded,
            "chart installed"
        );
        Ok(())
    }

    /// Judges a press immediately. Must be called from the simulation
    /// thread; other threads go through [`EnginePoster::post_input`].
    pub fn on_input(&mut self, lane: InputType, at_seconds: f64) -> Result<Judgement> {
        let judgement = self.inputter.on_input(lane, at_seconds, &self.tempos);
        if let Judgement::Hit { result, .. } = &judgement {
            self.post_cue(lane, result.score)?;
        }
        Ok(judgement)
    }

    /// Corrects the clock and re-derives the timeline at the new position.
    /// Pending expectations are dropped; rods re-register theirs as they
    /// replay.
    pub fn seek_seconds(&mut self, seconds: f64) -> Result<()> {
        self.timing.set_seconds(seconds);
        self.seconds = self.timing.seconds()?;
        self.beat = self.tempos.seconds_to_beat(self.seconds);
        self.timeline.seek(self.beat);
        self.inputter.clear_pending();
        tracing::debug!(seconds = self.seconds, beat = self.beat, "engine seeked");
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.closed.store(true, Ordering::Release);
            tracing::info!(seconds = self.seconds, beat = self.beat, "session stopped");
        }
    }

    /// Runs one simulation tick. Clock and hook faults stop the session.
    pub fn tick(&mut self, delta: f64) -> Result<TickReport> {
        if self.stopped {
            return Err(EngineError::msg("engine session has been stopped"));
        }
        match self.run_tick(delta) {
            Ok(report) => Ok(report),
            Err(err) => {
                if err.is_fatal() {
                    tracing::warn!(%err, "fatal error, stopping session");
                    self.stop();
                }
                Err(err)
            }
        }
    }

    fn run_tick(&mut self, delta: f64) -> Result<TickReport> {
        self.timing.update(delta)?;
        self.seconds = self.timing.seconds()?;

        let mut report = TickReport {
            seconds: self.seconds,
            ..Default::default()
        };

        while let Ok(posted) = self.rx.try_recv() {
            match posted {
                Posted::Event(event) => self.schedule(event, EventOrigin::Posted)?,
                Posted::Input { lane, at_seconds } => {
                    report.judgements.push(self.on_input(lane, at_seconds)?)
                }
                Posted::Stop => report.stopped = true,
            }
        }

        self.beat = self.tempos.seconds_to_beat(self.seconds);
        report.beat = self.beat;
        report.advance = self.advance_timeline()?;

        let was_alive = self.inputter.is_alive();
        report.missed = self.inputter.expire_missed(self.seconds, &self.tempos);
        for miss in &report.missed {
            self.post_cue(miss.input_type, InputScore::Miss)?;
        }
        report.failed = was_alive && self.inputter.is_failed();

        if report.stopped {
            self.stop();
        }
        Ok(report)
    }

    fn advance_timeline(&mut self) -> Result<AdvanceReport> {
        let mut total = AdvanceReport::default();
        let mut spawned = Vec::new();
        for _ in 0..MAX_SPAWN_PASSES {
            let mut ctx = EventContext::new(
                &mut self.world,
                &mut self.inputter,
                &self.tempos,
                &mut spawned,
            );
            total.merge(self.timeline.advance_to(self.beat, &mut ctx)?);
            if spawned.is_empty() {
                return Ok(total);
            }
            for event in spawned.drain(..) {
                self.schedule(event, EventOrigin::Spawned)?;
            }
        }
        Err(EngineError::msg(format!(
            "events kept spawning past {MAX_SPAWN_PASSES} passes at beat {}",
            self.beat
        )))
    }

    fn schedule(&mut self, event: Event, origin: EventOrigin) -> Result<()> {
        if let EventKind::TempoChange { bpm } = event.kind {
            self.tempos
                .add_tempo_change(TempoChange::new(event.beat, bpm)?)?;
        }
        self.timeline.add_event_from(event, origin);
        Ok(())
    }

    fn post_cue(&mut self, lane: InputType, score: InputScore) -> Result<()> {
        let event = Event::new(self.beat.max(0.0), EventKind::JudgementCue { lane, score })?;
        self.timeline.add_event_from(event, EventOrigin::Posted);
        Ok(())
    }
}
