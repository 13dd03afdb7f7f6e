use std::sync::Arc;

use crate::{EngineError, Event, EventContext, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Pending,
    Active,
    Ended,
}

/// Where a scheduled event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// Part of the chart. Kept for the whole session.
    Authored,
    /// Spawned by another event's hook.
    Spawned,
    /// Handed over at runtime, e.g. judgement cues or cross-thread posts.
    Posted,
}

#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub event: Event,
    seq: u64,
    state: EventState,
    origin: EventOrigin,
}

impl ScheduledEvent {
    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn origin(&self) -> EventOrigin {
        self.origin
    }

    fn is_generated(&self) -> bool {
        self.origin != EventOrigin::Authored
    }

    /// Insertion sequence number; breaks ties between events on one beat.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Immutable, versioned list of events produced by the editor. The timeline
/// swaps its contents for a newer snapshot instead of being edited in place.
#[derive(Debug, Clone)]
pub struct EventSnapshot {
    version: u64,
    events: Arc<[Event]>,
}

impl EventSnapshot {
    pub fn new(version: u64, events: impl Into<Arc<[Event]>>) -> Self {
        Self {
            version,
            events: events.into(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdvanceReport {
    pub started: usize,
    pub updated: usize,
    pub ended: usize,
}

impl AdvanceReport {
    pub fn merge(&mut self, other: AdvanceReport) {
        self.started += other.started;
        self.updated += other.updated;
        self.ended += other.ended;
    }
}

/// Beat-ordered event timeline with a monotonically advancing cursor.
#[derive(Debug, Default)]
pub struct Timeline {
    events: Vec<ScheduledEvent>,
    next_seq: u64,
    cursor: Option<f64>,
    /// Everything before this index has ended.
    first_open: usize,
    snapshot_version: Option<u64>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Option<f64> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    pub fn snapshot_version(&self) -> Option<u64> {
        self.snapshot_version
    }

    /// Schedules a chart event. Events sharing a beat fire in insertion
    /// order.
    pub fn add_event(&mut self, event: Event) {
        self.add_event_from(event, EventOrigin::Authored);
    }

    /// Schedules a generated event. Generated events are dropped once they
    /// have ended, and on a seek when they lie past the new cursor.
    pub fn add_event_from(&mut self, event: Event, origin: EventOrigin) {
        let index = self.events.partition_point(|e| e.event.beat <= event.beat);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.insert(
            index,
            ScheduledEvent {
                event,
                seq,
                state: EventState::Pending,
                origin,
            },
        );
        self.first_open = self.first_open.min(index);
    }

    pub fn add_events(&mut self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.add_event(event);
        }
    }

    /// Replaces every event. Anything at or before the cursor is considered
    /// already played and will not fire.
    pub fn set_events(&mut self, events: impl IntoIterator<Item = Event>) {
        self.events.clear();
        self.first_open = 0;
        self.add_events(events);
        if let Some(cursor) = self.cursor {
            self.reseat(cursor);
        }
    }

    /// Installs `snapshot` if it is newer than the last one loaded. Returns
    /// whether anything changed.
    pub fn load_snapshot(&mut self, snapshot: &EventSnapshot) -> bool {
        if self
            .snapshot_version
            .map_or(false, |loaded| loaded >= snapshot.version)
        {
            return false;
        }
        self.set_events(snapshot.events.iter().cloned());
        self.snapshot_version = Some(snapshot.version);
        tracing::debug!(
            version = snapshot.version,
            events = self.events.len(),
            "timeline snapshot loaded"
        );
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.cursor = None;
        self.first_open = 0;
        self.snapshot_version = None;
    }

    /// Moves the cursor to `beat` without firing anything, re-deriving every
    /// event's state from scratch. Spawned events are dropped and spawned
    /// again on replay; posted events past the cursor are dropped.
    pub fn seek(&mut self, beat: f64) {
        self.reseat(beat);
        self.cursor = Some(beat);
    }

    /// Advances the cursor, firing start hooks in beat order and update/end
    /// hooks for events whose window is open. Moving backwards re-derives the
    /// state of every event instead of undoing anything.
    pub fn advance_to(&mut self, beat: f64, ctx: &mut EventContext<'_>) -> Result<AdvanceReport> {
        if !beat.is_finite() {
            return Err(EngineError::invalid(format!(
                "timeline cursor must be finite, got {beat}"
            )));
        }

        let moved = match self.cursor {
            Some(previous) if beat < previous => {
                tracing::debug!(from = previous, to = beat, "timeline rewound");
                self.reseat(beat);
                true
            }
            Some(previous) => beat != previous,
            None => true,
        };
        self.cursor = Some(beat);

        let mut report = AdvanceReport::default();
        let mut generated_ended = false;
        for scheduled in &mut self.events[self.first_open..] {
            let event = &mut scheduled.event;
            if event.beat > beat {
                break;
            }

            match scheduled.state {
                EventState::Pending => {
                    event.on_start(ctx, beat).map_err(|err| fault(event, err))?;
                    report.started += 1;
                    tracing::debug!(event = event.name(), beat = event.beat, "event started");
                    if event.is_instantaneous() {
                        scheduled.state = EventState::Ended;
                    } else if beat >= event.end_beat() {
                        event.on_end(ctx, beat).map_err(|err| fault(event, err))?;
                        report.ended += 1;
                        scheduled.state = EventState::Ended;
                    } else {
                        event.on_update(ctx, beat).map_err(|err| fault(event, err))?;
                        report.updated += 1;
                        scheduled.state = EventState::Active;
                    }
                }
                EventState::Active if moved => {
                    if beat >= event.end_beat() {
                        event.on_end(ctx, beat).map_err(|err| fault(event, err))?;
                        report.ended += 1;
                        scheduled.state = EventState::Ended;
                        tracing::debug!(event = event.name(), beat = event.beat, "event ended");
                    } else {
                        event.on_update(ctx, beat).map_err(|err| fault(event, err))?;
                        report.updated += 1;
                    }
                }
                EventState::Active | EventState::Ended => {}
            }
            generated_ended |= scheduled.is_generated() && scheduled.state == EventState::Ended;
        }

        if generated_ended {
            self.events
                .retain(|e| !(e.is_generated() && e.state == EventState::Ended));
            self.refresh_first_open();
        } else {
            while self
                .events
                .get(self.first_open)
                .map_or(false, |e| e.state == EventState::Ended)
            {
                self.first_open += 1;
            }
        }
        Ok(report)
    }

    fn reseat(&mut self, beat: f64) {
        for scheduled in &mut self.events {
            let event = &mut scheduled.event;
            scheduled.state = if event.beat > beat {
                event.reset_state();
                EventState::Pending
            } else if event.is_instantaneous() || beat >= event.end_beat() {
                EventState::Ended
            } else {
                event.rewind(beat);
                EventState::Active
            };
        }
        // Spawned events are always dropped: their spawner re-derives which
        // ones are still open. Posted events only survive while active.
        let before = self.events.len();
        self.events.retain(|e| match e.origin {
            EventOrigin::Authored => true,
            EventOrigin::Spawned => false,
            EventOrigin::Posted => e.state == EventState::Active,
        });
        if self.events.len() != before {
            tracing::debug!(
                dropped = before - self.events.len(),
                beat,
                "generated events dropped on seek"
            );
        }
        self.refresh_first_open();
    }

    fn refresh_first_open(&mut self) {
        self.first_open = self
            .events
            .iter()
            .position(|e| e.state != EventState::Ended)
            .unwrap_or(self.events.len());
    }
}

fn fault(event: &Event, err: EngineError) -> EngineError {
    tracing::warn!(event = event.name(), beat = event.beat, %err, "event hook failed");
    EngineError::HookFault {
        kind: event.name(),
        beat: event.beat,
        source: Box::new(err),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use super::*;
    use crate::{EventHook, EventKind, Inputter, TempoMap, World};

    /// Records every hook invocation as `(label, hook, beat)`.
    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<(String, &'static str, f64)>>>);

    impl Log {
        fn entries(&self) -> Vec<(String, &'static str, f64)> {
            self.0.lock().unwrap().clone()
        }

        fn starts(&self) -> Vec<String> {
            self.entries()
                .into_iter()
                .filter(|(_, hook, _)| *hook == "start")
                .map(|(label, _, _)| label)
                .collect()
        }
    }

    struct Recorder {
        label: String,
        log: Log,
    }

    impl EventHook for Recorder {
        fn on_start(&self, _: &mut EventContext<'_>, _: f64, current: f64) -> Result<()> {
            self.log.0.lock().unwrap().push((self.label.clone(), "start", current));
            Ok(())
        }

        fn on_update(&self, _: &mut EventContext<'_>, _: f64, current: f64) -> Result<()> {
            self.log.0.lock().unwrap().push((self.label.clone(), "update", current));
            Ok(())
        }

        fn on_end(&self, _: &mut EventContext<'_>, _: f64, current: f64) -> Result<()> {
            self.log.0.lock().unwrap().push((self.label.clone(), "end", current));
            Ok(())
        }
    }

    struct Failing(AtomicUsize);

    impl EventHook for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn on_start(&self, _: &mut EventContext<'_>, _: f64, _: f64) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::msg("script exploded"))
        }
    }

    fn logged(log: &Log, label: &str, beat: f64, width: f64) -> Event {
        Event::custom(
            beat,
            width,
            Recorder {
                label: label.to_string(),
                log: log.clone(),
            },
        )
        .unwrap()
    }

    struct Stage {
        world: World,
        inputter: Inputter,
        tempos: TempoMap,
        spawned: Vec<Event>,
    }

    impl Stage {
        fn new() -> Self {
            Self {
                world: World::new(),
                inputter: Inputter::new(0),
                tempos: TempoMap::constant(120.0).unwrap(),
                spawned: Vec::new(),
            }
        }

        fn advance(&mut self, timeline: &mut Timeline, beat: f64) -> Result<AdvanceReport> {
            let mut ctx = EventContext::new(
                &mut self.world,
                &mut self.inputter,
                &self.tempos,
                &mut self.spawned,
            );
            timeline.advance_to(beat, &mut ctx)
        }
    }

    #[test]
    fn starts_in_beat_order_with_stable_ties() {
        let log = Log::default();
        let mut timeline = Timeline::new();
        timeline.add_event(logged(&log, "c", 2.0, 0.0));
        timeline.add_event(logged(&log, "a", 1.0, 0.0));
        timeline.add_event(logged(&log, "b1", 1.5, 0.0));
        timeline.add_event(logged(&log, "b2", 1.5, 0.0));

        let mut stage = Stage::new();
        stage.advance(&mut timeline, 5.0).unwrap();
        assert_eq!(log.starts(), vec!["a", "b1", "b2", "c"]);
    }

    #[test]
    fn fires_each_start_exactly_once_over_forward_sequence() {
        let log = Log::default();
        let mut timeline = Timeline::new();
        for i in 0..20 {
            timeline.add_event(logged(&log, &format!("e{i}"), i as f64 * 0.5, 0.0));
        }

        let mut stage = Stage::new();
        for step in [0.0, 0.1, 0.1, 1.0, 3.3, 3.3, 4.0, 7.25, 9.0] {
            stage.advance(&mut timeline, step).unwrap();
        }
        let starts = log.starts();
        // Beats 0.0 through 9.0 inclusive.
        assert_eq!(starts.len(), 19);
        let mut unique = starts.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), starts.len());
    }

    #[test]
    fn repeated_advance_is_idempotent() {
        let log = Log::default();
        let mut timeline = Timeline::new();
        timeline.add_event(logged(&log, "short", 1.0, 0.0));
        timeline.add_event(logged(&log, "long", 1.0, 4.0));

        let mut stage = Stage::new();
        stage.advance(&mut timeline, 2.0).unwrap();
        let before = log.entries().len();
        let report = stage.advance(&mut timeline, 2.0).unwrap();
        assert_eq!(report, AdvanceReport::default());
        assert_eq!(log.entries().len(), before);
    }

    #[test]
    fn windows_update_then_end() {
        let log = Log::default();
        let mut timeline = Timeline::new();
        timeline.add_event(logged(&log, "window", 1.0, 2.0));

        let mut stage = Stage::new();
        stage.advance(&mut timeline, 0.5).unwrap();
        stage.advance(&mut timeline, 1.0).unwrap();
        stage.advance(&mut timeline, 2.0).unwrap();
        stage.advance(&mut timeline, 3.0).unwrap();
        stage.advance(&mut timeline, 4.0).unwrap();

        let hooks: Vec<(&str, f64)> = log.entries().iter().map(|(_, h, b)| (*h, *b)).collect();
        assert_eq!(
            hooks,
            vec![("start", 1.0), ("update", 1.0), ("update", 2.0), ("end", 3.0)]
        );
        assert_eq!(timeline.events()[0].state(), EventState::Ended);
    }

    #[test]
    fn late_start_past_window_ends_immediately() {
        let log = Log::default();
        let mut timeline = Timeline::new();
        timeline.add_event(logged(&log, "window", 1.0, 1.0));

        let mut stage = Stage::new();
        let report = stage.advance(&mut timeline, 10.0).unwrap();
        assert_eq!(report.started, 1);
        assert_eq!(report.ended, 1);
        let hooks: Vec<&str> = log.entries().iter().map(|(_, h, _)| *h).collect();
        assert_eq!(hooks, vec!["start", "end"]);
    }

    #[test]
    fn rewinding_rederives_state_and_refires_later_events() {
        let log = Log::default();
        let mut timeline = Timeline::new();
        timeline.add_event(logged(&log, "early", 1.0, 0.0));
        timeline.add_event(logged(&log, "late", 6.0, 0.0));

        let mut stage = Stage::new();
        stage.advance(&mut timeline, 8.0).unwrap();
        stage.advance(&mut timeline, 4.0).unwrap();
        assert_eq!(timeline.events()[0].state(), EventState::Ended);
        assert_eq!(timeline.events()[1].state(), EventState::Pending);

        stage.advance(&mut timeline, 8.0).unwrap();
        assert_eq!(log.starts(), vec!["early", "late", "late"]);
    }

    #[test]
    fn events_added_behind_cursor_fire_next_advance() {
        let log = Log::default();
        let mut timeline = Timeline::new();
        let mut stage = Stage::new();
        stage.advance(&mut timeline, 4.0).unwrap();

        timeline.add_event(logged(&log, "behind", 2.0, 0.0));
        stage.advance(&mut timeline, 4.0).unwrap();
        assert_eq!(log.starts(), vec!["behind"]);
    }

    #[test]
    fn hook_failure_propagates_without_retry() {
        let failing = Arc::new(Failing(AtomicUsize::new(0)));
        struct Shared(Arc<Failing>);
        impl EventHook for Shared {
            fn name(&self) -> &'static str {
                self.0.name()
            }
            fn on_start(&self, ctx: &mut EventContext<'_>, b: f64, c: f64) -> Result<()> {
                self.0.on_start(ctx, b, c)
            }
        }

        let mut timeline = Timeline::new();
        timeline.add_event(Event::custom(1.0, 0.0, Shared(Arc::clone(&failing))).unwrap());

        let mut stage = Stage::new();
        let err = stage.advance(&mut timeline, 2.0).unwrap_err();
        match err {
            EngineError::HookFault { kind, beat, .. } => {
                assert_eq!(kind, "failing");
                assert_eq!(beat, 1.0);
            }
            other => panic!("expected hook fault, got {other:?}"),
        }
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn generated_events_are_pruned_and_dropped_on_rewind() {
        let log = Log::default();
        let mut timeline = Timeline::new();
        timeline.add_event(logged(&log, "authored", 1.0, 0.0));
        timeline.add_event_from(logged(&log, "spawned", 2.0, 0.0), EventOrigin::Spawned);
        timeline.add_event_from(logged(&log, "rod", 2.0, 4.0), EventOrigin::Spawned);
        timeline.add_event_from(logged(&log, "window", 2.5, 4.0), EventOrigin::Posted);
        timeline.add_event_from(logged(&log, "cue", 6.0, 0.0), EventOrigin::Posted);

        let mut stage = Stage::new();
        stage.advance(&mut timeline, 3.0).unwrap();
        // Ended generated events are gone; the chart event and the open
        // windows stay.
        let origins: Vec<EventOrigin> = timeline.events().iter().map(|e| e.origin()).collect();
        assert_eq!(
            origins,
            vec![
                EventOrigin::Authored,
                EventOrigin::Spawned,
                EventOrigin::Posted,
                EventOrigin::Posted
            ]
        );

        // The open spawned window goes with its spawner; the posted one stays.
        timeline.seek(2.75);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.events()[1].origin(), EventOrigin::Posted);
        assert_eq!(timeline.events()[1].state(), EventState::Active);

        stage.advance(&mut timeline, 10.0).unwrap();
        assert_eq!(log.starts(), vec!["authored", "spawned", "rod", "window"]);
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn stale_snapshots_are_ignored() {
        let mut timeline = Timeline::new();
        let newer = EventSnapshot::new(
            2,
            vec![Event::new(1.0, EventKind::ResetMusicVolume).unwrap()],
        );
        let older = EventSnapshot::new(1, Vec::<Event>::new());

        assert!(timeline.load_snapshot(&newer));
        assert!(!timeline.load_snapshot(&older));
        assert!(!timeline.load_snapshot(&newer));
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.snapshot_version(), Some(2));
    }

    #[test]
    fn snapshot_loaded_mid_song_does_not_replay_the_past() {
        let mut timeline = Timeline::new();
        let mut stage = Stage::new();
        stage.advance(&mut timeline, 4.0).unwrap();

        let snapshot = EventSnapshot::new(
            1,
            vec![
                Event::new(2.0, EventKind::LockInputs { locked: true }).unwrap(),
                Event::new(6.0, EventKind::LockInputs { locked: true }).unwrap(),
            ],
        );
        timeline.load_snapshot(&snapshot);
        stage.advance(&mut timeline, 5.0).unwrap();
        assert!(!stage.inputter.are_inputs_locked());
        stage.advance(&mut timeline, 6.0).unwrap();
        assert!(stage.inputter.are_inputs_locked());
    }

    #[test]
    fn rejects_non_finite_cursor() {
        let mut timeline = Timeline::new();
        let mut stage = Stage::new();
        assert!(stage.advance(&mut timeline, f64::NAN).is_err());
    }
}
