//! Input judgement.
//!
//! Presses arrive as `(lane, seconds)` pairs. Each press is matched against
//! the nearest pending expectation on the same lane and classified into an
//! [`InputScore`] tier by its absolute offset. Expectations nobody pressed
//! for expire as misses once the outer window has passed.

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result, TempoMap};

/// Fixed judgement windows, in seconds. These are gameplay constants and are
/// not configurable.
pub mod thresholds {
    pub const MAX_OFFSET_SEC: f64 = 7.0 / 60.0;
    pub const ACE_OFFSET: f64 = 1.0 / 60.0;
    pub const GOOD_OFFSET: f64 = 3.5 / 60.0;
    pub const BARELY_OFFSET: f64 = 5.0 / 60.0;
}

use thresholds::{ACE_OFFSET, BARELY_OFFSET, GOOD_OFFSET, MAX_OFFSET_SEC};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputType {
    A,
    Dpad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputScore {
    Ace,
    Good,
    Barely,
    Miss,
}

impl InputScore {
    /// Classifies a signed offset. The outer window is inclusive: a press
    /// exactly `MAX_OFFSET_SEC` away is still a Barely.
    pub fn classify(offset_seconds: f64) -> InputScore {
        let offset = offset_seconds.abs();
        if offset <= ACE_OFFSET {
            InputScore::Ace
        } else if offset <= GOOD_OFFSET {
            InputScore::Good
        } else if offset <= BARELY_OFFSET {
            InputScore::Barely
        } else if offset <= MAX_OFFSET_SEC {
            // Between the Barely window and the outer bound: weakest hit.
            InputScore::Barely
        } else {
            InputScore::Miss
        }
    }

    /// Contribution of one judged input to the raw score.
    pub fn weight(self) -> f64 {
        match self {
            InputScore::Ace => 1.0,
            InputScore::Good => 0.85,
            InputScore::Barely => 0.6,
            InputScore::Miss => 0.0,
        }
    }

    pub fn is_hit(self) -> bool {
        self != InputScore::Miss
    }
}

/// Outcome of one judged expectation. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputResult {
    pub input_type: InputType,
    /// Signed offset, actual minus expected. Zero for expired misses.
    pub offset_seconds: f64,
    /// Song position at which a perfect press would have landed.
    pub perfect_offset_seconds: f64,
    pub score: InputScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpectationId(u64);

/// An input the player is expected to make on `lane` at `target_beat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Expectation {
    pub id: ExpectationId,
    pub lane: InputType,
    pub target_beat: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Judgement {
    /// Inputs are locked; nothing changed.
    Ignored,
    /// No expectation on the lane within the outer window: the
    /// miss-by-no-target case. Counted as a stray input; costs no life.
    NoTarget,
    Hit {
        expectation: Expectation,
        result: InputResult,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub total_inputs: u32,
    pub aces: u32,
    pub goods: u32,
    pub barelies: u32,
    pub misses: u32,
    /// Presses that matched no expectation.
    pub stray_inputs: u32,
    /// Hits since the last miss.
    pub combo: u32,
    pub max_combo: u32,
}

impl InputStats {
    pub fn inputs_hit(&self) -> u32 {
        self.aces + self.goods + self.barelies
    }

    fn record(&mut self, score: InputScore) {
        self.total_inputs += 1;
        match score {
            InputScore::Ace => self.aces += 1,
            InputScore::Good => self.goods += 1,
            InputScore::Barely => self.barelies += 1,
            InputScore::Miss => self.misses += 1,
        }
        if score == InputScore::Miss {
            self.combo = 0;
        } else {
            self.combo += 1;
            self.max_combo = self.max_combo.max(self.combo);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ranking {
    TryAgain,
    Ok,
    Superb,
}

impl Ranking {
    pub fn from_score(score_int: u32) -> Ranking {
        match score_int {
            0..=59 => Ranking::TryAgain,
            60..=79 => Ranking::Ok,
            _ => Ranking::Superb,
        }
    }
}

/// Terminal score, taken once at the end of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSnapshot {
    pub score_int: u32,
    pub score_raw: f64,
    pub inputs_hit: u32,
    pub n_inputs: u32,
    pub max_combo: u32,
    pub skill_star: bool,
    pub no_miss: bool,
    pub ranking: Ranking,
}

#[derive(Debug, Clone)]
pub struct Inputter {
    locked: bool,
    pending: Vec<Expectation>,
    next_id: u64,
    stats: InputStats,
    results: Vec<InputResult>,
    weight_sum: f64,
    lives: u32,
    max_lives: u32,
    failed: bool,
    skill_star_beat: Option<f64>,
    skill_star: bool,
}

impl Default for Inputter {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Inputter {
    /// `max_lives == 0` disables the life counter.
    pub fn new(max_lives: u32) -> Self {
        Self {
            locked: false,
            pending: Vec::new(),
            next_id: 0,
            stats: InputStats::default(),
            results: Vec::new(),
            weight_sum: 0.0,
            lives: max_lives,
            max_lives,
            failed: false,
            skill_star_beat: None,
            skill_star: false,
        }
    }

    pub fn reset(&mut self) {
        let locked = self.locked;
        let skill_star_beat = self.skill_star_beat;
        *self = Self::new(self.max_lives);
        self.locked = locked;
        self.skill_star_beat = skill_star_beat;
    }

    pub fn set_max_lives(&mut self, max_lives: u32) {
        self.max_lives = max_lives;
        self.lives = max_lives;
        self.failed = false;
    }

    pub fn are_inputs_locked(&self) -> bool {
        self.locked
    }

    pub fn set_inputs_locked(&mut self, locked: bool) {
        self.locked = locked;
    }

    pub fn set_skill_star_beat(&mut self, beat: Option<f64>) {
        self.skill_star_beat = beat;
    }

    pub fn expect(&mut self, lane: InputType, target_beat: f64) -> Result<ExpectationId> {
        if !target_beat.is_finite() || target_beat < 0.0 {
            return Err(EngineError::invalid(format!(
                "input expectation beat must be >= 0, got {target_beat}"
            )));
        }
        let id = ExpectationId(self.next_id);
        self.next_id += 1;
        self.pending.push(Expectation {
            id,
            lane,
            target_beat,
        });
        Ok(id)
    }

    /// Pending expectations in scheduling order.
    pub fn pending(&self) -> &[Expectation] {
        &self.pending
    }

    pub fn on_input(&mut self, lane: InputType, at_seconds: f64, tempos: &TempoMap) -> Judgement {
        if self.locked {
            return Judgement::Ignored;
        }

        let at_beat = tempos.seconds_to_beat(at_seconds);
        let mut best: Option<(usize, f64, f64)> = None;
        for (index, expectation) in self.pending.iter().enumerate() {
            if expectation.lane != lane {
                continue;
            }
            let expected = tempos.beat_to_seconds(expectation.target_beat);
            let offset = at_seconds - expected;
            if offset.abs() > MAX_OFFSET_SEC {
                continue;
            }
            // Strictly closer only, so the earliest scheduled wins ties.
            if best.map_or(true, |(_, best_offset, _)| offset.abs() < best_offset.abs()) {
                best = Some((index, offset, expected));
            }
        }

        let Some((index, offset, expected)) = best else {
            self.stats.stray_inputs += 1;
            tracing::debug!(?lane, at_seconds, at_beat, "input matched no expectation");
            return Judgement::NoTarget;
        };

        let expectation = self.pending.remove(index);
        let score = InputScore::classify(offset);
        let result = InputResult {
            input_type: lane,
            offset_seconds: offset,
            perfect_offset_seconds: expected,
            score,
        };
        if score == InputScore::Ace
            && self
                .skill_star_beat
                .map_or(false, |beat| (beat - expectation.target_beat).abs() < 1e-6)
        {
            self.skill_star = true;
        }
        self.record(result);
        tracing::debug!(?lane, at_beat, offset, ?score, "input judged");
        Judgement::Hit {
            expectation,
            result,
        }
    }

    /// Converts every expectation whose window closed before `now_seconds`
    /// into a miss.
    pub fn expire_missed(&mut self, now_seconds: f64, tempos: &TempoMap) -> Vec<InputResult> {
        let mut missed = Vec::new();
        let mut index = 0;
        while index < self.pending.len() {
            let expected = tempos.beat_to_seconds(self.pending[index].target_beat);
            if now_seconds - expected > MAX_OFFSET_SEC {
                let expectation = self.pending.remove(index);
                let result = InputResult {
                    input_type: expectation.lane,
                    offset_seconds: 0.0,
                    perfect_offset_seconds: expected,
                    score: InputScore::Miss,
                };
                self.record(result);
                missed.push(result);
            } else {
                index += 1;
            }
        }
        missed
    }

    /// Drops every pending expectation without judging it (used on seeks).
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    fn record(&mut self, result: InputResult) {
        self.stats.record(result.score);
        self.weight_sum += result.score.weight();
        self.results.push(result);
        if result.score == InputScore::Miss {
            self.lose_life();
        }
    }

    fn lose_life(&mut self) {
        if self.max_lives == 0 || self.lives == 0 {
            return;
        }
        self.lives -= 1;
        if self.lives == 0 && !self.failed {
            self.failed = true;
            tracing::info!(misses = self.stats.misses, "out of lives");
        }
    }

    pub fn stats(&self) -> &InputStats {
        &self.stats
    }

    pub fn results(&self) -> &[InputResult] {
        &self.results
    }

    pub fn lives(&self) -> u32 {
        self.lives
    }

    pub fn max_lives(&self) -> u32 {
        self.max_lives
    }

    pub fn is_alive(&self) -> bool {
        !self.failed
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn has_skill_star(&self) -> bool {
        self.skill_star
    }

    pub fn final_score(&self) -> ScoreSnapshot {
        let n_inputs = self.stats.total_inputs;
        let score_raw = if n_inputs == 0 {
            0.0
        } else {
            self.weight_sum / n_inputs as f64 * 100.0
        };
        let score_int = score_raw.round().clamp(0.0, 100.0) as u32;
        ScoreSnapshot {
            score_int,
            score_raw,
            inputs_hit: self.stats.inputs_hit(),
            n_inputs,
            max_combo: self.stats.max_combo,
            skill_star: self.skill_star,
            no_miss: self.stats.misses == 0,
            ranking: Ranking::from_score(score_int),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn tempos() -> TempoMap {
        TempoMap::constant(120.0).unwrap()
    }

    fn judge_at(offset: f64) -> Judgement {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        inputter.expect(InputType::A, 4.0).unwrap();
        let target = tempos.beat_to_seconds(4.0);
        inputter.on_input(InputType::A, target + offset, &tempos)
    }

    fn score_of(judgement: Judgement) -> Option<InputScore> {
        match judgement {
            Judgement::Hit { result, .. } => Some(result.score),
            _ => None,
        }
    }

    #[test]
    fn classifies_nested_tiers() {
        assert_eq!(score_of(judge_at(ACE_OFFSET - EPS)), Some(InputScore::Ace));
        assert_eq!(score_of(judge_at(-(ACE_OFFSET - EPS))), Some(InputScore::Ace));
        assert_eq!(score_of(judge_at(GOOD_OFFSET - EPS)), Some(InputScore::Good));
        assert_eq!(score_of(judge_at(BARELY_OFFSET - EPS)), Some(InputScore::Barely));
        assert_eq!(score_of(judge_at(MAX_OFFSET_SEC - EPS)), Some(InputScore::Barely));
        assert_eq!(judge_at(MAX_OFFSET_SEC + EPS), Judgement::NoTarget);
    }

    #[test]
    fn outer_boundary_is_inclusive() {
        assert_eq!(InputScore::classify(MAX_OFFSET_SEC), InputScore::Barely);
        assert_eq!(InputScore::classify(-MAX_OFFSET_SEC), InputScore::Barely);
        assert_eq!(InputScore::classify(MAX_OFFSET_SEC + EPS), InputScore::Miss);
    }

    #[test]
    fn reports_signed_offset() {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        inputter.expect(InputType::Dpad, 2.0).unwrap();
        match inputter.on_input(InputType::Dpad, 1.0 - 0.03, &tempos) {
            Judgement::Hit { result, .. } => {
                assert!((result.offset_seconds + 0.03).abs() < 1e-9);
                assert!((result.perfect_offset_seconds - 1.0).abs() < 1e-9);
                assert_eq!(result.score, InputScore::Good);
            }
            other => panic!("expected a hit, got {other:?}"),
        }
    }

    #[test]
    fn equidistant_expectations_resolve_to_earliest_scheduled() {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        // 1/8 beat = 62.5 ms at 120 BPM, both within the outer window.
        let first = inputter.expect(InputType::A, 4.125).unwrap();
        let second = inputter.expect(InputType::A, 3.875).unwrap();
        let judgement = inputter.on_input(InputType::A, tempos.beat_to_seconds(4.0), &tempos);

        match judgement {
            Judgement::Hit { expectation, .. } => assert_eq!(expectation.id, first),
            other => panic!("expected a hit, got {other:?}"),
        }
        assert_eq!(inputter.pending().len(), 1);
        assert_eq!(inputter.pending()[0].id, second);
    }

    #[test]
    fn consumed_expectation_cannot_match_twice() {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        inputter.expect(InputType::A, 1.0).unwrap();
        let at = tempos.beat_to_seconds(1.0);
        assert!(matches!(
            inputter.on_input(InputType::A, at, &tempos),
            Judgement::Hit { .. }
        ));
        assert_eq!(inputter.on_input(InputType::A, at, &tempos), Judgement::NoTarget);
        assert_eq!(inputter.stats().stray_inputs, 1);
        assert_eq!(inputter.stats().total_inputs, 1);
    }

    #[test]
    fn lanes_do_not_cross_match() {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        inputter.expect(InputType::Dpad, 1.0).unwrap();
        let at = tempos.beat_to_seconds(1.0);
        assert_eq!(inputter.on_input(InputType::A, at, &tempos), Judgement::NoTarget);
        assert_eq!(inputter.pending().len(), 1);
    }

    #[test]
    fn locked_inputs_are_ignored() {
        let tempos = tempos();
        let mut inputter = Inputter::new(3);
        inputter.expect(InputType::A, 1.0).unwrap();
        inputter.set_inputs_locked(true);
        let judgement = inputter.on_input(InputType::A, tempos.beat_to_seconds(1.0), &tempos);
        assert_eq!(judgement, Judgement::Ignored);
        assert_eq!(inputter.stats(), &InputStats::default());
        assert_eq!(inputter.pending().len(), 1);
    }

    #[test]
    fn expired_expectations_become_misses() {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        inputter.expect(InputType::A, 2.0).unwrap();
        inputter.expect(InputType::A, 8.0).unwrap();

        assert!(inputter.expire_missed(1.0 + MAX_OFFSET_SEC - EPS, &tempos).is_empty());
        let missed = inputter.expire_missed(1.0 + MAX_OFFSET_SEC + EPS, &tempos);
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[0].score, InputScore::Miss);
        assert_eq!(inputter.stats().misses, 1);
        assert_eq!(inputter.pending().len(), 1);
    }

    #[test]
    fn running_out_of_lives_fails_once() {
        let tempos = tempos();
        let mut inputter = Inputter::new(2);
        for beat in [1.0, 2.0, 3.0, 4.0] {
            inputter.expect(InputType::A, beat).unwrap();
        }

        inputter.expire_missed(tempos.beat_to_seconds(1.5), &tempos);
        assert_eq!(inputter.lives(), 1);
        assert!(!inputter.is_failed());

        inputter.expire_missed(tempos.beat_to_seconds(2.5), &tempos);
        assert_eq!(inputter.lives(), 0);
        assert!(inputter.is_failed());

        inputter.expire_missed(tempos.beat_to_seconds(10.0), &tempos);
        assert_eq!(inputter.lives(), 0);
        assert!(inputter.is_failed());
        assert_eq!(inputter.stats().misses, 4);
    }

    #[test]
    fn lives_disabled_never_fail() {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        inputter.expect(InputType::A, 1.0).unwrap();
        inputter.expire_missed(100.0, &tempos);
        assert!(inputter.is_alive());
    }

    #[test]
    fn final_score_weights_tiers() {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        inputter.set_skill_star_beat(Some(1.0));
        for beat in [1.0, 2.0, 3.0] {
            inputter.expect(InputType::A, beat).unwrap();
        }
        inputter.on_input(InputType::A, tempos.beat_to_seconds(1.0), &tempos);
        inputter.on_input(InputType::A, tempos.beat_to_seconds(2.0) + 0.03, &tempos);
        inputter.on_input(InputType::A, tempos.beat_to_seconds(3.0) - 0.03, &tempos);

        let score = inputter.final_score();
        assert_eq!(score.n_inputs, 3);
        assert_eq!(score.inputs_hit, 3);
        assert!((score.score_raw - 90.0).abs() < 1e-9);
        assert_eq!(score.score_int, 90);
        assert!(score.skill_star);
        assert!(score.no_miss);
        assert_eq!(score.ranking, Ranking::Superb);
    }

    #[test]
    fn combo_breaks_on_miss_and_keeps_its_best() {
        let tempos = tempos();
        let mut inputter = Inputter::new(0);
        for beat in [1.0, 2.0, 3.0, 4.0, 5.0] {
            inputter.expect(InputType::A, beat).unwrap();
        }
        inputter.on_input(InputType::A, tempos.beat_to_seconds(1.0), &tempos);
        inputter.on_input(InputType::A, tempos.beat_to_seconds(2.0), &tempos);
        inputter.on_input(InputType::A, tempos.beat_to_seconds(3.0) + 0.05, &tempos);
        assert_eq!(inputter.stats().combo, 3);

        inputter.expire_missed(tempos.beat_to_seconds(4.0) + 0.2, &tempos);
        assert_eq!(inputter.stats().combo, 0);
        // A stray press neither extends nor breaks the combo.
        inputter.on_input(InputType::Dpad, tempos.beat_to_seconds(5.0), &tempos);
        assert_eq!(inputter.stats().combo, 0);
        inputter.on_input(InputType::A, tempos.beat_to_seconds(5.0), &tempos);
        assert_eq!(inputter.stats().combo, 1);

        let score = inputter.final_score();
        assert_eq!(score.max_combo, 3);
        assert!(!score.no_miss);
    }

    #[test]
    fn empty_session_scores_zero() {
        let score = Inputter::new(0).final_score();
        assert_eq!(score.score_int, 0);
        assert_eq!(score.ranking, Ranking::TryAgain);
    }

    #[test]
    fn rejects_negative_expectation() {
        let mut inputter = Inputter::new(0);
        assert!(inputter.expect(InputType::A, -1.0).is_err());
    }
}
