// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C3 — compaction detector: a per-pane state machine that scores chunks of
//! stripped terminal output for signs the attached agent is summarizing
//! (compacting) its own context, so the injection pipeline can hold off
//! until the pane is talking to the user again.
//!
//! Grounded on the teacher's compaction heuristics in `driver/claude/*`
//! (regex-scored chunk classification) and `session/state.rs`'s sustained-
//! duration state machine shape, generalized to the named signal/threshold
//! table below.

use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;

use regex::Regex;

pub const T_SUSPECT: f64 = 0.3;
pub const T_CONFIRM: f64 = 0.6;

pub const SUSPECT_SUSTAIN_MS: i64 = 300;
pub const CONFIRM_SUSTAIN_MS: i64 = 800;
pub const CONFIDENCE_DECAY_MS: i64 = 500;
pub const COOLDOWN_MS: i64 = 1500;
pub const RAPID_SUSPECT_WINDOW_MS: i64 = 2000;
pub const RAPID_SUSPECT_COUNT: usize = 3;
/// Exposed as a configurable setting (see `config::Settings::max_confirmed_ms`)
/// since real compactions run 5-15s and this bound only guards false
/// positives; callers that see longer compactions may raise it.
pub const MAX_CONFIRMED_MS: i64 = 30_000;
pub const EVIDENCE_DECAY_RESET_MS: i64 = 5_000;
pub const NO_CAUSATION_WINDOW_MS: i64 = 10_000;

const WEIGHT_LEXICAL: f64 = 0.3;
const WEIGHT_STRUCTURED: f64 = 0.5;
const WEIGHT_BURST_NO_PROMPT: f64 = 0.3;
const WEIGHT_NO_CAUSATION: f64 = 0.2;
const BURST_NO_PROMPT_CHUNK_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Lexical,
    Structured,
    BurstNoPrompt,
    NoCausation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionState {
    None,
    Suspected,
    Confirmed,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    PromptReady,
    ConfidenceDecayed,
    MaxConfirmedElapsed,
    ChunkInactivityTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReason {
    SustainedConfidence,
    RapidFire,
}

/// Emitted by [`CompactionDetector::feed`] / [`CompactionDetector::tick`] so
/// the caller can drive `cli.compaction.*` events without the detector
/// depending on the bus directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Suspected,
    Confirmed(StartReason),
    Ended(EndReason),
    ReturnedToNone,
}

fn lexical_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(compacting|summariz(e|ing)[^\n]*conversation|context window|truncat|conversation[^\n]*long|reducing context)",
        )
        .unwrap_or_else(|e| unreachable!("static lexical pattern must compile: {e}"))
    })
}

fn summary_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^##\s*Summary\b").unwrap_or_else(|e| unreachable!("static header pattern must compile: {e}"))
    })
}

fn bullet_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[-*]\s+(.{10,})$").unwrap_or_else(|e| unreachable!("static bullet pattern must compile: {e}"))
    })
}

fn prompt_ready_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(?:[$>]\s*$|^>\s*$)").unwrap_or_else(|e| unreachable!("static prompt pattern must compile: {e}"))
    })
}

fn has_lexical(text: &str) -> bool {
    lexical_regex().is_match(text)
}

fn has_structured(text: &str) -> bool {
    if summary_header_regex().is_match(text) {
        return true;
    }
    let mut run = 0;
    for line in text.lines() {
        if bullet_line_regex().is_match(line) {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn has_prompt_ready(text: &str) -> bool {
    prompt_ready_regex().is_match(text)
}

/// Four independent sustain trackers, one per threshold crossing the state
/// machine cares about. Each holds the timestamp a threshold was first
/// continuously satisfied, cleared the instant confidence falls back out.
#[derive(Default)]
struct SustainTrackers {
    above_suspect_since: Option<i64>,
    above_confirm_since: Option<i64>,
    below_suspect_since: Option<i64>,
    below_low_since: Option<i64>,
}

impl SustainTrackers {
    fn update(&mut self, confidence: f64, now_ms: i64) {
        self.above_suspect_since =
            if confidence >= T_SUSPECT { Some(self.above_suspect_since.unwrap_or(now_ms)) } else { None };
        self.above_confirm_since =
            if confidence >= T_CONFIRM { Some(self.above_confirm_since.unwrap_or(now_ms)) } else { None };
        self.below_suspect_since =
            if confidence < T_SUSPECT { Some(self.below_suspect_since.unwrap_or(now_ms)) } else { None };
        self.below_low_since = if confidence < 0.2 { Some(self.below_low_since.unwrap_or(now_ms)) } else { None };
    }

    fn sustained(since: Option<i64>, now_ms: i64) -> i64 {
        since.map(|s| now_ms - s).unwrap_or(0)
    }
}

/// Per-pane compaction detector state (spec `DetectorState`).
pub struct CompactionDetector {
    state: CompactionState,
    confidence: f64,
    active_signals: HashSet<Signal>,
    trackers: SustainTrackers,
    confirmed_at: Option<i64>,
    cooldown_entered_at: Option<i64>,
    suspect_hits: VecDeque<i64>,
    chunks_since_prompt: u32,
    last_chunk_time: Option<i64>,
    lexical_seen_since_suspected: bool,
}

impl Default for CompactionDetector {
    fn default() -> Self {
        Self {
            state: CompactionState::None,
            confidence: 0.0,
            active_signals: HashSet::new(),
            trackers: SustainTrackers::default(),
            confirmed_at: None,
            cooldown_entered_at: None,
            suspect_hits: VecDeque::new(),
            chunks_since_prompt: 0,
            last_chunk_time: None,
            lexical_seen_since_suspected: false,
        }
    }
}

impl CompactionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CompactionState {
        self.state
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn active_signals(&self) -> &HashSet<Signal> {
        &self.active_signals
    }

    /// Feed one chunk of stripped terminal text, returning any state
    /// transition that should be surfaced to the bus.
    pub fn feed(&mut self, text: &str, now_ms: i64, last_inject_requested_ms: Option<i64>) -> Option<Transition> {
        self.last_chunk_time = Some(now_ms);

        if has_prompt_ready(text) {
            self.chunks_since_prompt = 0;
        } else {
            self.chunks_since_prompt += 1;
        }

        let lexical = has_lexical(text);
        let structured = has_structured(text);
        let burst_no_prompt = self.chunks_since_prompt >= BURST_NO_PROMPT_CHUNK_COUNT;
        let no_causation = match last_inject_requested_ms {
            None => true,
            Some(t) => now_ms - t >= NO_CAUSATION_WINDOW_MS,
        };

        self.active_signals.clear();
        let mut confidence = 0.0;
        if lexical {
            self.active_signals.insert(Signal::Lexical);
            confidence += WEIGHT_LEXICAL;
        }
        if structured {
            self.active_signals.insert(Signal::Structured);
            confidence += WEIGHT_STRUCTURED;
        }
        if burst_no_prompt {
            self.active_signals.insert(Signal::BurstNoPrompt);
            confidence += WEIGHT_BURST_NO_PROMPT;
        }
        if no_causation {
            self.active_signals.insert(Signal::NoCausation);
            confidence += WEIGHT_NO_CAUSATION;
        }
        self.confidence = confidence.min(1.0);

        if self.state == CompactionState::Suspected && lexical {
            self.lexical_seen_since_suspected = true;
        }

        if self.confidence >= T_SUSPECT {
            self.suspect_hits.push_back(now_ms);
            while let Some(&front) = self.suspect_hits.front() {
                if now_ms - front > RAPID_SUSPECT_WINDOW_MS {
                    self.suspect_hits.pop_front();
                } else {
                    break;
                }
            }
        }

        self.trackers.update(self.confidence, now_ms);
        self.step(now_ms)
    }

    fn step(&mut self, now_ms: i64) -> Option<Transition> {
        match self.state {
            CompactionState::None => {
                if SustainTrackers::sustained(self.trackers.above_suspect_since, now_ms) >= SUSPECT_SUSTAIN_MS {
                    self.state = CompactionState::Suspected;
                    self.lexical_seen_since_suspected = self.active_signals.contains(&Signal::Lexical);
                    return Some(Transition::Suspected);
                }
                None
            }
            CompactionState::Suspected => {
                let rapid_fire = self.suspect_hits.len() >= RAPID_SUSPECT_COUNT
                    && self.active_signals.len() >= 2
                    && self.lexical_seen_since_suspected;
                let sustained_confirm = SustainTrackers::sustained(self.trackers.above_confirm_since, now_ms)
                    >= CONFIRM_SUSTAIN_MS
                    && self.lexical_seen_since_suspected;

                if rapid_fire {
                    self.state = CompactionState::Confirmed;
                    self.confirmed_at = Some(now_ms);
                    return Some(Transition::Confirmed(StartReason::RapidFire));
                }
                if sustained_confirm {
                    self.state = CompactionState::Confirmed;
                    self.confirmed_at = Some(now_ms);
                    return Some(Transition::Confirmed(StartReason::SustainedConfidence));
                }
                if SustainTrackers::sustained(self.trackers.below_suspect_since, now_ms) >= CONFIDENCE_DECAY_MS {
                    self.state = CompactionState::None;
                    self.lexical_seen_since_suspected = false;
                    return Some(Transition::ReturnedToNone);
                }
                None
            }
            CompactionState::Confirmed => {
                let prompt_ready = self.chunks_since_prompt == 0;
                let decayed = SustainTrackers::sustained(self.trackers.below_low_since, now_ms) >= CONFIDENCE_DECAY_MS;
                let max_elapsed = self.confirmed_at.map(|at| now_ms - at > MAX_CONFIRMED_MS).unwrap_or(false);

                if prompt_ready || decayed || max_elapsed {
                    self.state = CompactionState::Cooldown;
                    let reason = if prompt_ready {
                        EndReason::PromptReady
                    } else if max_elapsed {
                        EndReason::MaxConfirmedElapsed
                    } else {
                        EndReason::ConfidenceDecayed
                    };
                    self.confirmed_at = None;
                    self.cooldown_entered_at = Some(now_ms);
                    return Some(Transition::Ended(reason));
                }
                None
            }
            CompactionState::Cooldown => {
                if self.active_signals.contains(&Signal::Lexical) && self.confidence >= T_SUSPECT {
                    self.state = CompactionState::Confirmed;
                    self.confirmed_at = Some(now_ms);
                    return Some(Transition::Confirmed(StartReason::SustainedConfidence));
                }
                let elapsed = self.cooldown_entered_at.map(|since| now_ms - since).unwrap_or(0);
                if elapsed >= COOLDOWN_MS {
                    self.state = CompactionState::None;
                    return Some(Transition::ReturnedToNone);
                }
                None
            }
        }
    }

    /// Inactivity watchdog: call periodically (e.g. once per coordinator
    /// tick) even when no chunk has arrived.
    pub fn tick(&mut self, now_ms: i64) -> Option<Transition> {
        if self.state == CompactionState::None {
            return None;
        }
        let idle_ms = self.last_chunk_time.map(|t| now_ms - t).unwrap_or(i64::MAX);
        if idle_ms < EVIDENCE_DECAY_RESET_MS {
            return None;
        }
        let was_confirmed = self.state == CompactionState::Confirmed;
        self.reset();
        if was_confirmed {
            Some(Transition::Ended(EndReason::ChunkInactivityTimeout))
        } else {
            Some(Transition::ReturnedToNone)
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
