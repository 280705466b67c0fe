// Question selector: one collection cycle per round
//
// COLLECTING: pull payloads off the queue until the wall-clock deadline
//   (window length + broadcast delay margin).
// Decode: gunzip and parse each payload, keep chat messages whose event time
//   falls inside the window and whose text carries the command prefix.
// SELECTING: pick uniformly among candidates and reset the ladder, or on an
//   empty pool maybe pick a fallback question and move the ladder up a level.

use crate::codec;
use crate::config::PickerConfig;
use crate::error::{PickerError, PickerResult};
use crate::pool::CandidatePool;
use crate::queue::{QueueReceiver, Received};
use crate::window::{AdaptiveLadder, EventWindow};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of the selecting phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Picked from the viewers' questions
    Candidate(String),
    /// Picked from the pre-authored pool because the window was empty
    Fallback(String),
    Nothing,
}

impl Selection {
    pub fn text(&self) -> Option<&str> {
        match self {
            Selection::Candidate(text) | Selection::Fallback(text) => Some(text),
            Selection::Nothing => None,
        }
    }
}

/// Summary of one collection cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub selection: Selection,
    /// Length of the window this cycle collected over
    pub window_length: Duration,
    pub window: EventWindow,
    pub payloads: usize,
    pub skipped_payloads: usize,
    pub candidates: usize,
    /// Length the following cycle will use
    pub next_window_length: Duration,
}

pub struct QuestionSelector<R = StdRng> {
    ladder: AdaptiveLadder,
    prefix: String,
    broadcast_delay: Duration,
    fallback_probability: f64,
    fallback_questions: Vec<String>,
    rng: R,
}

impl QuestionSelector<StdRng> {
    pub fn from_config(config: &PickerConfig) -> PickerResult<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> QuestionSelector<R> {
    pub fn with_rng(config: &PickerConfig, rng: R) -> PickerResult<Self> {
        config.validate()?;

        Ok(Self {
            ladder: AdaptiveLadder::new(config.window_ladder.clone())?,
            prefix: config.command_prefix.clone(),
            broadcast_delay: config.broadcast_delay,
            fallback_probability: config.fallback_probability,
            fallback_questions: config.fallback_questions.clone(),
            rng,
        })
    }

    /// Window length the next cycle will collect over, for countdown displays
    pub fn upcoming_window(&self) -> Duration {
        self.ladder.current()
    }

    pub fn ladder(&self) -> &AdaptiveLadder {
        &self.ladder
    }

    /// Run one full COLLECTING -> SELECTING pass
    pub async fn run_cycle(&mut self, queue: &mut QueueReceiver) -> PickerResult<CycleReport> {
        let window_length = self.ladder.current();
        let window = EventWindow::starting_now(window_length, self.broadcast_delay);
        let deadline = Instant::now()
            .checked_add(window_length.saturating_add(self.broadcast_delay))
            .ok_or_else(|| {
                PickerError::InvalidConfig(format!(
                    "collection deadline overflows: window {:?} + delay {:?}",
                    window_length, self.broadcast_delay
                ))
            })?;

        info!(
            "Start collecting questions: window {:?} (level {}), event time {}..={}",
            window_length,
            self.ladder.level(),
            window.start,
            window.deadline
        );

        let payloads = collect(queue, deadline).await?;
        info!("Stopped collecting questions: {} payloads", payloads.len());

        let (pool, skipped_payloads) = self.build_pool(&payloads, &window);
        let selection = self.select(&pool);

        Ok(CycleReport {
            selection,
            window_length,
            window,
            payloads: payloads.len(),
            skipped_payloads,
            candidates: pool.len(),
            next_window_length: self.ladder.current(),
        })
    }

    /// Decode payloads into a fresh candidate pool; returns the pool and the
    /// number of payloads skipped as malformed
    pub fn build_pool(&self, payloads: &[Vec<u8>], window: &EventWindow) -> (CandidatePool, usize) {
        let mut pool = CandidatePool::new(self.prefix.as_str());
        let mut skipped = 0;

        for payload in payloads {
            let batch = match codec::decode_batch(payload) {
                Ok(batch) => batch,
                Err(e) => {
                    warn!("Skipping malformed payload: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            for event in codec::chat_events(&batch) {
                match event {
                    Ok(event) => {
                        debug!(
                            "msg: {}, uid: {}, timestamp: {}",
                            event.text, event.sender_id, event.event_time
                        );
                        pool.offer(&event, window);
                    }
                    Err(e) => warn!("Skipping malformed chat message: {}", e),
                }
            }
        }

        (pool, skipped)
    }

    /// End-of-window selection; moves the ladder
    pub fn select(&mut self, pool: &CandidatePool) -> Selection {
        if !pool.is_empty() {
            let questions = pool.questions();
            debug!("Candidates:\n{}", questions.join("\n"));
            self.ladder.reset();

            return match questions.choose(&mut self.rng) {
                Some(question) => {
                    info!("Selected question: {}", question);
                    Selection::Candidate(question.to_string())
                }
                None => Selection::Nothing,
            };
        }

        self.ladder.advance();
        info!(
            "No question collected, next window {:?} (level {})",
            self.ladder.current(),
            self.ladder.level()
        );

        if !self.fallback_questions.is_empty() && self.rng.gen_bool(self.fallback_probability) {
            if let Some(question) = self.fallback_questions.choose(&mut self.rng) {
                info!("Picked fallback question: {}", question);
                return Selection::Fallback(question.clone());
            }
        }

        Selection::Nothing
    }
}

/// Accumulate payloads until `deadline`
pub async fn collect(queue: &mut QueueReceiver, deadline: Instant) -> PickerResult<Vec<Vec<u8>>> {
    let mut payloads = Vec::new();

    while Instant::now() < deadline {
        match queue.get_with_timeout(deadline).await? {
            Received::Payload(payload) => payloads.push(payload),
            Received::Empty => break,
        }
    }

    Ok(payloads)
}
