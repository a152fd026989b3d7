//! Island-structured population store.
//!
//! Each island is an independent sub-population of valid candidates. Prompts
//! draw reference solutions from one island at a time; a periodic reset
//! reseeds the weakest half of the islands from the best members of the
//! strongest half.
//!
//! # Policies
//!
//! - **Island choice**: rank-based. Populated islands are ranked by best score
//!   (ascending) and island at rank `r` (1-based) is chosen with probability
//!   `r / (m(m+1)/2)`. Empty islands are only picked when every island is empty.
//! - **Prompt members**: the `solutions_per_prompt` highest scoring members,
//!   newer first on ties, returned worst to best.
//! - **Reset**: islands sorted by best score; the `k`-th weakest island is
//!   replaced by the best member of the `k`-th strongest, for `k < n / 2`.
//!   The reset timer is store-wide: a reset is due when the time since the
//!   store's last reset exceeds the period. [`Island::last_reset_at`] only
//!   records when an island was last reseeded and never triggers a reset.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::schema::Candidate;

use super::error::CorruptStateError;

/// A registered candidate with its registration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub candidate: Candidate,
    /// Registration sequence number; lower registered earlier.
    pub seq: u64,
}

/// An independent sub-population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Island {
    pub id: usize,
    pub members: Vec<Member>,
    pub created_at: DateTime<Utc>,
    pub last_reset_at: DateTime<Utc>,
}

impl Island {
    fn new(id: usize, now: DateTime<Utc>) -> Self {
        Self {
            id,
            members: Vec::new(),
            created_at: now,
            last_reset_at: now,
        }
    }

    /// Highest scoring member, earliest registration on ties.
    pub fn best(&self) -> Option<&Member> {
        best_member(self.members.iter())
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best().and_then(|m| m.candidate.score())
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn rank_score(&self) -> f64 {
        self.best()
            .map(|m| m.candidate.rank_score())
            .unwrap_or(f64::NEG_INFINITY)
    }
}

fn best_member<'a>(members: impl Iterator<Item = &'a Member>) -> Option<&'a Member> {
    members.fold(None, |best: Option<&Member>, m| match best {
        Some(b)
            if b.candidate
                .rank_score()
                .total_cmp(&m.candidate.rank_score())
                .then(m.seq.cmp(&b.seq))
                .is_ge() =>
        {
            Some(b)
        }
        _ => Some(m),
    })
}

/// Aggregate statistics over all islands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationStatistics {
    pub total_programs: usize,
    pub num_islands: usize,
    pub global_best_score: Option<f64>,
}

/// Per-island view for progress logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IslandSummary {
    pub id: usize,
    pub size: usize,
    pub best_score: Option<f64>,
}

/// Serialized form of a [`PopulationStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    pub solutions_per_prompt: usize,
    pub reset_period_secs: u64,
    pub last_reset_at: DateTime<Utc>,
    pub next_seq: u64,
    #[serde(default)]
    pub resets: u64,
    /// Run history length when the snapshot was taken, if known.
    #[serde(default)]
    pub history_len: Option<usize>,
    pub islands: Vec<Island>,
}

/// Archive of evaluated candidates split across a fixed number of islands.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationStore {
    islands: Vec<Island>,
    solutions_per_prompt: usize,
    reset_period: Duration,
    last_reset_at: DateTime<Utc>,
    next_seq: u64,
    resets: u64,
}

impl PopulationStore {
    /// Create a store with `num_islands` empty islands.
    pub fn new(num_islands: usize, solutions_per_prompt: usize, reset_period: Duration) -> Self {
        Self::new_at(num_islands, solutions_per_prompt, reset_period, Utc::now())
    }

    /// Create a store whose islands were created at `now`.
    pub fn new_at(
        num_islands: usize,
        solutions_per_prompt: usize,
        reset_period: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            islands: (0..num_islands.max(1)).map(|id| Island::new(id, now)).collect(),
            solutions_per_prompt: solutions_per_prompt.max(1),
            reset_period,
            last_reset_at: now,
            next_seq: 0,
            resets: 0,
        }
    }

    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    pub fn num_islands(&self) -> usize {
        self.islands.len()
    }

    pub fn solutions_per_prompt(&self) -> usize {
        self.solutions_per_prompt
    }

    /// Number of resets performed so far.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Register an evaluated candidate.
    ///
    /// With `island = None` the candidate joins every island. Candidates
    /// without a valid verdict are ignored. Returns whether it was admitted.
    pub fn register_solution(&mut self, candidate: Candidate, island: Option<usize>) -> bool {
        self.register_solution_at(candidate, island, Utc::now())
    }

    /// [`register_solution`](Self::register_solution) with an explicit clock.
    pub fn register_solution_at(
        &mut self,
        candidate: Candidate,
        island: Option<usize>,
        now: DateTime<Utc>,
    ) -> bool {
        if !candidate.is_valid() {
            return false;
        }

        let seq = self.next_seq;
        let num_islands = self.islands.len();
        match island {
            Some(id) => {
                let Some(target) = self.islands.get_mut(id) else {
                    warn!(
                        "Ignoring registration to island {} (store has {} islands)",
                        id, num_islands
                    );
                    return false;
                };
                target.members.push(Member { candidate, seq });
            }
            None => {
                for target in &mut self.islands {
                    target.members.push(Member {
                        candidate: candidate.clone(),
                        seq,
                    });
                }
            }
        }
        self.next_seq += 1;

        if self.reset_due(now) {
            self.reset_islands(now);
        }
        true
    }

    /// Store-wide timer; per-island timestamps are informational.
    fn reset_due(&self, now: DateTime<Utc>) -> bool {
        // Clock going backwards never triggers a reset.
        (now - self.last_reset_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed > self.reset_period)
    }

    /// Reseed the weakest half of the islands from the strongest half.
    pub fn reset_islands(&mut self, now: DateTime<Utc>) {
        self.last_reset_at = now;
        self.resets += 1;

        let n = self.islands.len();
        let cull = n / 2;
        if cull == 0 {
            return;
        }

        let order = self.islands_by_strength();
        let weakest = &order[..cull];
        let strongest = order.iter().rev().take(cull);

        for (&weak, &donor) in weakest.iter().zip(strongest) {
            let Some(exemplar) = self.islands[donor].best().cloned() else {
                continue;
            };
            debug!(
                "Reset: island {} (best {:?}) reseeded from island {} (best {:?})",
                weak,
                self.islands[weak].best_score(),
                donor,
                exemplar.candidate.score()
            );
            let island = &mut self.islands[weak];
            island.members = vec![exemplar];
            island.last_reset_at = now;
        }

        info!(
            "Reset #{}: reseeded {} of {} islands, global best {:?}",
            self.resets,
            cull,
            n,
            self.statistics().global_best_score
        );
    }

    /// Island ids ordered weakest first. Ties put the higher id first.
    fn islands_by_strength(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.islands.len()).collect();
        order.sort_by(|&a, &b| {
            self.islands[a]
                .rank_score()
                .total_cmp(&self.islands[b].rank_score())
                .then(b.cmp(&a))
        });
        order
    }

    /// Choose an island and up to `solutions_per_prompt` of its members.
    ///
    /// Members are returned worst to best. The vector is empty if the chosen
    /// island has no members yet.
    pub fn select_prompt_solutions<R: Rng + ?Sized>(&self, rng: &mut R) -> (Vec<Candidate>, usize) {
        let id = self.choose_island(rng);
        let mut ranked: Vec<&Member> = self.islands[id].members.iter().collect();
        ranked.sort_by(|a, b| {
            b.candidate
                .rank_score()
                .total_cmp(&a.candidate.rank_score())
                .then(b.seq.cmp(&a.seq))
        });
        ranked.truncate(self.solutions_per_prompt);

        let solutions = ranked
            .into_iter()
            .rev()
            .map(|m| m.candidate.clone())
            .collect();
        (solutions, id)
    }

    fn choose_island<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let populated: Vec<usize> = self
            .islands_by_strength()
            .into_iter()
            .filter(|&id| !self.islands[id].is_empty())
            .collect();

        if populated.is_empty() {
            return rng.gen_range(0..self.islands.len());
        }

        let m = populated.len();
        let mut target = rng.gen_range(0..m * (m + 1) / 2);
        for (rank, &id) in populated.iter().enumerate() {
            let weight = rank + 1;
            if target < weight {
                return id;
            }
            target -= weight;
        }
        populated[m - 1]
    }

    /// Highest scoring candidate across all islands, earliest on ties.
    pub fn best_solution(&self) -> Option<&Candidate> {
        best_member(self.islands.iter().flat_map(|i| i.members.iter())).map(|m| &m.candidate)
    }

    pub fn statistics(&self) -> PopulationStatistics {
        PopulationStatistics {
            total_programs: self.islands.iter().map(Island::len).sum(),
            num_islands: self.islands.len(),
            global_best_score: self.best_solution().and_then(Candidate::score),
        }
    }

    pub fn island_summaries(&self) -> Vec<IslandSummary> {
        self.islands
            .iter()
            .map(|island| IslandSummary {
                id: island.id,
                size: island.len(),
                best_score: island.best_score(),
            })
            .collect()
    }

    /// Rebuild a store from run history, registering every valid entry to
    /// all islands.
    ///
    /// Island assignment is not recorded in history, so the result
    /// approximates the lost population rather than reproducing it.
    pub fn replay<'a>(
        history: impl IntoIterator<Item = &'a Candidate>,
        num_islands: usize,
        solutions_per_prompt: usize,
        reset_period: Duration,
    ) -> Self {
        let mut store = Self::new(num_islands, solutions_per_prompt, reset_period);
        for candidate in history {
            if candidate.is_valid() {
                store.register_solution(candidate.clone(), None);
            }
        }
        store
    }

    pub fn to_snapshot(&self) -> PopulationSnapshot {
        PopulationSnapshot {
            solutions_per_prompt: self.solutions_per_prompt,
            reset_period_secs: self.reset_period.as_secs(),
            last_reset_at: self.last_reset_at,
            next_seq: self.next_seq,
            resets: self.resets,
            history_len: None,
            islands: self.islands.clone(),
        }
    }

    /// Restore a store, checking the snapshot's invariants.
    pub fn from_snapshot(snapshot: PopulationSnapshot) -> Result<Self, CorruptStateError> {
        if snapshot.islands.is_empty() {
            return Err(CorruptStateError::new("snapshot has no islands"));
        }
        if snapshot.solutions_per_prompt == 0 {
            return Err(CorruptStateError::new("solutions_per_prompt is zero"));
        }
        for (index, island) in snapshot.islands.iter().enumerate() {
            if island.id != index {
                return Err(CorruptStateError::new(format!(
                    "island at position {} has id {}",
                    index, island.id
                )));
            }
            for member in &island.members {
                if !member.candidate.is_valid() {
                    return Err(CorruptStateError::new(format!(
                        "island {} holds a candidate without a valid verdict",
                        island.id
                    )));
                }
                if member.seq >= snapshot.next_seq {
                    return Err(CorruptStateError::new(format!(
                        "island {} member seq {} is not below next_seq {}",
                        island.id, member.seq, snapshot.next_seq
                    )));
                }
            }
        }

        Ok(Self {
            islands: snapshot.islands,
            solutions_per_prompt: snapshot.solutions_per_prompt,
            reset_period: Duration::from_secs(snapshot.reset_period_secs),
            last_reset_at: snapshot.last_reset_at,
            next_seq: snapshot.next_seq,
            resets: snapshot.resets,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_snapshot())
    }

    pub fn from_json(json: &str) -> Result<Self, CorruptStateError> {
        let snapshot: PopulationSnapshot =
            serde_json::from_str(json).map_err(|e| CorruptStateError::new(e.to_string()))?;
        Self::from_snapshot(snapshot)
    }
}
