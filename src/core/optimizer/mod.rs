//! Pipeline optimizer
//!
//! Learns per-pipeline latency, cost, and quality from execution records
//! and recommends strategies. History and profiles are writer-serialized;
//! profile EWMAs use α = 0.3.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::pipeline::PipelineStrategy;

/// FIFO execution-history capacity.
const HISTORY_CAPACITY: usize = 1000;

/// EWMA weight on the newest sample.
const PROFILE_ALPHA: f64 = 0.3;

/// Rolling-success window and threshold driving auto-tune.
const TUNE_WINDOW: usize = 100;
const TUNE_SUCCESS_THRESHOLD: f64 = 0.8;

/// Optimization objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Cost,
    Latency,
    Quality,
    Balanced,
    Consensus,
}

/// Scoring weights; always sum to 1 after construction and tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Weights {
    pub cost: f64,
    pub latency: f64,
    pub quality: f64,
}

impl Weights {
    /// Build weights, renormalizing so they sum to 1.
    pub fn new(cost: f64, latency: f64, quality: f64) -> Self {
        let mut weights = Self {
            cost,
            latency,
            quality,
        };
        weights.normalize();
        weights
    }

    fn normalize(&mut self) {
        let sum = self.cost + self.latency + self.quality;
        if sum > 0.0 {
            self.cost /= sum;
            self.latency /= sum;
            self.quality /= sum;
        } else {
            *self = Self::default();
        }
    }

    pub fn sum(&self) -> f64 {
        self.cost + self.latency + self.quality
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            cost: 1.0 / 3.0,
            latency: 1.0 / 3.0,
            quality: 1.0 / 3.0,
        }
    }
}

/// One recorded pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Pipeline configuration id, the profile key
    pub configuration_id: String,
    pub strategy: PipelineStrategy,
    pub latency: Duration,
    pub cost: f64,
    /// Quality estimate in [0, 1]
    pub quality: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(
        configuration_id: impl Into<String>,
        strategy: PipelineStrategy,
        latency: Duration,
        cost: f64,
        quality: f64,
        success: bool,
    ) -> Self {
        Self {
            configuration_id: configuration_id.into(),
            strategy,
            latency,
            cost,
            quality,
            success,
            timestamp: Utc::now(),
        }
    }
}

/// Learned performance profile per pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub configuration_id: String,
    pub strategy: PipelineStrategy,
    /// EWMA latency in seconds
    pub avg_latency_s: f64,
    pub avg_cost: f64,
    pub avg_quality: f64,
    pub success_rate: f64,
    pub executions: u64,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceProfile {
    fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            configuration_id: record.configuration_id.clone(),
            strategy: record.strategy,
            avg_latency_s: record.latency.as_secs_f64(),
            avg_cost: record.cost,
            avg_quality: record.quality,
            success_rate: if record.success { 1.0 } else { 0.0 },
            executions: 1,
            last_updated: record.timestamp,
        }
    }

    fn update(&mut self, record: &ExecutionRecord) {
        let ewma = |old: f64, new: f64| PROFILE_ALPHA * new + (1.0 - PROFILE_ALPHA) * old;
        self.avg_latency_s = ewma(self.avg_latency_s, record.latency.as_secs_f64());
        self.avg_cost = ewma(self.avg_cost, record.cost);
        self.avg_quality = ewma(self.avg_quality, record.quality);
        self.success_rate = ewma(self.success_rate, if record.success { 1.0 } else { 0.0 });
        self.executions += 1;
        self.last_updated = record.timestamp;
    }

    /// Weighted score, discounted by success rate, with a confidence bonus
    /// that saturates at 100 executions.
    pub fn score(&self, weights: &Weights) -> f64 {
        let base = weights.latency * (1.0 / (1.0 + self.avg_latency_s))
            + weights.cost * (1.0 / (1.0 + self.avg_cost))
            + weights.quality * self.avg_quality;
        let confidence_bonus = (self.executions as f64 / 100.0).min(0.2);
        base * self.success_rate + confidence_bonus
    }
}

/// A recommended strategy with its expectations
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub strategy: PipelineStrategy,
    /// Stage timeout hint for cascade strategies
    #[serde(skip_serializing)]
    pub stage_timeout: Option<Duration>,
    pub expected_latency_s: Option<f64>,
    pub expected_cost: Option<f64>,
    pub expected_quality: Option<f64>,
    /// `min(executions / 100, 1)`
    pub confidence: f64,
}

/// Constraints for a recommendation
#[derive(Debug, Clone, Copy, Default)]
pub struct Constraints {
    pub objective: Option<Objective>,
    pub max_latency: Option<Duration>,
    pub max_cost: Option<f64>,
}

/// Strategy optimizer
pub struct Optimizer {
    weights: Mutex<Weights>,
    profiles: Mutex<HashMap<String, PerformanceProfile>>,
    history: Mutex<VecDeque<ExecutionRecord>>,
}

impl Optimizer {
    pub fn new(weights: Weights) -> Self {
        Self {
            weights: Mutex::new(weights),
            profiles: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    pub fn weights(&self) -> Weights {
        *self.weights.lock()
    }

    pub fn profile(&self, configuration_id: &str) -> Option<PerformanceProfile> {
        self.profiles.lock().get(configuration_id).cloned()
    }

    /// Record one execution into history and its profile.
    pub fn record_execution(&self, record: ExecutionRecord) {
        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_CAPACITY {
                history.pop_front();
            }
            history.push_back(record.clone());
        }

        let mut profiles = self.profiles.lock();
        match profiles.get_mut(&record.configuration_id) {
            Some(profile) => profile.update(&record),
            None => {
                profiles.insert(
                    record.configuration_id.clone(),
                    PerformanceProfile::from_record(&record),
                );
            }
        }
    }

    /// Pick the best strategy for an objective.
    ///
    /// With learned profiles, the argmax profile wins; otherwise the
    /// objective's heuristic default applies.
    pub fn select_optimal_strategy(&self, objective: Objective) -> (PipelineStrategy, Option<Duration>) {
        let weights = self.weights();
        let profiles = self.profiles.lock();
        if !profiles.is_empty() {
            let best = profiles
                .values()
                .max_by(|a, b| {
                    a.score(&weights)
                        .partial_cmp(&b.score(&weights))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("non-empty profile map has a max");
            debug!(strategy = %best.strategy, score = best.score(&weights), "profile-driven strategy");
            return (best.strategy, None);
        }
        drop(profiles);

        match objective {
            Objective::Cost => (PipelineStrategy::Cascade, Some(Duration::from_secs(2))),
            Objective::Latency => (PipelineStrategy::Cascade, Some(Duration::from_secs(1))),
            Objective::Quality | Objective::Balanced => (PipelineStrategy::DraftRefine, None),
            Objective::Consensus => (PipelineStrategy::Consensus, None),
        }
    }

    /// Recommend a pipeline under constraints.
    pub fn recommend_pipeline(&self, constraints: Constraints) -> Recommendation {
        let objective = constraints.objective.unwrap_or(Objective::Balanced);
        let (fallback_strategy, stage_timeout) = self.select_optimal_strategy(objective);

        let weights = self.weights();
        let profiles = self.profiles.lock();
        let best = profiles
            .values()
            .filter(|p| {
                constraints
                    .max_latency
                    .is_none_or(|max| p.avg_latency_s <= max.as_secs_f64())
            })
            .filter(|p| constraints.max_cost.is_none_or(|max| p.avg_cost <= max))
            .max_by(|a, b| {
                a.score(&weights)
                    .partial_cmp(&b.score(&weights))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        match best {
            Some(profile) => Recommendation {
                strategy: profile.strategy,
                stage_timeout: None,
                expected_latency_s: Some(profile.avg_latency_s),
                expected_cost: Some(profile.avg_cost),
                expected_quality: Some(profile.avg_quality),
                confidence: (profile.executions as f64 / 100.0).min(1.0),
            },
            None => Recommendation {
                strategy: fallback_strategy,
                stage_timeout,
                expected_latency_s: None,
                expected_cost: None,
                expected_quality: None,
                confidence: 0.0,
            },
        }
    }

    /// Shift weights toward quality when the rolling success rate over the
    /// last 100 records drops below 0.8.
    pub fn auto_tune(&self) {
        let rolling = {
            let history = self.history.lock();
            if history.is_empty() {
                return;
            }
            let window: Vec<_> = history.iter().rev().take(TUNE_WINDOW).collect();
            let successes = window.iter().filter(|r| r.success).count();
            successes as f64 / window.len() as f64
        };

        if rolling >= TUNE_SUCCESS_THRESHOLD {
            return;
        }

        let mut weights = self.weights.lock();
        weights.quality = (weights.quality * 1.1).min(0.6);
        weights.cost *= 0.95;
        weights.latency *= 0.95;
        weights.normalize();
        debug!(?weights, rolling, "auto-tuned weights toward quality");
    }

    /// Number of retained history records.
    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(Weights::default())
    }
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("weights", &self.weights())
            .field("profiles", &self.profiles.lock().len())
            .finish()
    }
}
