//! Portfolio memory: outcome feedback driving provider weights, regime
//! parameters and confidence calibration.
//!
//! Single writer; readers take cloned snapshots. State persists as JSON
//! lines (one entry per outcome) and is replayed on startup, which also
//! makes updates idempotent across restarts.

use crate::domain::decision::{Decision, TradeOutcome};
use crate::domain::market::VolatilityRegime;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

const WEIGHT_FLOOR: f64 = 0.05;
const CALIBRATION_BUCKETS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Exponentially smoothed hit rate
    pub accuracy_ema: f64,
    /// Normalized ensemble weight
    pub weight: f64,
    pub samples: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeStats {
    pub samples: u64,
    pub wins: u64,
    pub total_pnl: f64,
}

/// Parameter overrides derived for a regime once enough samples exist.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeParams {
    pub min_confidence: f64,
    pub size_multiplier: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub predicted_sum: f64,
    pub wins: u64,
    pub total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    outcome: TradeOutcome,
    regime: VolatilityRegime,
    providers: BTreeMap<String, ProviderStats>,
}

pub struct PortfolioMemory {
    providers: BTreeMap<String, ProviderStats>,
    regimes: HashMap<VolatilityRegime, RegimeStats>,
    calibration: Vec<CalibrationBucket>,
    /// Outcome idempotence by position id
    seen: HashSet<String>,
    learning_rate: f64,
    min_samples_per_regime: u64,
    journal: Option<PathBuf>,
}

impl PortfolioMemory {
    pub fn new(
        provider_names: &[String],
        initial_weights: &HashMap<String, f64>,
        learning_rate: f64,
        min_samples_per_regime: u64,
        journal: Option<PathBuf>,
    ) -> Self {
        let uniform = 1.0 / provider_names.len().max(1) as f64;
        let mut providers = BTreeMap::new();
        for name in provider_names {
            providers.insert(
                name.clone(),
                ProviderStats {
                    accuracy_ema: 0.5,
                    weight: initial_weights.get(name).copied().unwrap_or(uniform),
                    samples: 0,
                },
            );
        }
        let mut memory = Self {
            providers,
            regimes: HashMap::new(),
            calibration: vec![CalibrationBucket::default(); CALIBRATION_BUCKETS],
            seen: HashSet::new(),
            learning_rate: learning_rate.clamp(0.0, 1.0),
            min_samples_per_regime,
            journal,
        };
        memory.renormalize();
        memory.replay_journal();
        memory
    }

    /// Apply one terminal outcome. Returns false for duplicates.
    pub fn record_outcome(&mut self, decision: &Decision, outcome: &TradeOutcome) -> bool {
        if !self.seen.insert(outcome.position_id.clone()) {
            return false;
        }

        let win = outcome.realized_pnl > Decimal::ZERO;

        for vote in decision.providers.iter().filter(|v| !v.is_errored()) {
            let Some(stats) = self.providers.get_mut(&vote.provider) else {
                continue;
            };
            // A provider scores when agreeing with a winner or dissenting
            // from a loser.
            let correct = (vote.action == decision.action) == win;
            let target = if correct { 1.0 } else { 0.0 };
            stats.accuracy_ema =
                (1.0 - self.learning_rate) * stats.accuracy_ema + self.learning_rate * target;
            stats.samples += 1;
        }
        self.reweight();

        let regime = self.regimes.entry(decision.regime).or_default();
        regime.samples += 1;
        if win {
            regime.wins += 1;
        }
        regime.total_pnl += outcome.realized_pnl.to_f64().unwrap_or(0.0);

        let bucket = ((decision.confidence / 100.0 * CALIBRATION_BUCKETS as f64) as usize)
            .min(CALIBRATION_BUCKETS - 1);
        let entry = &mut self.calibration[bucket];
        entry.predicted_sum += decision.confidence / 100.0;
        entry.total += 1;
        if win {
            entry.wins += 1;
        }

        self.append_journal(decision, outcome);
        info!(
            "PortfolioMemory: Recorded outcome for {} ({} {})",
            outcome.position_id,
            outcome.closed_by,
            outcome.realized_pnl
        );
        true
    }

    /// Current weights; always sum to 1.
    pub fn weights(&self) -> HashMap<String, f64> {
        self.providers
            .iter()
            .map(|(name, stats)| (name.clone(), stats.weight))
            .collect()
    }

    pub fn provider_stats(&self) -> BTreeMap<String, ProviderStats> {
        self.providers.clone()
    }

    /// Regime overrides; `None` until the regime has enough samples.
    pub fn regime_params(&self, regime: VolatilityRegime) -> Option<RegimeParams> {
        let stats = self.regimes.get(&regime)?;
        if stats.samples < self.min_samples_per_regime {
            return None;
        }
        let win_rate = stats.wins as f64 / stats.samples as f64;
        Some(RegimeParams {
            // A weak regime demands more conviction before acting.
            min_confidence: (70.0 - 20.0 * (win_rate - 0.5)).clamp(50.0, 90.0),
            size_multiplier: (0.5 + win_rate).clamp(0.5, 1.5),
        })
    }

    /// Per-bucket predicted vs realized win rates.
    pub fn calibration_report(&self) -> Vec<(f64, f64, f64, u64)> {
        self.calibration
            .iter()
            .enumerate()
            .filter(|(_, b)| b.total > 0)
            .map(|(i, b)| {
                (
                    i as f64 / CALIBRATION_BUCKETS as f64,
                    b.predicted_sum / b.total as f64,
                    b.wins as f64 / b.total as f64,
                    b.total,
                )
            })
            .collect()
    }

    pub fn outcomes_recorded(&self) -> usize {
        self.seen.len()
    }

    // Weight is accuracy with a floor, renormalized to sum 1.
    fn reweight(&mut self) {
        for stats in self.providers.values_mut() {
            stats.weight = stats.accuracy_ema.max(WEIGHT_FLOOR);
        }
        self.renormalize();
    }

    fn renormalize(&mut self) {
        let total: f64 = self.providers.values().map(|s| s.weight).sum();
        if total <= 0.0 {
            let uniform = 1.0 / self.providers.len().max(1) as f64;
            for stats in self.providers.values_mut() {
                stats.weight = uniform;
            }
            return;
        }
        for stats in self.providers.values_mut() {
            stats.weight /= total;
        }
    }

    fn append_journal(&self, decision: &Decision, outcome: &TradeOutcome) {
        let Some(path) = &self.journal else {
            return;
        };
        let entry = JournalEntry {
            outcome: outcome.clone(),
            regime: decision.regime,
            providers: self.providers.clone(),
        };
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
            writeln!(file, "{}", line)
        })();
        if let Err(e) = result {
            warn!("PortfolioMemory: Journal write failed: {}", e);
        }
    }

    fn replay_journal(&mut self) {
        let Some(path) = &self.journal else {
            return;
        };
        let Ok(raw) = std::fs::read_to_string(path) else {
            return;
        };

        let mut replayed = 0usize;
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => {
                    self.seen.insert(entry.outcome.position_id.clone());
                    let regime = self.regimes.entry(entry.regime).or_default();
                    regime.samples += 1;
                    if entry.outcome.realized_pnl > Decimal::ZERO {
                        regime.wins += 1;
                    }
                    regime.total_pnl += entry.outcome.realized_pnl.to_f64().unwrap_or(0.0);
                    // The last snapshot wins for provider state.
                    for (name, stats) in entry.providers {
                        self.providers.insert(name, stats);
                    }
                    replayed += 1;
                }
                Err(e) => warn!("PortfolioMemory: Skipping corrupt journal line: {}", e),
            }
        }
        if replayed > 0 {
            self.renormalize();
            info!("PortfolioMemory: Replayed {} journal entries", replayed);
        }
    }
}
