//! Per-phase uncertainty beliefs with Beta-Binomial updating and bias
//! correction.
//!
//! Each `(phase, dimension)` pair carries a Beta posterior over how reliable
//! point predictions for that slot have been.  Observed outcomes adjust the
//! posterior; signed prediction errors feed a rolling per-phase bias profile
//! whose correction shifts future forecasts.  Beliefs persist as JSON under
//! `<state_dir>/bayesian/<project>.json`; every prediction and ground-truth
//! observation is appended to the JSONL logs in the state directory.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::{BAYESIAN_DIR, GROUND_TRUTH_LOG, JsonlLog, PREDICTIONS_LOG};

/// A dimension prediction within this distance of the observed value counts
/// as a success for the posterior.
const SUCCESS_TOLERANCE: f64 = 0.25;

/// Rolling window of signed errors kept per phase.
const BIAS_WINDOW: usize = 50;

/// Largest forecast shift the bias correction may apply.
const MAX_CORRECTION: f64 = 0.3;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ideation,
    Design,
    Mvp,
    Implementation,
    Testing,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Ideation,
        Phase::Design,
        Phase::Mvp,
        Phase::Implementation,
        Phase::Testing,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Phase::Ideation => "ideation",
            Phase::Design => "design",
            Phase::Mvp => "mvp",
            Phase::Implementation => "implementation",
            Phase::Testing => "testing",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|phase| phase.slug() == raw)
    }

    /// Go/no-go confidence floor before bias adjustment.
    fn base_threshold(self) -> f64 {
        match self {
            Phase::Ideation => 0.60,
            Phase::Design | Phase::Mvp => 0.65,
            Phase::Implementation | Phase::Testing => 0.70,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Technical,
    Market,
    Resource,
    Timeline,
    Quality,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Technical,
        Dimension::Market,
        Dimension::Resource,
        Dimension::Timeline,
        Dimension::Quality,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            Dimension::Technical => "technical",
            Dimension::Market => "market",
            Dimension::Resource => "resource",
            Dimension::Timeline => "timeline",
            Dimension::Quality => "quality",
        }
    }
}

/// Five-dimension uncertainty sample, each component in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyVector {
    pub technical: f64,
    pub market: f64,
    pub resource: f64,
    pub timeline: f64,
    pub quality: f64,
}

impl UncertaintyVector {
    pub fn new(technical: f64, market: f64, resource: f64, timeline: f64, quality: f64) -> Self {
        Self {
            technical,
            market,
            resource,
            timeline,
            quality,
        }
    }

    pub fn uniform(value: f64) -> Self {
        Self::new(value, value, value, value, value)
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Technical => self.technical,
            Dimension::Market => self.market,
            Dimension::Resource => self.resource,
            Dimension::Timeline => self.timeline,
            Dimension::Quality => self.quality,
        }
    }

    pub fn magnitude(&self) -> f64 {
        (self.technical + self.market + self.resource + self.timeline + self.quality) / 5.0
    }
}

/// Beta posterior over prediction reliability for one `(phase, dimension)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub alpha: f64,
    pub beta: f64,
    pub observations: u64,
    pub last_updated: DateTime<Utc>,
}

impl Default for Belief {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            observations: 0,
            last_updated: Utc::now(),
        }
    }
}

impl Belief {
    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    /// Confidence grows strictly with observation count, independent of
    /// which way the posterior moved: `0.1 + 0.9·n/(n+10)`.
    pub fn confidence(&self) -> f64 {
        let n = self.observations as f64;
        0.1 + 0.9 * n / (n + 10.0)
    }

    fn record(&mut self, success: bool) {
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
        self.observations += 1;
        self.last_updated = Utc::now();
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    Unbiased,
    Optimistic,
    HighlyOptimistic,
    Pessimistic,
    HighlyPessimistic,
}

/// Rolling record of signed prediction errors (`predicted − observed`) for
/// one phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasProfile {
    errors: VecDeque<f64>,
}

impl BiasProfile {
    pub fn record(&mut self, signed_error: f64) {
        if self.errors.len() == BIAS_WINDOW {
            self.errors.pop_front();
        }
        self.errors.push_back(signed_error);
    }

    pub fn mean_error(&self) -> f64 {
        if self.errors.is_empty() {
            return 0.0;
        }
        self.errors.iter().sum::<f64>() / self.errors.len() as f64
    }

    pub fn kind(&self) -> BiasKind {
        let mean = self.mean_error();
        if mean > 0.15 {
            BiasKind::HighlyOptimistic
        } else if mean > 0.05 {
            BiasKind::Optimistic
        } else if mean < -0.15 {
            BiasKind::HighlyPessimistic
        } else if mean < -0.05 {
            BiasKind::Pessimistic
        } else {
            BiasKind::Unbiased
        }
    }

    /// Shift applied to future forecasts: opposite the mean error, capped.
    pub fn correction(&self) -> f64 {
        (-self.mean_error()).clamp(-MAX_CORRECTION, MAX_CORRECTION)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QuantumState {
    Deterministic,
    Probabilistic,
    Quantum,
    Chaotic,
    Void,
}

/// Threshold the predicted magnitude into its categorical label.
pub fn classify_quantum_state(magnitude: f64) -> QuantumState {
    if magnitude < 0.1 {
        QuantumState::Deterministic
    } else if magnitude < 0.3 {
        QuantumState::Probabilistic
    } else if magnitude < 0.6 {
        QuantumState::Quantum
    } else if magnitude < 0.9 {
        QuantumState::Chaotic
    } else {
        QuantumState::Void
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionForecast {
    pub dimension: Dimension,
    pub predicted: f64,
    /// Posterior mean of the reliability belief for this slot.
    pub reliability: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: String,
    pub urgency: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub phase: Phase,
    pub horizon: u32,
    pub predicted_magnitude: f64,
    pub confidence: f64,
    pub quantum_state: QuantumState,
    pub bias: BiasKind,
    pub correction_applied: f64,
    pub dimensions: Vec<DimensionForecast>,
    pub recommendations: Vec<Recommendation>,
    pub predicted_at: DateTime<Utc>,
}

impl Prediction {
    pub fn predicted_for(&self, dimension: Dimension) -> f64 {
        self.dimensions
            .iter()
            .find(|forecast| forecast.dimension == dimension)
            .map(|forecast| forecast.predicted)
            .unwrap_or(0.5)
    }
}

/// Adjusted go/no-go threshold with the inputs that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustedThreshold {
    pub base: f64,
    pub adjusted: f64,
    pub bias: BiasKind,
    pub bias_adjustment: f64,
    pub confidence_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroundTruthRecord {
    phase: Phase,
    predicted_magnitude: f64,
    observed_magnitude: f64,
    success: bool,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BeliefSnapshot {
    beliefs: BTreeMap<Phase, BTreeMap<Dimension, Belief>>,
    bias: BTreeMap<Phase, BiasProfile>,
}

pub struct BeliefTracker {
    project: String,
    state_dir: PathBuf,
    beliefs: BTreeMap<Phase, BTreeMap<Dimension, Belief>>,
    bias: BTreeMap<Phase, BiasProfile>,
    last_predictions: BTreeMap<Phase, Prediction>,
    predictions_log: JsonlLog,
    ground_truth_log: JsonlLog,
}

impl BeliefTracker {
    /// Create the tracker with uninformed priors, then overlay any persisted
    /// snapshot for `project`.  Reload is idempotent: loading the same
    /// snapshot twice yields the same state.
    pub fn new(project: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        let project = project.into();
        let state_dir = state_dir.into();

        let mut beliefs = BTreeMap::new();
        for phase in Phase::ALL {
            let mut row = BTreeMap::new();
            for dimension in Dimension::ALL {
                row.insert(dimension, Belief::default());
            }
            beliefs.insert(phase, row);
        }
        let bias = Phase::ALL
            .into_iter()
            .map(|phase| (phase, BiasProfile::default()))
            .collect();

        let mut tracker = Self {
            predictions_log: JsonlLog::new(state_dir.join(PREDICTIONS_LOG)),
            ground_truth_log: JsonlLog::new(state_dir.join(GROUND_TRUTH_LOG)),
            project,
            state_dir,
            beliefs,
            bias,
            last_predictions: BTreeMap::new(),
        };
        tracker.reload();
        tracker
    }

    fn snapshot_path(&self) -> PathBuf {
        self.state_dir
            .join(BAYESIAN_DIR)
            .join(format!("{}.json", self.project))
    }

    fn reload(&mut self) {
        let path = self.snapshot_path();
        let Ok(raw) = std::fs::read_to_string(&path) else {
            return;
        };
        match serde_json::from_str::<BeliefSnapshot>(&raw) {
            Ok(snapshot) => {
                for (phase, row) in snapshot.beliefs {
                    self.beliefs.insert(phase, row);
                }
                for (phase, profile) in snapshot.bias {
                    self.bias.insert(phase, profile);
                }
                info!(project = %self.project, path = %path.display(), "beliefs restored");
            }
            Err(err) => {
                warn!(error = %err, path = %path.display(), "belief snapshot unreadable — starting from priors");
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let snapshot = BeliefSnapshot {
            beliefs: self.beliefs.clone(),
            bias: self.bias.clone(),
        };
        let path = self.snapshot_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }

    pub fn belief(&self, phase: Phase, dimension: Dimension) -> &Belief {
        &self.beliefs[&phase][&dimension]
    }

    pub fn bias_profile(&self, phase: Phase) -> BiasKind {
        self.bias[&phase].kind()
    }

    /// Forecast the uncertainty vector for `phase`, `horizon` steps ahead.
    ///
    /// Each dimension forecast is the current value shifted by the phase's
    /// bias correction; the categorical state is a threshold on the mean
    /// forecast.  The prediction is remembered so later observations can be
    /// scored against it, and appended to the predictions log best-effort.
    pub async fn predict(
        &mut self,
        phase: Phase,
        current: UncertaintyVector,
        horizon: u32,
    ) -> Prediction {
        let profile = &self.bias[&phase];
        let correction = profile.correction();
        let bias = profile.kind();

        let dimensions: Vec<DimensionForecast> = Dimension::ALL
            .into_iter()
            .map(|dimension| {
                let belief = &self.beliefs[&phase][&dimension];
                DimensionForecast {
                    dimension,
                    predicted: (current.get(dimension) + correction).clamp(0.0, 1.0),
                    reliability: belief.mean(),
                    confidence: belief.confidence(),
                }
            })
            .collect();

        let predicted_magnitude = (dimensions
            .iter()
            .map(|forecast| forecast.predicted)
            .sum::<f64>()
            / dimensions.len() as f64)
            .clamp(0.0, 1.0);
        let confidence = dimensions
            .iter()
            .map(|forecast| forecast.confidence)
            .sum::<f64>()
            / dimensions.len() as f64;
        let quantum_state = classify_quantum_state(predicted_magnitude);
        let recommendations = recommend(phase, quantum_state, &dimensions);

        let prediction = Prediction {
            phase,
            horizon,
            predicted_magnitude,
            confidence,
            quantum_state,
            bias,
            correction_applied: correction,
            dimensions,
            recommendations,
            predicted_at: Utc::now(),
        };

        if let Err(err) = self.predictions_log.append(&prediction).await {
            warn!(error = %err, "failed to append prediction log entry");
        }
        self.last_predictions.insert(phase, prediction.clone());
        prediction
    }

    /// Score `prediction` against an observed outcome.
    ///
    /// Per dimension, a point prediction within [`SUCCESS_TOLERANCE`] of the
    /// observation increments `alpha`, otherwise `beta`.  The signed
    /// magnitude error feeds the phase's bias profile, the observation is
    /// appended to the ground-truth log, and the snapshot is persisted.
    pub async fn update(
        &mut self,
        phase: Phase,
        prediction: &Prediction,
        observed: UncertaintyVector,
        success: bool,
    ) -> Result<()> {
        for dimension in Dimension::ALL {
            let predicted = prediction.predicted_for(dimension);
            let hit = (predicted - observed.get(dimension)).abs() <= SUCCESS_TOLERANCE;
            self.beliefs
                .get_mut(&phase)
                .expect("all phases initialized")
                .get_mut(&dimension)
                .expect("all dimensions initialized")
                .record(hit);
        }

        let signed_error = prediction.predicted_magnitude - observed.magnitude();
        self.bias
            .get_mut(&phase)
            .expect("all phases initialized")
            .record(signed_error);

        let record = GroundTruthRecord {
            phase,
            predicted_magnitude: prediction.predicted_magnitude,
            observed_magnitude: observed.magnitude(),
            success,
            observed_at: Utc::now(),
        };
        if let Err(err) = self.ground_truth_log.append(&record).await {
            warn!(error = %err, "failed to append ground-truth log entry");
        }

        self.save()
    }

    /// Observation intake for the sync coordinator: score against the last
    /// prediction for `phase`, or a neutral mid-scale prediction when none
    /// was made this session.
    pub async fn observe(
        &mut self,
        phase: Phase,
        observed: UncertaintyVector,
        success: bool,
    ) -> Result<()> {
        let prediction = match self.last_predictions.get(&phase).cloned() {
            Some(prediction) => prediction,
            None => self.predict(phase, UncertaintyVector::uniform(0.5), 1).await,
        };
        self.update(phase, &prediction, observed, success).await
    }

    /// Phase threshold adjusted for learned bias and current confidence,
    /// clamped to [0.4, 0.9].
    pub fn adaptive_threshold(&self, phase: Phase, base_confidence: f64) -> AdjustedThreshold {
        let base = phase.base_threshold();
        let bias = self.bias_profile(phase);
        let bias_adjustment = match bias {
            BiasKind::Optimistic => 0.05,
            BiasKind::HighlyOptimistic => 0.10,
            BiasKind::Pessimistic => -0.05,
            BiasKind::HighlyPessimistic => -0.10,
            BiasKind::Unbiased => 0.0,
        };
        let confidence_factor = (base_confidence - 0.5) * 0.1;
        let adjusted = (base + bias_adjustment + confidence_factor).clamp(0.4, 0.9);

        AdjustedThreshold {
            base,
            adjusted,
            bias,
            bias_adjustment,
            confidence_factor,
        }
    }
}

fn recommend(
    phase: Phase,
    state: QuantumState,
    dimensions: &[DimensionForecast],
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();
    for forecast in dimensions {
        if forecast.predicted > 0.6 {
            recommendations.push(Recommendation {
                action: format!(
                    "reduce {} uncertainty before leaving {}",
                    forecast.dimension.slug(),
                    phase.slug()
                ),
                urgency: forecast.predicted,
                confidence: forecast.confidence,
            });
        }
    }
    if matches!(state, QuantumState::Chaotic | QuantumState::Void) {
        recommendations.push(Recommendation {
            action: format!("re-scope {} before committing further work", phase.slug()),
            urgency: 1.0,
            confidence: dimensions
                .iter()
                .map(|forecast| forecast.confidence)
                .fold(f64::MAX, f64::min)
                .min(1.0),
        });
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn temp_tracker(tag: &str) -> (PathBuf, BeliefTracker) {
        let dir = std::env::temp_dir().join(format!("udo-belief-{tag}-{}", Uuid::new_v4()));
        let tracker = BeliefTracker::new("test-project", &dir);
        (dir, tracker)
    }

    #[test]
    fn initializes_uninformed_priors_for_every_slot() {
        let (dir, tracker) = temp_tracker("init");
        for phase in Phase::ALL {
            for dimension in Dimension::ALL {
                let belief = tracker.belief(phase, dimension);
                assert!(belief.alpha >= 1.0);
                assert!(belief.beta >= 1.0);
                assert_eq!(belief.observations, 0);
            }
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn accurate_predictions_grow_alpha() -> Result<()> {
        let (dir, mut tracker) = temp_tracker("alpha");
        let prediction = tracker
            .predict(Phase::Design, UncertaintyVector::uniform(0.5), 1)
            .await;
        let alpha_before = tracker.belief(Phase::Design, Dimension::Technical).alpha;

        tracker
            .update(Phase::Design, &prediction, UncertaintyVector::uniform(0.55), true)
            .await?;

        let belief = tracker.belief(Phase::Design, Dimension::Technical);
        assert!(belief.alpha > alpha_before);
        assert_eq!(belief.observations, 1);

        let _ = std::fs::remove_dir_all(dir);
        Ok(())
    }

    #[tokio::test]
    async fn inaccurate_predictions_grow_beta() -> Result<()> {
        let (dir, mut tracker) = temp_tracker("beta");
        let prediction = tracker
            .predict(Phase::Mvp, UncertaintyVector::uniform(0.3), 1)
            .await;
        let beta_before = tracker.belief(Phase::Mvp, Dimension::Quality).beta;

        // 0.6 off — well outside the tolerance band.
        tracker
            .update(Phase::Mvp, &prediction, UncertaintyVector::uniform(0.9), false)
            .await?;

        assert!(tracker.belief(Phase::Mvp, Dimension::Quality).beta > beta_before);
        let _ = std::fs::remove_dir_all(dir);
        Ok(())
    }

    #[tokio::test]
    async fn confidence_is_monotone_in_observation_count() -> Result<()> {
        let (dir, mut tracker) = temp_tracker("monotone");
        let mut previous = tracker.belief(Phase::Testing, Dimension::Timeline).confidence();

        for i in 0..25 {
            let prediction = tracker
                .predict(Phase::Testing, UncertaintyVector::uniform(0.5), 1)
                .await;
            // Alternate hits and misses — confidence must still rise.
            let observed = if i % 2 == 0 { 0.5 } else { 0.95 };
            tracker
                .update(
                    Phase::Testing,
                    &prediction,
                    UncertaintyVector::uniform(observed),
                    i % 2 == 0,
                )
                .await?;

            let current = tracker.belief(Phase::Testing, Dimension::Timeline).confidence();
            assert!(current >= previous, "confidence regressed at step {i}");
            previous = current;
        }

        let _ = std::fs::remove_dir_all(dir);
        Ok(())
    }

    #[test]
    fn bias_labels_follow_mean_error_cutoffs() {
        let mut profile = BiasProfile::default();
        assert_eq!(profile.kind(), BiasKind::Unbiased);

        for _ in 0..20 {
            profile.record(0.3 - 0.5); // predicted low, observed high
        }
        assert_eq!(profile.kind(), BiasKind::HighlyPessimistic);
        assert!(profile.correction() > 0.0);

        let mut profile = BiasProfile::default();
        for _ in 0..20 {
            profile.record(0.08);
        }
        assert_eq!(profile.kind(), BiasKind::Optimistic);
        assert!(profile.correction() < 0.0);
    }

    #[test]
    fn correction_is_capped() {
        let mut profile = BiasProfile::default();
        for _ in 0..20 {
            profile.record(0.9);
        }
        assert!((profile.correction() + MAX_CORRECTION).abs() < 1e-9);
    }

    #[test]
    fn quantum_state_thresholds() {
        assert_eq!(classify_quantum_state(0.05), QuantumState::Deterministic);
        assert_eq!(classify_quantum_state(0.2), QuantumState::Probabilistic);
        assert_eq!(classify_quantum_state(0.45), QuantumState::Quantum);
        assert_eq!(classify_quantum_state(0.7), QuantumState::Chaotic);
        assert_eq!(classify_quantum_state(0.9), QuantumState::Void);
    }

    #[tokio::test]
    async fn learned_bias_lowers_forecast_and_raises_confidence() -> Result<()> {
        let (dir, mut tracker) = temp_tracker("learn");
        let input = UncertaintyVector::uniform(0.5);

        let before = tracker.predict(Phase::Design, input, 1).await;

        for _ in 0..10 {
            let prediction = tracker.predict(Phase::Design, input, 1).await;
            tracker
                .update(
                    Phase::Design,
                    &prediction,
                    UncertaintyVector::uniform(0.1),
                    false,
                )
                .await?;
        }

        let after = tracker.predict(Phase::Design, input, 1).await;
        assert!(
            after.predicted_magnitude < before.predicted_magnitude,
            "systematic over-prediction must pull forecasts down"
        );
        assert!(after.confidence > before.confidence);
        assert!(matches!(
            after.bias,
            BiasKind::Optimistic | BiasKind::HighlyOptimistic
        ));

        let _ = std::fs::remove_dir_all(dir);
        Ok(())
    }

    #[tokio::test]
    async fn high_uncertainty_produces_recommendations() {
        let (dir, mut tracker) = temp_tracker("recs");
        let prediction = tracker
            .predict(Phase::Implementation, UncertaintyVector::new(0.8, 0.9, 0.7, 0.8, 0.6), 1)
            .await;

        assert!(!prediction.recommendations.is_empty());
        for recommendation in &prediction.recommendations {
            assert!(recommendation.urgency > 0.0);
            assert!(recommendation.confidence > 0.0);
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn snapshot_round_trips_across_restart() -> Result<()> {
        let (dir, mut tracker) = temp_tracker("persist");
        let prediction = tracker
            .predict(Phase::Ideation, UncertaintyVector::uniform(0.4), 1)
            .await;
        tracker
            .update(Phase::Ideation, &prediction, UncertaintyVector::uniform(0.45), true)
            .await?;

        let reborn = BeliefTracker::new("test-project", &dir);
        assert_eq!(
            reborn.belief(Phase::Ideation, Dimension::Market),
            tracker.belief(Phase::Ideation, Dimension::Market)
        );
        assert_eq!(reborn.bias_profile(Phase::Ideation), tracker.bias_profile(Phase::Ideation));

        let _ = std::fs::remove_dir_all(dir);
        Ok(())
    }

    #[tokio::test]
    async fn adaptive_threshold_reflects_bias_and_clamps() -> Result<()> {
        let (dir, mut tracker) = temp_tracker("threshold");

        let neutral = tracker.adaptive_threshold(Phase::Design, 0.5);
        assert_eq!(neutral.base, 0.65);
        assert!((neutral.adjusted - 0.65).abs() < 1e-9);

        // Build a highly optimistic profile: threshold tightens by 0.10.
        for _ in 0..10 {
            let prediction = tracker
                .predict(Phase::Design, UncertaintyVector::uniform(0.8), 1)
                .await;
            tracker
                .update(
                    Phase::Design,
                    &prediction,
                    UncertaintyVector::uniform(0.2),
                    false,
                )
                .await?;
        }
        let tightened = tracker.adaptive_threshold(Phase::Design, 0.5);
        assert_eq!(tightened.bias, BiasKind::HighlyOptimistic);
        assert!(tightened.adjusted > tightened.base);
        assert!(tightened.adjusted <= 0.9);

        let _ = std::fs::remove_dir_all(dir);
        Ok(())
    }
}
