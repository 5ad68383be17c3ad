/// Risk scoring
///
/// Combines three weighted factors into a 0-100 score per user:
/// operational (payment and transaction anomalies), behavioral (contact
/// sharing and grooming patterns), and network (risk bleeding over from
/// connected users). Factor sums saturate with diminishing returns and
/// signal confidence decays by age, so a burst of fresh corroborating
/// evidence outweighs a pile of stale repeats.
pub mod factors;
pub mod policy;
pub mod store;
pub mod tiers;

pub use factors::SignalContribution;
pub use policy::ScoringPolicy;
pub use store::{RiskScore, ScoreStore};
pub use tiers::{RiskTier, TierBands, TrendDirection};

use crate::alerting::AlertStore;
use crate::error::{EngineError, EngineResult};
use crate::graph::GraphStore;
use crate::signals::SignalStore;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

/// Result of one score calculation, persisted or previewed.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreOutcome {
    pub score: RiskScore,
    /// Overall score from the previous calculation, if any.
    pub previous: Option<f64>,
    /// New score minus previous (previous taken as 0 for first scores).
    pub delta: f64,
    /// Per-signal contributions, sorted by contribution descending.
    pub contributions: Vec<SignalContribution>,
    /// Top contributing signal ids, bounded by policy, used to justify
    /// enforcement decisions.
    pub triggering_signal_ids: Vec<String>,
    /// Threshold alert raised by this calculation, if any.
    pub alert_id: Option<String>,
}

#[derive(Clone)]
pub struct Scorer {
    signals: SignalStore,
    graph: GraphStore,
    scores: ScoreStore,
    alerts: AlertStore,
    policy: ScoringPolicy,
}

impl Scorer {
    pub fn new(
        signals: SignalStore,
        graph: GraphStore,
        scores: ScoreStore,
        alerts: AlertStore,
        policy: ScoringPolicy,
    ) -> Self {
        Self {
            signals,
            graph,
            scores,
            alerts,
            policy,
        }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Compute and persist a new score row, raising a threshold alert when
    /// the score crosses the notification thresholds.
    pub async fn compute(&self, user_id: &str) -> EngineResult<ScoreOutcome> {
        let started = std::time::Instant::now();
        let mut outcome = self.calculate(user_id).await?;
        self.scores.insert(&outcome.score).await?;

        let alert = self
            .alerts
            .raise_threshold_alert(
                user_id,
                outcome.score.score,
                outcome.score.tier.as_str(),
                &outcome.triggering_signal_ids,
            )
            .await?;
        outcome.alert_id = alert.map(|a| a.id);

        crate::metrics::record_score_calculation(
            outcome.score.tier.as_str(),
            started.elapsed().as_secs_f64(),
        );
        tracing::debug!(
            user_id = %user_id,
            score = outcome.score.score,
            tier = outcome.score.tier.as_str(),
            delta = outcome.delta,
            "Recorded risk score"
        );
        Ok(outcome)
    }

    /// Same calculation as [`compute`](Self::compute) with no writes at
    /// all: no score row, no alert.
    pub async fn preview(&self, user_id: &str) -> EngineResult<ScoreOutcome> {
        self.calculate(user_id).await
    }

    async fn calculate(&self, user_id: &str) -> EngineResult<ScoreOutcome> {
        if user_id.is_empty() {
            return Err(EngineError::Validation("user_id is required".to_string()));
        }

        let now = Utc::now();
        let signals = self
            .signals
            .for_user_within(user_id, self.policy.signal_window_days)
            .await?;

        let (contributions, op_sum, beh_sum) =
            factors::factor_inputs(&signals, &self.policy, now);
        let operational = factors::saturating_factor(op_sum, self.policy.saturation);
        let behavioral = factors::saturating_factor(beh_sum, self.policy.saturation);

        let edges = self
            .graph
            .neighbors(user_id, self.policy.min_edge_strength)
            .await?;
        let mut neighbor_inputs = Vec::with_capacity(edges.len());
        for edge in &edges {
            if let Some(neighbor_score) = self.scores.latest(edge.other(user_id)).await? {
                neighbor_inputs.push((neighbor_score.score, edge.strength_score));
            }
        }
        let network = factors::network_factor(&neighbor_inputs, self.policy.contagion_factor);

        let overall = (operational * self.policy.operational_weight
            + behavioral * self.policy.behavioral_weight
            + network * self.policy.network_weight)
            .clamp(0.0, 100.0);

        let previous = self.scores.latest(user_id).await?.map(|s| s.score);
        let delta = overall - previous.unwrap_or(0.0);
        let trend = TrendDirection::classify(delta, self.policy.trend_epsilon);

        let triggering_signal_ids: Vec<String> = contributions
            .iter()
            .filter(|c| c.contribution > 0.0)
            .take(self.policy.top_contributor_limit)
            .map(|c| c.signal_id.clone())
            .collect();

        let score = RiskScore {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            score: overall,
            tier: self.policy.bands.tier_for(overall),
            trend,
            operational,
            behavioral,
            network,
            signal_count: signals.len() as i64,
            created_at: now,
        };

        Ok(ScoreOutcome {
            score,
            previous,
            delta,
            contributions,
            triggering_signal_ids,
            alert_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{create_alert_table, AlertPolicy, AlertStatus};
    use crate::graph::{create_relationship_table, RelationshipType};
    use crate::signals::{create_signal_table, NewSignal, SignalType};
    use crate::scoring::store::create_score_table;
    use sqlx::SqlitePool;

    async fn test_scorer() -> (Scorer, SqlitePool) {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_signal_table(&db).await;
        create_relationship_table(&db).await;
        create_score_table(&db).await;
        create_alert_table(&db).await;

        let scorer = Scorer::new(
            SignalStore::new(db.clone()),
            GraphStore::new(db.clone()),
            ScoreStore::new(db.clone()),
            AlertStore::new(db.clone(), AlertPolicy::default()),
            ScoringPolicy::default(),
        );
        (scorer, db)
    }

    fn contact_signal(user_id: &str, confidence: f64, obfuscated: bool) -> NewSignal {
        NewSignal {
            user_id: user_id.to_string(),
            source_event_id: None,
            signal_type: SignalType::ContactPhone,
            confidence,
            evidence: serde_json::json!({}),
            obfuscation_flags: if obfuscated {
                vec!["digit_words".to_string()]
            } else {
                vec![]
            },
            pattern_flags: vec![],
            detected_at: None,
        }
    }

    #[tokio::test]
    async fn test_single_obfuscated_contact_lands_in_low_tier() {
        let (scorer, db) = test_scorer().await;
        let signals = SignalStore::new(db);

        signals
            .record(contact_signal("u1", 0.9, true))
            .await
            .unwrap();

        let outcome = scorer.compute("u1").await.unwrap();
        // Effective confidence caps at 1.0, weighted input 0.60, so the
        // behavioral factor is 100*(1-e^-0.8) ~= 55.07 and the overall
        // score 0.40 * 55.07 ~= 22.0.
        assert!(outcome.score.score > 21.5 && outcome.score.score < 22.5);
        assert_eq!(outcome.score.tier, RiskTier::Low);
        assert_eq!(outcome.score.trend, TrendDirection::Rising);
        assert_eq!(outcome.score.signal_count, 1);
        assert_eq!(outcome.triggering_signal_ids.len(), 1);
        assert!((outcome.score.operational).abs() < 1e-9);

        // The row was persisted.
        let latest = scorer.scores.latest("u1").await.unwrap().unwrap();
        assert!((latest.score - outcome.score.score).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_evidence_scores_zero_monitor() {
        let (scorer, _db) = test_scorer().await;

        let outcome = scorer.compute("ghost").await.unwrap();
        assert!((outcome.score.score).abs() < 1e-9);
        assert_eq!(outcome.score.tier, RiskTier::Monitor);
        assert_eq!(outcome.score.trend, TrendDirection::Stable);
        assert!(outcome.contributions.is_empty());
        assert!(outcome.triggering_signal_ids.is_empty());
    }

    #[tokio::test]
    async fn test_network_contagion_without_own_signals() {
        let (scorer, db) = test_scorer().await;
        let graph = GraphStore::new(db.clone());
        let scores = ScoreStore::new(db);

        // A risky neighbor with a persisted score of 90.
        scores
            .insert(&RiskScore {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: "risky".to_string(),
                score: 90.0,
                tier: RiskTier::Critical,
                trend: TrendDirection::Stable,
                operational: 90.0,
                behavioral: 90.0,
                network: 0.0,
                signal_count: 8,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        graph
            .record_edge("clean", "risky", RelationshipType::Transaction, 0.8, serde_json::json!({}))
            .await
            .unwrap();

        let outcome = scorer.compute("clean").await.unwrap();
        // network = 90 * 0.8 * 0.15 = 10.8, overall = 0.30 * 10.8 = 3.24.
        assert!((outcome.score.network - 10.8).abs() < 1e-9);
        assert!((outcome.score.score - 3.24).abs() < 1e-9);
        assert!(outcome.triggering_signal_ids.is_empty());
    }

    #[tokio::test]
    async fn test_edges_below_strength_floor_ignored() {
        let (scorer, db) = test_scorer().await;
        let graph = GraphStore::new(db.clone());
        let scores = ScoreStore::new(db);

        scores
            .insert(&RiskScore {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: "risky".to_string(),
                score: 90.0,
                tier: RiskTier::Critical,
                trend: TrendDirection::Stable,
                operational: 90.0,
                behavioral: 90.0,
                network: 0.0,
                signal_count: 8,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        // Strength 0.05 is below the default 0.1 floor.
        graph
            .record_edge("clean", "risky", RelationshipType::Messaging, 0.05, serde_json::json!({}))
            .await
            .unwrap();

        let outcome = scorer.compute("clean").await.unwrap();
        assert!((outcome.score.network).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_preview_writes_nothing() {
        let (scorer, db) = test_scorer().await;
        let signals = SignalStore::new(db.clone());
        signals
            .record(contact_signal("u1", 0.9, true))
            .await
            .unwrap();

        let outcome = scorer.preview("u1").await.unwrap();
        assert!(outcome.score.score > 0.0);
        assert!(outcome.alert_id.is_none());

        // No score row and no alert were persisted.
        assert!(scorer.scores.latest("u1").await.unwrap().is_none());
        let alerts = scorer.alerts.list(None, None, None, 10).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_alert_raised_on_high_score() {
        let (scorer, db) = test_scorer().await;
        let signals = SignalStore::new(db.clone());
        let graph = GraphStore::new(db.clone());
        let scores = ScoreStore::new(db);

        // Saturate both direct factors.
        for _ in 0..10 {
            signals
                .record(NewSignal {
                    user_id: "u1".to_string(),
                    source_event_id: None,
                    signal_type: SignalType::PaymentExternal,
                    confidence: 1.0,
                    evidence: serde_json::json!({}),
                    obfuscation_flags: vec![],
                    pattern_flags: vec![],
                    detected_at: None,
                })
                .await
                .unwrap();
            signals
                .record(NewSignal {
                    user_id: "u1".to_string(),
                    source_event_id: None,
                    signal_type: SignalType::GroomingLanguage,
                    confidence: 1.0,
                    evidence: serde_json::json!({}),
                    obfuscation_flags: vec![],
                    pattern_flags: vec![],
                    detected_at: None,
                })
                .await
                .unwrap();
        }
        // And add a risky neighborhood to push past the high threshold.
        scores
            .insert(&RiskScore {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: "peer".to_string(),
                score: 90.0,
                tier: RiskTier::Critical,
                trend: TrendDirection::Stable,
                operational: 90.0,
                behavioral: 90.0,
                network: 0.0,
                signal_count: 8,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        graph
            .record_edge("u1", "peer", RelationshipType::Transaction, 1.0, serde_json::json!({}))
            .await
            .unwrap();

        let outcome = scorer.compute("u1").await.unwrap();
        assert!(outcome.score.score >= 70.0);
        assert!(outcome.alert_id.is_some());

        let alerts = scorer
            .alerts
            .list(Some(AlertStatus::Open), None, Some("u1"), 10)
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, "risk_score");
    }

    #[tokio::test]
    async fn test_immediate_recompute_is_stable() {
        let (scorer, db) = test_scorer().await;
        let signals = SignalStore::new(db);

        // A strong but already old signal: one half-life gone.
        signals
            .record(NewSignal {
                user_id: "u1".to_string(),
                source_event_id: None,
                signal_type: SignalType::GroomingLanguage,
                confidence: 1.0,
                evidence: serde_json::json!({}),
                obfuscation_flags: vec![],
                pattern_flags: vec![],
                detected_at: Some(Utc::now() - chrono::Duration::days(14)),
            })
            .await
            .unwrap();

        let first = scorer.compute("u1").await.unwrap();
        assert!(first.score.score > 0.0);
        // Recomputing immediately changes almost nothing.
        let second = scorer.compute("u1").await.unwrap();
        assert_eq!(second.score.trend, TrendDirection::Stable);
        assert!(second.delta.abs() < 0.5);
    }
}
