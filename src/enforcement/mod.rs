/// Enforcement engine
///
/// Turns score outcomes into tiered enforcement actions. The ladder
/// escalates one rung at a time (soft warning, hard warning, temporary
/// restriction, account suspension) and only when the new tier strictly
/// exceeds the tier that triggered the user's active action. Critical
/// scores backed by an override signal may jump straight to suspension.
/// The engine never applies a permanent ban; at the top of the ladder it
/// raises a ban recommendation alert for a human decision instead. The
/// action and its alert are committed in one transaction.
pub mod actions;

pub use actions::{ActionStore, ActionType, EnforcementAction, NewAction, ReasonCode};

use crate::alerting::{AlertPriority, AlertStatus, AlertStore, NewAlert};
use crate::audit::AuditStore;
use crate::error::{EngineError, EngineResult};
use crate::scoring::{RiskTier, ScoreOutcome};
use crate::signals::{SignalStore, SignalType};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tunable enforcement rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementPolicy {
    /// Lowest tier that triggers a first action for users with no active
    /// enforcement state.
    pub min_action_tier: RiskTier,
    /// Signal types that let a critical-tier score jump the ladder
    /// straight to suspension.
    pub critical_override_types: Vec<SignalType>,
    /// Effective window for a temporary restriction.
    pub restriction_hours: i64,
    /// Longer window applied when the triggering evidence shows evasion.
    pub evasion_restriction_hours: i64,
}

impl Default for EnforcementPolicy {
    fn default() -> Self {
        Self {
            min_action_tier: RiskTier::Medium,
            critical_override_types: vec![SignalType::PaymentExternal],
            restriction_hours: 24,
            evasion_restriction_hours: 72,
        }
    }
}

impl EnforcementPolicy {
    pub fn validate(&self) -> EngineResult<()> {
        if self.restriction_hours < 1 {
            return Err(EngineError::Config(
                "restriction_hours must be at least 1".to_string(),
            ));
        }
        if self.evasion_restriction_hours < self.restriction_hours {
            return Err(EngineError::Config(
                "evasion_restriction_hours must not be shorter than restriction_hours".to_string(),
            ));
        }
        Ok(())
    }
}

enum Decision {
    Hold,
    RecommendBan { reason: String },
    Act {
        action_type: ActionType,
        reason_code: ReasonCode,
        reason: String,
        effective_until: Option<DateTime<Utc>>,
    },
}

#[derive(Clone)]
pub struct EnforcementEngine {
    db: SqlitePool,
    actions: ActionStore,
    alerts: AlertStore,
    signals: SignalStore,
    audit: AuditStore,
    policy: EnforcementPolicy,
    // Per-user locks so concurrent evaluations of the same user serialize.
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl EnforcementEngine {
    pub fn new(
        db: SqlitePool,
        actions: ActionStore,
        alerts: AlertStore,
        signals: SignalStore,
        policy: EnforcementPolicy,
    ) -> Self {
        Self {
            audit: AuditStore::new(db.clone()),
            db,
            actions,
            alerts,
            signals,
            policy,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> &EnforcementPolicy {
        &self.policy
    }

    /// Evaluate a score outcome against the user's enforcement state.
    /// Returns the newly applied action, or None when the state is held.
    pub async fn evaluate(&self, outcome: &ScoreOutcome) -> EngineResult<Option<EnforcementAction>> {
        let user_id = outcome.score.user_id.clone();
        let lock = self.user_lock(&user_id).await;
        let _guard = lock.lock().await;

        // One retry if an out-of-process writer moved the state between
        // the read and the transaction.
        for _ in 0..2 {
            let active = self.actions.active_action(&user_id).await?;
            match self.decide(outcome, active.as_ref()).await? {
                Decision::Hold => return Ok(None),
                Decision::RecommendBan { reason } => {
                    self.recommend_ban(outcome, &reason).await?;
                    return Ok(None);
                }
                Decision::Act {
                    action_type,
                    reason_code,
                    reason,
                    effective_until,
                } => {
                    let action = actions::build_action(NewAction {
                        user_id: user_id.clone(),
                        action_type,
                        reason: reason.clone(),
                        reason_code,
                        triggering_signal_ids: outcome.triggering_signal_ids.clone(),
                        triggering_tier: outcome.score.tier,
                        triggering_score: outcome.score.score,
                        effective_until,
                        created_by: "system".to_string(),
                    })?;
                    let alert = self.alerts.build(NewAlert {
                        user_id: user_id.clone(),
                        priority: alert_priority(action_type),
                        source: "enforcement".to_string(),
                        category: "enforcement".to_string(),
                        title: format!("Enforcement action: {}", action_type.as_str()),
                        body: reason,
                        risk_signal_ids: outcome.triggering_signal_ids.clone(),
                    })?;

                    let mut tx = self.db.begin().await?;
                    let current = active_id_in_txn(&mut tx, &user_id).await?;
                    if current != active.as_ref().map(|a| a.id.clone()) {
                        tx.rollback().await?;
                        continue;
                    }
                    actions::insert_action(&mut *tx, &action).await?;
                    crate::alerting::insert_alert(&mut *tx, &alert).await?;
                    tx.commit().await?;

                    crate::metrics::record_enforcement_action(action.action_type.as_str());
                    crate::metrics::record_alert_raised(alert.priority.as_str(), &alert.source);
                    // Audit is best-effort bookkeeping; the action stands
                    // even if this write fails.
                    if let Err(e) = self
                        .audit
                        .record(
                            "system",
                            "action.create",
                            "enforcement_action",
                            &action.id,
                            serde_json::json!({
                                "user_id": user_id,
                                "action_type": action.action_type.as_str(),
                                "reason_code": action.reason_code.as_str(),
                                "tier": outcome.score.tier.as_str(),
                                "score": outcome.score.score,
                                "alert_id": alert.id,
                            }),
                        )
                        .await
                    {
                        tracing::warn!(error = %e, "Failed to write enforcement audit record");
                    }
                    tracing::info!(
                        user_id = %user_id,
                        action_type = action.action_type.as_str(),
                        reason_code = action.reason_code.as_str(),
                        tier = outcome.score.tier.as_str(),
                        score = outcome.score.score,
                        "Applied enforcement action"
                    );
                    return Ok(Some(action));
                }
            }
        }

        Err(EngineError::Conflict(
            "Enforcement state changed concurrently".to_string(),
        ))
    }

    async fn decide(
        &self,
        outcome: &ScoreOutcome,
        active: Option<&EnforcementAction>,
    ) -> EngineResult<Decision> {
        let tier = outcome.score.tier;
        let score = outcome.score.score;
        let user_id = &outcome.score.user_id;
        let override_hit = tier == RiskTier::Critical && self.has_override_signal(outcome);

        let Some(active) = active else {
            if tier.rank() < self.policy.min_action_tier.rank() {
                return Ok(Decision::Hold);
            }
            // Purely network-derived risk cites no signals and cannot go
            // past a soft warning.
            if outcome.triggering_signal_ids.is_empty() {
                return Ok(Decision::Act {
                    action_type: ActionType::SoftWarning,
                    reason_code: ReasonCode::FirstOffense,
                    reason: format!(
                        "Network-driven risk reached {} tier (score {:.1})",
                        tier.as_str(),
                        score
                    ),
                    effective_until: None,
                });
            }
            if override_hit {
                return Ok(Decision::Act {
                    action_type: ActionType::AccountSuspension,
                    reason_code: ReasonCode::CriticalOverride,
                    reason: format!(
                        "Critical tier with override evidence (score {:.1})",
                        score
                    ),
                    effective_until: None,
                });
            }
            let reason_code = self.offense_code(user_id).await?;
            return Ok(Decision::Act {
                action_type: ActionType::SoftWarning,
                reason_code,
                reason: format!("Risk tier reached {} (score {:.1})", tier.as_str(), score),
                effective_until: None,
            });
        };

        // Escalate only when the tier strictly exceeds the one that
        // triggered the active action.
        if tier.rank() <= active.triggering_tier.rank() {
            return Ok(Decision::Hold);
        }
        if outcome.triggering_signal_ids.is_empty() {
            return Ok(Decision::Hold);
        }

        if active.action_type == ActionType::AccountSuspension {
            return Ok(Decision::RecommendBan {
                reason: format!(
                    "User is suspended and risk rose to {} tier (score {:.1})",
                    tier.as_str(),
                    score
                ),
            });
        }

        if override_hit && active.action_type.rank() < ActionType::AccountSuspension.rank() {
            return Ok(Decision::Act {
                action_type: ActionType::AccountSuspension,
                reason_code: ReasonCode::CriticalOverride,
                reason: format!(
                    "Critical tier with override evidence (score {:.1}), escalated past {}",
                    score,
                    active.action_type.as_str()
                ),
                effective_until: None,
            });
        }

        match active.action_type.next_step() {
            Some(next) => {
                let evasion = self.shows_evasion(outcome).await?;
                let reason_code = if evasion {
                    ReasonCode::EvasionPattern
                } else {
                    self.offense_code(user_id).await?
                };
                Ok(Decision::Act {
                    action_type: next,
                    reason_code,
                    reason: format!(
                        "Risk tier rose to {} (score {:.1}) above active {}",
                        tier.as_str(),
                        score,
                        active.action_type.as_str()
                    ),
                    effective_until: self.effective_until_for(next, evasion),
                })
            }
            // A manually applied permanent ban leaves nothing to escalate.
            None => Ok(Decision::Hold),
        }
    }

    fn has_override_signal(&self, outcome: &ScoreOutcome) -> bool {
        outcome.contributions.iter().any(|c| {
            outcome.triggering_signal_ids.contains(&c.signal_id)
                && self.policy.critical_override_types.contains(&c.signal_type)
        })
    }

    /// True when any triggering signal carries obfuscation flags.
    async fn shows_evasion(&self, outcome: &ScoreOutcome) -> EngineResult<bool> {
        let signals = self
            .signals
            .fetch_by_ids(&outcome.triggering_signal_ids)
            .await?;
        Ok(signals.iter().any(|s| !s.obfuscation_flags.is_empty()))
    }

    async fn offense_code(&self, user_id: &str) -> EngineResult<ReasonCode> {
        Ok(match self.actions.prior_count(user_id).await? {
            0 => ReasonCode::FirstOffense,
            1 => ReasonCode::RepeatOffense,
            _ => ReasonCode::SustainedEscalation,
        })
    }

    fn effective_until_for(&self, action_type: ActionType, evasion: bool) -> Option<DateTime<Utc>> {
        match action_type {
            ActionType::TemporaryRestriction => {
                let hours = if evasion {
                    self.policy.evasion_restriction_hours
                } else {
                    self.policy.restriction_hours
                };
                Some(Utc::now() + Duration::hours(hours))
            }
            _ => None,
        }
    }

    /// Raise a critical ban-recommendation alert, at most one open at a
    /// time per user.
    async fn recommend_ban(&self, outcome: &ScoreOutcome, reason: &str) -> EngineResult<()> {
        let user_id = &outcome.score.user_id;
        let open = self
            .alerts
            .list(Some(AlertStatus::Open), None, Some(user_id), 50)
            .await?;
        if open.iter().any(|a| a.category == "ban_recommendation") {
            return Ok(());
        }

        self.alerts
            .create(NewAlert {
                user_id: user_id.clone(),
                priority: AlertPriority::Critical,
                source: "enforcement".to_string(),
                category: "ban_recommendation".to_string(),
                title: "Permanent ban recommended".to_string(),
                body: reason.to_string(),
                risk_signal_ids: outcome.triggering_signal_ids.clone(),
            })
            .await?;

        tracing::warn!(user_id = %user_id, "Recommended permanent ban for review");
        Ok(())
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn alert_priority(action_type: ActionType) -> AlertPriority {
    match action_type {
        ActionType::SoftWarning => AlertPriority::Low,
        ActionType::HardWarning => AlertPriority::Medium,
        ActionType::TemporaryRestriction => AlertPriority::High,
        ActionType::AccountSuspension | ActionType::PermanentBan => AlertPriority::Critical,
    }
}

async fn active_id_in_txn(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: &str,
) -> EngineResult<Option<String>> {
    let row = sqlx::query(
        r#"
        SELECT id FROM enforcement_actions
        WHERE user_id = ? AND reversed_at IS NULL
          AND (effective_until IS NULL OR effective_until > ?)
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(Utc::now().to_rfc3339())
    .fetch_optional(&mut **tx)
    .await?;

    row.map(|r| r.try_get("id").map_err(EngineError::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::{create_alert_table, AlertPolicy};
    use crate::audit::create_audit_table;
    use crate::enforcement::actions::create_action_table;
    use crate::scoring::factors::SignalContribution;
    use crate::scoring::{RiskScore, TrendDirection};
    use crate::signals::{create_signal_table, NewSignal};
    use uuid::Uuid;

    async fn test_engine() -> (EnforcementEngine, SqlitePool) {
        let db = SqlitePool::connect(":memory:").await.unwrap();
        create_action_table(&db).await;
        create_alert_table(&db).await;
        create_signal_table(&db).await;
        create_audit_table(&db).await;

        let engine = EnforcementEngine::new(
            db.clone(),
            ActionStore::new(db.clone()),
            AlertStore::new(db.clone(), AlertPolicy::default()),
            SignalStore::new(db.clone()),
            EnforcementPolicy::default(),
        );
        (engine, db)
    }

    fn outcome_with(
        user_id: &str,
        score: f64,
        tier: RiskTier,
        contribs: Vec<(String, SignalType)>,
    ) -> ScoreOutcome {
        let triggering_signal_ids: Vec<String> =
            contribs.iter().map(|(id, _)| id.clone()).collect();
        let contributions = contribs
            .into_iter()
            .map(|(signal_id, signal_type)| SignalContribution {
                signal_id,
                signal_type,
                factor: signal_type.factor(),
                weighted_input: 1.0,
                contribution: 1.0,
            })
            .collect();

        ScoreOutcome {
            score: RiskScore {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                score,
                tier,
                trend: TrendDirection::Rising,
                operational: score,
                behavioral: score,
                network: 0.0,
                signal_count: 1,
                created_at: Utc::now(),
            },
            previous: None,
            delta: score,
            contributions,
            triggering_signal_ids,
            alert_id: None,
        }
    }

    async fn record_signal(db: &SqlitePool, user_id: &str, obfuscated: bool) -> String {
        let store = SignalStore::new(db.clone());
        let signal = store
            .record(NewSignal {
                user_id: user_id.to_string(),
                source_event_id: None,
                signal_type: SignalType::ContactPhone,
                confidence: 0.9,
                evidence: serde_json::json!({}),
                obfuscation_flags: if obfuscated {
                    vec!["spaced_digits".to_string()]
                } else {
                    vec![]
                },
                pattern_flags: vec![],
                detected_at: None,
            })
            .await
            .unwrap();
        signal.id
    }

    #[tokio::test]
    async fn test_low_tier_takes_no_action() {
        let (engine, db) = test_engine().await;
        let sid = record_signal(&db, "u1", false).await;

        let result = engine
            .evaluate(&outcome_with(
                "u1",
                22.0,
                RiskTier::Low,
                vec![(sid, SignalType::ContactPhone)],
            ))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(engine.actions.active_action("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_action_writes_action_and_alert() {
        let (engine, db) = test_engine().await;
        let sid = record_signal(&db, "u1", false).await;

        let action = engine
            .evaluate(&outcome_with(
                "u1",
                45.0,
                RiskTier::Medium,
                vec![(sid.clone(), SignalType::ContactPhone)],
            ))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(action.action_type, ActionType::SoftWarning);
        assert_eq!(action.reason_code, ReasonCode::FirstOffense);
        assert_eq!(action.triggering_signal_ids, vec![sid]);
        assert_eq!(action.created_by, "system");

        let alerts = engine.alerts.list(None, None, Some("u1"), 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, "enforcement");
        assert_eq!(alerts[0].priority, AlertPriority::Low);

        let trail = engine
            .audit
            .for_subject("enforcement_action", &action.id, 10)
            .await
            .unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].actor, "system");
        assert_eq!(trail[0].action, "action.create");
    }

    #[tokio::test]
    async fn test_same_tier_does_not_reescalate() {
        let (engine, db) = test_engine().await;
        let sid = record_signal(&db, "u1", false).await;
        let outcome = outcome_with(
            "u1",
            45.0,
            RiskTier::Medium,
            vec![(sid, SignalType::ContactPhone)],
        );

        assert!(engine.evaluate(&outcome).await.unwrap().is_some());
        // The tier has not risen past the one on record.
        assert!(engine.evaluate(&outcome).await.unwrap().is_none());
        assert_eq!(engine.actions.history("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_one_step_escalation() {
        let (engine, db) = test_engine().await;
        let sid = record_signal(&db, "u1", false).await;

        engine
            .evaluate(&outcome_with(
                "u1",
                45.0,
                RiskTier::Medium,
                vec![(sid.clone(), SignalType::ContactPhone)],
            ))
            .await
            .unwrap();

        let second = engine
            .evaluate(&outcome_with(
                "u1",
                65.0,
                RiskTier::High,
                vec![(sid, SignalType::ContactPhone)],
            ))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(second.action_type, ActionType::HardWarning);
        assert_eq!(second.reason_code, ReasonCode::RepeatOffense);
    }

    #[tokio::test]
    async fn test_restriction_window_and_evasion_extension() {
        let (engine, db) = test_engine().await;
        let clean = record_signal(&db, "u1", false).await;
        let evasive = record_signal(&db, "u2", true).await;

        for user in ["u1", "u2"] {
            let sid = if user == "u1" { clean.clone() } else { evasive.clone() };
            engine
                .evaluate(&outcome_with(
                    user,
                    45.0,
                    RiskTier::Medium,
                    vec![(sid.clone(), SignalType::ContactPhone)],
                ))
                .await
                .unwrap();
            engine
                .evaluate(&outcome_with(
                    user,
                    65.0,
                    RiskTier::High,
                    vec![(sid, SignalType::ContactPhone)],
                ))
                .await
                .unwrap();
        }

        let restrict_clean = engine
            .evaluate(&outcome_with(
                "u1",
                85.0,
                RiskTier::Critical,
                vec![(clean, SignalType::ContactPhone)],
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restrict_clean.action_type, ActionType::TemporaryRestriction);
        let window = restrict_clean.effective_until.unwrap() - Utc::now();
        assert_eq!(window.num_hours(), 23);

        let restrict_evasive = engine
            .evaluate(&outcome_with(
                "u2",
                85.0,
                RiskTier::Critical,
                vec![(evasive, SignalType::ContactPhone)],
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restrict_evasive.reason_code, ReasonCode::EvasionPattern);
        let window = restrict_evasive.effective_until.unwrap() - Utc::now();
        assert_eq!(window.num_hours(), 71);
    }

    #[tokio::test]
    async fn test_critical_override_jumps_to_suspension() {
        let (engine, db) = test_engine().await;
        let store = SignalStore::new(db);
        let payment = store
            .record(NewSignal {
                user_id: "u1".to_string(),
                source_event_id: None,
                signal_type: SignalType::PaymentExternal,
                confidence: 0.95,
                evidence: serde_json::json!({}),
                obfuscation_flags: vec![],
                pattern_flags: vec![],
                detected_at: None,
            })
            .await
            .unwrap();

        let action = engine
            .evaluate(&outcome_with(
                "u1",
                88.0,
                RiskTier::Critical,
                vec![(payment.id, SignalType::PaymentExternal)],
            ))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(action.action_type, ActionType::AccountSuspension);
        assert_eq!(action.reason_code, ReasonCode::CriticalOverride);
    }

    #[tokio::test]
    async fn test_suspended_user_gets_ban_recommendation_not_ban() {
        let (engine, db) = test_engine().await;
        let sid = record_signal(&db, "u1", false).await;

        // Seed an active suspension triggered at high tier.
        engine
            .actions
            .record(NewAction {
                user_id: "u1".to_string(),
                action_type: ActionType::AccountSuspension,
                reason: "escalated".to_string(),
                reason_code: ReasonCode::SustainedEscalation,
                triggering_signal_ids: vec![sid.clone()],
                triggering_tier: RiskTier::High,
                triggering_score: 75.0,
                effective_until: None,
                created_by: "op_lena".to_string(),
            })
            .await
            .unwrap();

        let outcome = outcome_with(
            "u1",
            92.0,
            RiskTier::Critical,
            vec![(sid, SignalType::ContactPhone)],
        );
        let result = engine.evaluate(&outcome).await.unwrap();
        assert!(result.is_none());

        let alerts = engine.alerts.list(None, None, Some("u1"), 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, "ban_recommendation");
        assert_eq!(alerts[0].priority, AlertPriority::Critical);

        // No second recommendation while the first is open.
        engine.evaluate(&outcome).await.unwrap();
        let alerts = engine.alerts.list(None, None, Some("u1"), 10).await.unwrap();
        assert_eq!(alerts.len(), 1);

        // The ladder never applied a ban on its own.
        let history = engine.actions.history("u1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action_type, ActionType::AccountSuspension);
    }

    #[tokio::test]
    async fn test_network_only_risk_capped_at_soft_warning() {
        let (engine, _db) = test_engine().await;

        // High tier but no citable signals.
        let action = engine
            .evaluate(&outcome_with("u1", 65.0, RiskTier::High, vec![]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(action.action_type, ActionType::SoftWarning);
        assert!(action.triggering_signal_ids.is_empty());

        // And it cannot escalate further without evidence.
        let held = engine
            .evaluate(&outcome_with("u1", 90.0, RiskTier::Critical, vec![]))
            .await
            .unwrap();
        assert!(held.is_none());
    }
}
