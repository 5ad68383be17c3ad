use crate::error::{EngineError, EngineResult};
use crate::scoring::RiskTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Enforcement ladder, ordered from least to most severe. Escalation
/// moves one rung at a time; a permanent ban is never applied by the
/// engine itself, only recommended for human review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SoftWarning,
    HardWarning,
    TemporaryRestriction,
    AccountSuspension,
    PermanentBan,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SoftWarning => "soft_warning",
            ActionType::HardWarning => "hard_warning",
            ActionType::TemporaryRestriction => "temporary_restriction",
            ActionType::AccountSuspension => "account_suspension",
            ActionType::PermanentBan => "permanent_ban",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "soft_warning" => Ok(ActionType::SoftWarning),
            "hard_warning" => Ok(ActionType::HardWarning),
            "temporary_restriction" => Ok(ActionType::TemporaryRestriction),
            "account_suspension" => Ok(ActionType::AccountSuspension),
            "permanent_ban" => Ok(ActionType::PermanentBan),
            _ => Err(EngineError::Validation(format!(
                "Invalid action type: {}",
                s
            ))),
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            ActionType::SoftWarning => 0,
            ActionType::HardWarning => 1,
            ActionType::TemporaryRestriction => 2,
            ActionType::AccountSuspension => 3,
            ActionType::PermanentBan => 4,
        }
    }

    /// The next rung the engine may escalate to. Suspension is the top of
    /// the automated ladder.
    pub fn next_step(&self) -> Option<ActionType> {
        match self {
            ActionType::SoftWarning => Some(ActionType::HardWarning),
            ActionType::HardWarning => Some(ActionType::TemporaryRestriction),
            ActionType::TemporaryRestriction => Some(ActionType::AccountSuspension),
            ActionType::AccountSuspension | ActionType::PermanentBan => None,
        }
    }
}

/// Why an action fired. Closed set so downstream tooling can rely on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    FirstOffense,
    RepeatOffense,
    SustainedEscalation,
    EvasionPattern,
    CriticalOverride,
    BanRecommended,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::FirstOffense => "first_offense",
            ReasonCode::RepeatOffense => "repeat_offense",
            ReasonCode::SustainedEscalation => "sustained_escalation",
            ReasonCode::EvasionPattern => "evasion_pattern",
            ReasonCode::CriticalOverride => "critical_override",
            ReasonCode::BanRecommended => "ban_recommended",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "first_offense" => Ok(ReasonCode::FirstOffense),
            "repeat_offense" => Ok(ReasonCode::RepeatOffense),
            "sustained_escalation" => Ok(ReasonCode::SustainedEscalation),
            "evasion_pattern" => Ok(ReasonCode::EvasionPattern),
            "critical_override" => Ok(ReasonCode::CriticalOverride),
            "ban_recommended" => Ok(ReasonCode::BanRecommended),
            _ => Err(EngineError::Validation(format!(
                "Invalid reason code: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnforcementAction {
    pub id: String,
    pub user_id: String,
    pub action_type: ActionType,
    pub reason: String,
    pub reason_code: ReasonCode,
    pub triggering_signal_ids: Vec<String>,
    pub triggering_tier: RiskTier,
    pub triggering_score: f64,
    pub effective_until: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<String>,
    pub reversal_reason: Option<String>,
}

impl EnforcementAction {
    /// Active means not reversed and not past its effective window.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.reversed_at.is_none()
            && self.effective_until.map(|until| until > now).unwrap_or(true)
    }
}

/// Fields supplied when recording an action.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAction {
    pub user_id: String,
    pub action_type: ActionType,
    pub reason: String,
    pub reason_code: ReasonCode,
    #[serde(default)]
    pub triggering_signal_ids: Vec<String>,
    pub triggering_tier: RiskTier,
    pub triggering_score: f64,
    pub effective_until: Option<DateTime<Utc>>,
    pub created_by: String,
}

#[derive(Clone)]
pub struct ActionStore {
    db: SqlitePool,
}

impl ActionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record an action. A permanent ban with a system author is a caller
    /// bug: the engine only ever recommends bans.
    pub async fn record(&self, new: NewAction) -> EngineResult<EnforcementAction> {
        let action = build_action(new)?;
        insert_action(&self.db, &action).await?;
        Ok(action)
    }

    pub async fn get(&self, id: &str) -> EngineResult<EnforcementAction> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, action_type, reason, reason_code,
                   triggering_signal_ids, triggering_tier, triggering_score,
                   effective_until, created_by, created_at, reversed_at,
                   reversed_by, reversal_reason
            FROM enforcement_actions WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| EngineError::NotFound("Enforcement action not found".to_string()))?;

        parse_action(&row)
    }

    /// The user's current enforcement state: the most recent action that
    /// is neither reversed nor expired.
    pub async fn active_action(&self, user_id: &str) -> EngineResult<Option<EnforcementAction>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, action_type, reason, reason_code,
                   triggering_signal_ids, triggering_tier, triggering_score,
                   effective_until, created_by, created_at, reversed_at,
                   reversed_by, reversal_reason
            FROM enforcement_actions
            WHERE user_id = ? AND reversed_at IS NULL
              AND (effective_until IS NULL OR effective_until > ?)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.db)
        .await?;

        row.map(|r| parse_action(&r)).transpose()
    }

    pub async fn history(&self, user_id: &str, limit: i64) -> EngineResult<Vec<EnforcementAction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, action_type, reason, reason_code,
                   triggering_signal_ids, triggering_tier, triggering_score,
                   effective_until, created_by, created_at, reversed_at,
                   reversed_by, reversal_reason
            FROM enforcement_actions
            WHERE user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        let mut actions = Vec::with_capacity(rows.len());
        for row in rows {
            actions.push(parse_action(&row)?);
        }
        Ok(actions)
    }

    /// Count of non-reversed actions ever taken against the user, used to
    /// pick between first-offense and repeat-offense reason codes.
    pub async fn prior_count(&self, user_id: &str) -> EngineResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM enforcement_actions WHERE user_id = ? AND reversed_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Reverse an action. The reversed guard in the WHERE clause makes
    /// double reversal impossible even under concurrent calls.
    pub async fn reverse(
        &self,
        id: &str,
        actor: &str,
        reason: &str,
    ) -> EngineResult<EnforcementAction> {
        let result = reverse_action(&self.db, id, actor, reason, Utc::now()).await?;
        if result == 0 {
            // Distinguish a missing action from one already reversed.
            return match self.get(id).await {
                Ok(_) => Err(EngineError::Conflict(
                    "Action is already reversed".to_string(),
                )),
                Err(e) => Err(e),
            };
        }
        self.get(id).await
    }
}

pub(crate) fn build_action(new: NewAction) -> EngineResult<EnforcementAction> {
    if new.user_id.is_empty() {
        return Err(EngineError::Validation("user_id is required".to_string()));
    }
    if new.reason.is_empty() {
        return Err(EngineError::Validation("reason is required".to_string()));
    }
    if new.action_type == ActionType::PermanentBan && new.created_by == "system" {
        return Err(EngineError::PolicyViolation(
            "permanent_ban cannot be applied automatically".to_string(),
        ));
    }

    let now = Utc::now();
    Ok(EnforcementAction {
        id: Uuid::new_v4().to_string(),
        user_id: new.user_id,
        action_type: new.action_type,
        reason: new.reason,
        reason_code: new.reason_code,
        triggering_signal_ids: new.triggering_signal_ids,
        triggering_tier: new.triggering_tier,
        triggering_score: new.triggering_score,
        effective_until: new.effective_until,
        created_by: new.created_by,
        created_at: now,
        reversed_at: None,
        reversed_by: None,
        reversal_reason: None,
    })
}

pub(crate) async fn insert_action<'a>(
    executor: impl sqlx::SqliteExecutor<'a>,
    action: &EnforcementAction,
) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO enforcement_actions
        (id, user_id, action_type, reason, reason_code, triggering_signal_ids,
         triggering_tier, triggering_score, effective_until, created_by,
         created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&action.id)
    .bind(&action.user_id)
    .bind(action.action_type.as_str())
    .bind(&action.reason)
    .bind(action.reason_code.as_str())
    .bind(serde_json::to_string(&action.triggering_signal_ids)?)
    .bind(action.triggering_tier.as_str())
    .bind(action.triggering_score)
    .bind(action.effective_until.map(|t| t.to_rfc3339()))
    .bind(&action.created_by)
    .bind(action.created_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

/// Guarded reversal, usable inside a transaction. Returns rows affected;
/// 0 means the action was missing or already reversed.
pub(crate) async fn reverse_action<'a>(
    executor: impl sqlx::SqliteExecutor<'a>,
    id: &str,
    actor: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> EngineResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE enforcement_actions
        SET reversed_at = ?, reversed_by = ?, reversal_reason = ?
        WHERE id = ? AND reversed_at IS NULL
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(actor)
    .bind(reason)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub(crate) fn parse_action(row: &sqlx::sqlite::SqliteRow) -> EngineResult<EnforcementAction> {
    let action_type_str: String = row.try_get("action_type")?;
    let reason_code_str: String = row.try_get("reason_code")?;
    let tier_str: String = row.try_get("triggering_tier")?;

    let signal_ids_str: String = row.try_get("triggering_signal_ids")?;
    let triggering_signal_ids: Vec<String> =
        serde_json::from_str(&signal_ids_str).unwrap_or_default();

    let parse_opt_ts = |value: Option<String>| -> EngineResult<Option<DateTime<Utc>>> {
        match value {
            Some(s) => Ok(Some(
                DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
                    .with_timezone(&Utc),
            )),
            None => Ok(None),
        }
    };

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(EnforcementAction {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        action_type: ActionType::from_str(&action_type_str)?,
        reason: row.try_get("reason")?,
        reason_code: ReasonCode::from_str(&reason_code_str)?,
        triggering_signal_ids,
        triggering_tier: RiskTier::from_str(&tier_str)?,
        triggering_score: row.try_get("triggering_score")?,
        effective_until: parse_opt_ts(row.try_get("effective_until")?)?,
        created_by: row.try_get("created_by")?,
        created_at,
        reversed_at: parse_opt_ts(row.try_get("reversed_at")?)?,
        reversed_by: row.try_get("reversed_by")?,
        reversal_reason: row.try_get("reversal_reason")?,
    })
}

#[cfg(test)]
pub(crate) async fn create_action_table(db: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE enforcement_actions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            action_type TEXT NOT NULL,
            reason TEXT NOT NULL,
            reason_code TEXT NOT NULL,
            triggering_signal_ids TEXT NOT NULL DEFAULT '[]',
            triggering_tier TEXT NOT NULL,
            triggering_score REAL NOT NULL DEFAULT 0,
            effective_until TEXT,
            created_by TEXT NOT NULL DEFAULT 'system',
            created_at TEXT NOT NULL,
            reversed_at TEXT,
            reversed_by TEXT,
            reversal_reason TEXT
        )
        "#,
    )
    .execute(db)
    .await
    .unwrap();
}
