/// Risk signal storage
///
/// A RiskSignal is one unit of evidence produced by the upstream event
/// classifiers (message scanning, transaction monitoring). Signals are
/// immutable once recorded and are never deleted; scoring reads them
/// through a trailing time window and lets old evidence fade via decay.
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Closed set of signal types emitted by the upstream classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    ContactPhone,
    ContactEmail,
    ContactSocial,
    ContactMessagingApp,
    OffPlatformIntent,
    GroomingLanguage,
    PaymentExternal,
    TxRedirectAttempt,
    TxFailureCorrelated,
    TxTimingAlignment,
}

/// Which scoring factor a signal type feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FactorKind {
    Operational,
    Behavioral,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::ContactPhone => "contact_phone",
            SignalType::ContactEmail => "contact_email",
            SignalType::ContactSocial => "contact_social",
            SignalType::ContactMessagingApp => "contact_messaging_app",
            SignalType::OffPlatformIntent => "off_platform_intent",
            SignalType::GroomingLanguage => "grooming_language",
            SignalType::PaymentExternal => "payment_external",
            SignalType::TxRedirectAttempt => "tx_redirect_attempt",
            SignalType::TxFailureCorrelated => "tx_failure_correlated",
            SignalType::TxTimingAlignment => "tx_timing_alignment",
        }
    }

    pub fn from_str(s: &str) -> EngineResult<Self> {
        match s.to_lowercase().as_str() {
            "contact_phone" => Ok(SignalType::ContactPhone),
            "contact_email" => Ok(SignalType::ContactEmail),
            "contact_social" => Ok(SignalType::ContactSocial),
            "contact_messaging_app" => Ok(SignalType::ContactMessagingApp),
            "off_platform_intent" => Ok(SignalType::OffPlatformIntent),
            "grooming_language" => Ok(SignalType::GroomingLanguage),
            "payment_external" => Ok(SignalType::PaymentExternal),
            "tx_redirect_attempt" => Ok(SignalType::TxRedirectAttempt),
            "tx_failure_correlated" => Ok(SignalType::TxFailureCorrelated),
            "tx_timing_alignment" => Ok(SignalType::TxTimingAlignment),
            _ => Err(EngineError::Validation(format!("Invalid signal type: {}", s))),
        }
    }

    /// Communication-pattern signals feed the behavioral factor,
    /// transaction-derived signals the operational factor.
    pub fn factor(&self) -> FactorKind {
        match self {
            SignalType::ContactPhone
            | SignalType::ContactEmail
            | SignalType::ContactSocial
            | SignalType::ContactMessagingApp
            | SignalType::OffPlatformIntent
            | SignalType::GroomingLanguage => FactorKind::Behavioral,
            SignalType::PaymentExternal
            | SignalType::TxRedirectAttempt
            | SignalType::TxFailureCorrelated
            | SignalType::TxTimingAlignment => FactorKind::Operational,
        }
    }

    /// Per-type base weight. The table is part of the type so adding a
    /// variant without a weight fails to compile.
    pub fn base_weight(&self) -> f64 {
        match self {
            SignalType::ContactPhone => 0.60,
            SignalType::ContactEmail => 0.60,
            SignalType::ContactSocial => 0.50,
            SignalType::ContactMessagingApp => 0.65,
            SignalType::OffPlatformIntent => 0.70,
            SignalType::GroomingLanguage => 0.90,
            SignalType::PaymentExternal => 0.90,
            SignalType::TxRedirectAttempt => 0.85,
            SignalType::TxFailureCorrelated => 0.60,
            SignalType::TxTimingAlignment => 0.50,
        }
    }
}

/// One unit of evidence for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignal {
    pub id: String,
    pub user_id: String,
    pub source_event_id: Option<String>,
    pub signal_type: SignalType,
    pub confidence: f64,
    pub evidence: serde_json::Value,
    pub obfuscation_flags: Vec<String>,
    pub pattern_flags: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when recording a new signal.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSignal {
    pub user_id: String,
    pub source_event_id: Option<String>,
    pub signal_type: SignalType,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: serde_json::Value,
    #[serde(default)]
    pub obfuscation_flags: Vec<String>,
    #[serde(default)]
    pub pattern_flags: Vec<String>,
    pub detected_at: Option<DateTime<Utc>>,
}

/// Signal store
#[derive(Clone)]
pub struct SignalStore {
    db: SqlitePool,
}

impl SignalStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Record a new signal. Signals are append-only.
    pub async fn record(&self, new: NewSignal) -> EngineResult<RiskSignal> {
        if new.user_id.trim().is_empty() {
            return Err(EngineError::Validation("user_id cannot be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&new.confidence) {
            return Err(EngineError::Validation(format!(
                "confidence must be within [0,1], got {}",
                new.confidence
            )));
        }

        let now = Utc::now();
        let detected_at = new.detected_at.unwrap_or(now);
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO risk_signals
            (id, user_id, source_event_id, signal_type, confidence, evidence,
             obfuscation_flags, pattern_flags, detected_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.user_id)
        .bind(&new.source_event_id)
        .bind(new.signal_type.as_str())
        .bind(new.confidence)
        .bind(new.evidence.to_string())
        .bind(serde_json::to_string(&new.obfuscation_flags)?)
        .bind(serde_json::to_string(&new.pattern_flags)?)
        .bind(detected_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.db)
        .await?;

        crate::metrics::record_signal_ingested(new.signal_type.as_str());

        Ok(RiskSignal {
            id,
            user_id: new.user_id,
            source_event_id: new.source_event_id,
            signal_type: new.signal_type,
            confidence: new.confidence,
            evidence: new.evidence,
            obfuscation_flags: new.obfuscation_flags,
            pattern_flags: new.pattern_flags,
            detected_at,
            created_at: now,
        })
    }

    /// Fetch all signals for a user detected within the trailing window.
    ///
    /// A malformed stored row (bad flags JSON, out-of-range confidence) is
    /// skipped with a warning rather than failing the whole read; one bad
    /// signal must never abort a score computation.
    pub async fn for_user_within(&self, user_id: &str, days: i64) -> EngineResult<Vec<RiskSignal>> {
        let since = Utc::now() - Duration::days(days);

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, source_event_id, signal_type, confidence, evidence,
                   obfuscation_flags, pattern_flags, detected_at, created_at
            FROM risk_signals
            WHERE user_id = ? AND detected_at >= ?
            ORDER BY detected_at DESC
            "#,
        )
        .bind(user_id)
        .bind(since.to_rfc3339())
        .fetch_all(&self.db)
        .await?;

        let mut signals = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_signal(&row) {
                Ok(signal) => signals.push(signal),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    tracing::warn!(signal_id = %id, error = %e, "skipping malformed risk signal");
                }
            }
        }

        Ok(signals)
    }

    /// Fetch specific signals by id (for enforcement citation display).
    pub async fn fetch_by_ids(&self, ids: &[String]) -> EngineResult<Vec<RiskSignal>> {
        let mut signals = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                r#"
                SELECT id, user_id, source_event_id, signal_type, confidence, evidence,
                       obfuscation_flags, pattern_flags, detected_at, created_at
                FROM risk_signals
                WHERE id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

            if let Some(row) = row {
                match parse_signal(&row) {
                    Ok(signal) => signals.push(signal),
                    Err(e) => {
                        tracing::warn!(signal_id = %id, error = %e, "skipping malformed risk signal")
                    }
                }
            }
        }
        Ok(signals)
    }

    /// Distinct user ids that have at least one signal on record.
    pub async fn distinct_user_ids(&self) -> EngineResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT user_id FROM risk_signals ORDER BY user_id")
            .fetch_all(&self.db)
            .await?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("user_id")?);
        }
        Ok(ids)
    }
}

/// Parse a database row into a RiskSignal.
fn parse_signal(row: &sqlx::sqlite::SqliteRow) -> EngineResult<RiskSignal> {
    let signal_type_str: String = row.try_get("signal_type")?;
    let signal_type = SignalType::from_str(&signal_type_str)?;

    let confidence: f64 = row.try_get("confidence")?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(EngineError::Validation(format!(
            "stored confidence out of range: {}",
            confidence
        )));
    }

    let evidence_str: String = row.try_get("evidence")?;
    let evidence: serde_json::Value = serde_json::from_str(&evidence_str)
        .map_err(|e| EngineError::Validation(format!("invalid evidence JSON: {}", e)))?;

    let obfuscation_str: String = row.try_get("obfuscation_flags")?;
    let obfuscation_flags: Vec<String> = serde_json::from_str(&obfuscation_str)
        .map_err(|e| EngineError::Validation(format!("invalid obfuscation flags: {}", e)))?;

    let pattern_str: String = row.try_get("pattern_flags")?;
    let pattern_flags: Vec<String> = serde_json::from_str(&pattern_str)
        .map_err(|e| EngineError::Validation(format!("invalid pattern flags: {}", e)))?;

    let detected_at_str: String = row.try_get("detected_at")?;
    let detected_at = DateTime::parse_from_rfc3339(&detected_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| EngineError::Internal(format!("Invalid timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(RiskSignal {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        source_event_id: row.try_get("source_event_id")?,
        signal_type,
        confidence,
        evidence,
        obfuscation_flags,
        pattern_flags,
        detected_at,
        created_at,
    })
}

#[cfg(test)]
pub(crate) async fn create_signal_table(db: &SqlitePool) {
    sqlx::query(
        r#"
        CREATE TABLE risk_signals (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            source_event_id TEXT,
            signal_type TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0,
            evidence TEXT NOT NULL DEFAULT '{}',
            obfuscation_flags TEXT NOT NULL DEFAULT '[]',
            pattern_flags TEXT NOT NULL DEFAULT '[]',
            detected_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(db)
    .await
    .unwrap();
}
