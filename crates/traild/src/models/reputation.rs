use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::db::Row as PgRow;

/// Outcome categories a reporter can attest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeType {
    Success,
    PartialSuccess,
    Failure,
    UserCorrected,
    Harmful,
}

impl OutcomeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeType::Success => "success",
            OutcomeType::PartialSuccess => "partial_success",
            OutcomeType::Failure => "failure",
            OutcomeType::UserCorrected => "user_corrected",
            OutcomeType::Harmful => "harmful",
        }
    }

    /// Default score impact when the reporter does not override it.
    pub fn default_impact(&self) -> f64 {
        match self {
            OutcomeType::Success => 0.5,
            OutcomeType::PartialSuccess => 0.2,
            OutcomeType::Failure => -0.3,
            OutcomeType::UserCorrected => -0.5,
            OutcomeType::Harmful => -2.0,
        }
    }

    /// Whether the outcome counts toward the success rate (vs the failure
    /// rate).
    pub fn is_favorable(&self) -> bool {
        matches!(self, OutcomeType::Success | OutcomeType::PartialSuccess)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reputation {
    pub agent_id: String,
    pub overall_score: f64,
    pub total_actions: i64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub harmful_actions: i64,
    pub user_corrections: i64,
    /// Domain name -> score in [0, 1]
    pub breakdown: serde_json::Value,
    pub last_updated: DateTime<Utc>,
}

impl Reputation {
    pub fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            agent_id: row.try_get("agent_id")?,
            overall_score: row.try_get("overall_score")?,
            total_actions: row.try_get("total_actions")?,
            success_rate: row.try_get("success_rate")?,
            failure_rate: row.try_get("failure_rate")?,
            harmful_actions: row.try_get("harmful_actions")?,
            user_corrections: row.try_get("user_corrections")?,
            breakdown: row.try_get("breakdown")?,
            last_updated: row.try_get("last_updated")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub id: i64,
    pub agent_id: String,
    pub event_id: i64,
    pub outcome_type: OutcomeType,
    pub reporter: String,
    pub impact_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Outcome {
    pub fn from_row(row: &PgRow) -> Result<Self, crate::error::ApiError> {
        let raw: String = row.try_get::<String, _>("outcome_type")?;
        let outcome_type = serde_json::from_value(serde_json::Value::String(raw)).map_err(|e| {
            crate::error::ApiError::Internal(format!("corrupt stored outcome type: {e}"))
        })?;
        Ok(Self {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            event_id: row.try_get("event_id")?,
            outcome_type,
            reporter: row.try_get("reporter")?,
            impact_score: row.try_get("impact_score")?,
            details: row.try_get("details")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordOutcomeRequest {
    pub agent_id: String,
    pub event_id: i64,
    pub outcome_type: OutcomeType,
    pub reporter: String,
    /// Optional override in [-1, +1]
    pub impact_score: Option<f64>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcomeResponse {
    pub reputation: Reputation,
    pub outcome: Outcome,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DomainScoreRequest {
    pub domain: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DowngradeAssessment {
    pub should_downgrade: bool,
    pub reasons: Vec<String>,
}
