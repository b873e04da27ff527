//! Reputation engine: outcome-driven aggregate scoring

use chrono::Utc;

use crate::db::PgPool;
use crate::error::ApiError;
use crate::models::reputation::{
    DowngradeAssessment, Outcome, OutcomeType, RecordOutcomeRequest, Reputation,
};

const SCORE_FLOOR: f64 = 0.0;
const SCORE_CEILING: f64 = 100.0;

const DOWNGRADE_SCORE_THRESHOLD: f64 = 20.0;
const DOWNGRADE_FAILURE_RATE_THRESHOLD: f64 = 0.5;
const DOWNGRADE_HARMFUL_THRESHOLD: i64 = 5;

#[derive(Clone)]
pub struct ReputationService {
    db: PgPool,
}

impl ReputationService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<Reputation>, ApiError> {
        let row = sqlx::query("SELECT * FROM reputation WHERE agent_id = $1")
            .bind(agent_id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref()
            .map(Reputation::from_row)
            .transpose()
            .map_err(Into::into)
    }

    pub async fn list(&self) -> Result<Vec<Reputation>, ApiError> {
        let rows = sqlx::query("SELECT * FROM reputation ORDER BY agent_id ASC")
            .fetch_all(&self.db)
            .await?;
        rows.iter()
            .map(Reputation::from_row)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    /// Apply one outcome report: adjust the aggregate row and append the
    /// outcome record, atomically, with the reputation row locked.
    pub async fn record_outcome(
        &self,
        req: RecordOutcomeRequest,
    ) -> Result<(Reputation, Outcome), ApiError> {
        if let Some(impact) = req.impact_score {
            if !(-1.0..=1.0).contains(&impact) {
                return Err(ApiError::Validation(
                    "impactScore override must be within [-1, 1]".to_string(),
                ));
            }
        }

        let mut tx = self.db.begin().await?;

        let rep_row = sqlx::query("SELECT * FROM reputation WHERE agent_id = $1 FOR UPDATE")
            .bind(&req.agent_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("no reputation for agent: {}", req.agent_id)))?;
        let mut reputation = Reputation::from_row(&rep_row)?;

        let event_agent: Option<String> =
            sqlx::query_scalar("SELECT agent_id FROM events WHERE id = $1")
                .bind(req.event_id)
                .fetch_optional(&mut *tx)
                .await?;
        match event_agent {
            None => {
                return Err(ApiError::NotFound(format!("no such event: {}", req.event_id)));
            }
            Some(owner) if owner != req.agent_id => {
                return Err(ApiError::Validation(
                    "event does not belong to the agent".to_string(),
                ));
            }
            Some(_) => {}
        }

        let impact = apply_outcome(&mut reputation, req.outcome_type, req.impact_score);
        reputation.last_updated = Utc::now();

        let rep_row = sqlx::query(
            r#"UPDATE reputation
               SET overall_score = $2, total_actions = $3,
                   success_rate = $4, failure_rate = $5,
                   harmful_actions = $6, user_corrections = $7,
                   last_updated = now()
               WHERE agent_id = $1
               RETURNING *"#,
        )
        .bind(&req.agent_id)
        .bind(reputation.overall_score)
        .bind(reputation.total_actions)
        .bind(reputation.success_rate)
        .bind(reputation.failure_rate)
        .bind(reputation.harmful_actions)
        .bind(reputation.user_corrections)
        .fetch_one(&mut *tx)
        .await?;

        let outcome_row = sqlx::query(
            r#"INSERT INTO outcomes (agent_id, event_id, outcome_type, reporter, impact_score, details)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING *"#,
        )
        .bind(&req.agent_id)
        .bind(req.event_id)
        .bind(req.outcome_type.as_str())
        .bind(&req.reporter)
        .bind(impact)
        .bind(&req.details)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let reputation = Reputation::from_row(&rep_row)?;
        let outcome = Outcome::from_row(&outcome_row)?;
        tracing::info!(
            agent_id = %outcome.agent_id,
            event_id = outcome.event_id,
            outcome = outcome.outcome_type.as_str(),
            score = reputation.overall_score,
            "outcome recorded"
        );
        Ok((reputation, outcome))
    }

    /// Replace one domain entry in the breakdown map.
    pub async fn update_domain_score(
        &self,
        agent_id: &str,
        domain: &str,
        score: f64,
    ) -> Result<Reputation, ApiError> {
        if !(0.0..=1.0).contains(&score) {
            return Err(ApiError::Validation(
                "domain score must be within [0, 1]".to_string(),
            ));
        }
        if domain.trim().is_empty() {
            return Err(ApiError::Validation("domain must not be empty".to_string()));
        }

        let row = sqlx::query(
            r#"UPDATE reputation
               SET breakdown = jsonb_set(breakdown, ARRAY[$2], to_jsonb($3::float8), true),
                   last_updated = now()
               WHERE agent_id = $1
               RETURNING *"#,
        )
        .bind(agent_id)
        .bind(domain)
        .bind(score)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no reputation for agent: {agent_id}")))?;

        Reputation::from_row(&row).map_err(Into::into)
    }

    pub async fn should_downgrade(&self, agent_id: &str) -> Result<DowngradeAssessment, ApiError> {
        let reputation = self
            .get(agent_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("no reputation for agent: {agent_id}")))?;
        Ok(assess_downgrade(&reputation))
    }
}

/// The update rule. Returns the effective impact actually applied.
///
/// Success/failure counts are not stored; they are reconstructed from the
/// rates (`round(rate * N)`), bumped, and folded back in over `N + 1`.
pub fn apply_outcome(
    reputation: &mut Reputation,
    outcome: OutcomeType,
    impact_override: Option<f64>,
) -> f64 {
    let impact = impact_override.unwrap_or_else(|| outcome.default_impact());

    reputation.overall_score =
        (reputation.overall_score + impact).clamp(SCORE_FLOOR, SCORE_CEILING);

    let n = reputation.total_actions;
    let mut successes = (reputation.success_rate * n as f64).round() as i64;
    let mut failures = (reputation.failure_rate * n as f64).round() as i64;
    if outcome.is_favorable() {
        successes += 1;
    } else {
        failures += 1;
    }

    let total = n + 1;
    reputation.total_actions = total;
    reputation.success_rate = successes as f64 / total as f64;
    reputation.failure_rate = failures as f64 / total as f64;

    if outcome == OutcomeType::Harmful {
        reputation.harmful_actions += 1;
    }
    if outcome == OutcomeType::UserCorrected {
        reputation.user_corrections += 1;
    }

    impact
}

pub fn assess_downgrade(reputation: &Reputation) -> DowngradeAssessment {
    let mut reasons = Vec::new();

    if reputation.overall_score < DOWNGRADE_SCORE_THRESHOLD {
        reasons.push(format!(
            "Overall score too low: {}",
            reputation.overall_score
        ));
    }
    if reputation.failure_rate > DOWNGRADE_FAILURE_RATE_THRESHOLD {
        reasons.push(format!("Failure rate too high: {}", reputation.failure_rate));
    }
    if reputation.harmful_actions >= DOWNGRADE_HARMFUL_THRESHOLD {
        reasons.push(format!(
            "Too many harmful actions: {}",
            reputation.harmful_actions
        ));
    }

    DowngradeAssessment {
        should_downgrade: !reasons.is_empty(),
        reasons,
    }
}
