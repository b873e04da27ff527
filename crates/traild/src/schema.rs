//! Database schema for the audit trail
//!
//! Applied as an idempotent batch at boot. The append-only guarantee for
//! `events` lives here, in a trigger, not only in application code: UPDATE
//! raises, and DELETE is reachable only through the agent cascade.

use crate::db::PgPool;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    agent_id    TEXT PRIMARY KEY CHECK (agent_id ~ '^[0-9a-f]{64}$'),
    public_key  TEXT NOT NULL UNIQUE CHECK (public_key ~ '^[0-9a-f]{64}$'),
    name        TEXT,
    owner       TEXT,
    status      TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'revoked')),
    metadata    JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    revoked_at  TIMESTAMPTZ,
    CHECK ((status = 'revoked') = (revoked_at IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS events (
    id              BIGSERIAL PRIMARY KEY,
    agent_id        TEXT NOT NULL REFERENCES agents(agent_id) ON DELETE CASCADE,
    event_type      TEXT NOT NULL CHECK (event_type IN (
        'input_received', 'decision_made', 'tool_call_requested',
        'tool_call_result', 'response_emitted', 'memory_created',
        'memory_updated', 'capability_granted', 'capability_revoked',
        'policy_violation', 'error_occurred', 'system_event')),
    timestamp       TIMESTAMPTZ NOT NULL,
    prev_hash       TEXT CHECK (prev_hash ~ '^[0-9a-f]{64}$'),
    hash            TEXT NOT NULL UNIQUE CHECK (hash ~ '^[0-9a-f]{64}$'),
    payload         JSONB NOT NULL,
    signature       TEXT NOT NULL CHECK (signature ~ '^[0-9a-f]{128}$'),
    correlation_id  UUID
);

CREATE INDEX IF NOT EXISTS idx_events_agent_chain ON events(agent_id, timestamp ASC, id ASC);
CREATE INDEX IF NOT EXISTS idx_events_recency ON events(timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_events_prev_hash ON events(prev_hash);
CREATE INDEX IF NOT EXISTS idx_events_correlation ON events(correlation_id)
    WHERE correlation_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS capabilities (
    id          UUID PRIMARY KEY,
    agent_id    TEXT NOT NULL REFERENCES agents(agent_id) ON DELETE CASCADE,
    scope       JSONB NOT NULL,
    issued_by   TEXT NOT NULL,
    issued_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    expires_at  TIMESTAMPTZ NOT NULL,
    status      TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'expired', 'revoked')),
    token_hash  TEXT NOT NULL UNIQUE CHECK (token_hash ~ '^[0-9a-f]{64}$'),
    revoked_at  TIMESTAMPTZ,
    CHECK (expires_at > issued_at)
);

CREATE INDEX IF NOT EXISTS idx_capabilities_agent ON capabilities(agent_id);

CREATE TABLE IF NOT EXISTS reputation (
    agent_id         TEXT PRIMARY KEY REFERENCES agents(agent_id) ON DELETE CASCADE,
    overall_score    DOUBLE PRECISION NOT NULL DEFAULT 50.0 CHECK (overall_score BETWEEN 0 AND 100),
    total_actions    BIGINT NOT NULL DEFAULT 0 CHECK (total_actions >= 0),
    success_rate     DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (success_rate BETWEEN 0 AND 1),
    failure_rate     DOUBLE PRECISION NOT NULL DEFAULT 0 CHECK (failure_rate BETWEEN 0 AND 1),
    harmful_actions  BIGINT NOT NULL DEFAULT 0 CHECK (harmful_actions >= 0),
    user_corrections BIGINT NOT NULL DEFAULT 0 CHECK (user_corrections >= 0),
    breakdown        JSONB NOT NULL DEFAULT '{}'::jsonb,
    last_updated     TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS outcomes (
    id            BIGSERIAL PRIMARY KEY,
    agent_id      TEXT NOT NULL REFERENCES agents(agent_id) ON DELETE CASCADE,
    event_id      BIGINT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    outcome_type  TEXT NOT NULL CHECK (outcome_type IN (
        'success', 'partial_success', 'failure', 'user_corrected', 'harmful')),
    reporter      TEXT NOT NULL,
    impact_score  DOUBLE PRECISION NOT NULL CHECK (impact_score BETWEEN -2.0 AND 1.0),
    details       TEXT,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_outcomes_agent ON outcomes(agent_id);
"#;

const CREATE_TRIGGERS: &str = r#"
CREATE OR REPLACE FUNCTION events_reject_update() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'events are append-only';
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS events_append_only ON events;
CREATE TRIGGER events_append_only
    BEFORE UPDATE ON events
    FOR EACH ROW EXECUTE FUNCTION events_reject_update();

CREATE OR REPLACE FUNCTION agents_seed_reputation() RETURNS trigger AS $$
BEGIN
    INSERT INTO reputation (agent_id) VALUES (NEW.agent_id)
    ON CONFLICT (agent_id) DO NOTHING;
    RETURN NEW;
END;
$$ LANGUAGE plpgsql;

DROP TRIGGER IF EXISTS agents_reputation_init ON agents;
CREATE TRIGGER agents_reputation_init
    AFTER INSERT ON agents
    FOR EACH ROW EXECUTE FUNCTION agents_seed_reputation();
"#;

/// Apply the schema. Safe to run at every boot.
pub async fn apply(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(CREATE_TABLES).execute(pool).await?;
    sqlx::raw_sql(CREATE_TRIGGERS).execute(pool).await?;
    Ok(())
}
