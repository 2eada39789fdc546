//! Postgres-backed [`TaskStore`] (spec §3 "Task Store External Contract").
//!
//! Schema mirrors the abstract tables the spec names directly: `tasks`,
//! `task_events`, with the unique `(tenant_id, idempotency_key)` index
//! enforcing invariant 4 at the database layer, not just in application code.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as Json;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use super::model::{AssignmentRecord, NewTask, RequiredCapability, Task, TaskStatus};
use super::store::{SubmitOutcome, TaskEvent, TaskStore};
use crate::error::{CoreError, CoreResult};

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id uuid PRIMARY KEY,
                tenant_id text NOT NULL,
                requester_id text NOT NULL,
                session_id text,
                task_type text NOT NULL,
                priority smallint NOT NULL,
                payload jsonb NOT NULL,
                deadline timestamptz,
                required_capabilities jsonb NOT NULL,
                cost_budget_usd double precision NOT NULL,
                idempotency_key text,
                status text NOT NULL,
                status_detail jsonb NOT NULL,
                agent_id text,
                attempt integer NOT NULL DEFAULT 0,
                assigned_at timestamptz,
                lease_expires_at timestamptz,
                result jsonb,
                observed_cost_usd double precision NOT NULL DEFAULT 0,
                created_at timestamptz NOT NULL,
                updated_at timestamptz NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS tasks_tenant_idempotency_key
            ON tasks (tenant_id, idempotency_key)
            WHERE idempotency_key IS NOT NULL;
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_events (
                id bigserial PRIMARY KEY,
                task_id uuid NOT NULL,
                ts timestamptz NOT NULL,
                from_status text NOT NULL,
                to_status text NOT NULL,
                detail text NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_event(
        &self,
        task_id: Uuid,
        from: &TaskStatus,
        to: &TaskStatus,
        detail: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        sqlx::query(
            "INSERT INTO task_events (task_id, ts, from_status, to_status, detail) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(task_id)
        .bind(now)
        .bind(from.label())
        .bind(to.label())
        .bind(detail)
        .execute(&self.pool)
        .await
        .map_err(|err| CoreError::Retryable(err.to_string()))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: Uuid,
    tenant_id: String,
    requester_id: String,
    session_id: Option<String>,
    task_type: String,
    priority: i16,
    payload: Json,
    deadline: Option<DateTime<Utc>>,
    required_capabilities: Json,
    cost_budget_usd: f64,
    idempotency_key: Option<String>,
    status: String,
    status_detail: Json,
    agent_id: Option<String>,
    attempt: i32,
    assigned_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    result: Option<Json>,
    observed_cost_usd: f64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn status_to_row_parts(status: &TaskStatus) -> (String, Json) {
    let detail = serde_json::to_value(status).unwrap_or(Json::Null);
    (status.label().to_string(), detail)
}

fn row_to_status(row: &TaskRow) -> CoreResult<TaskStatus> {
    serde_json::from_value(row.status_detail.clone())
        .map_err(|err| CoreError::Fatal(format!("corrupt status_detail for {}: {err}", row.task_id)))
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> CoreResult<Task> {
        let status = row_to_status(&row)?;
        let required_capabilities: Vec<RequiredCapability> =
            serde_json::from_value(row.required_capabilities)
                .map_err(|err| CoreError::Fatal(format!("corrupt required_capabilities: {err}")))?;

        Ok(Task {
            task_id: row.task_id,
            tenant_id: row.tenant_id,
            requester_id: row.requester_id,
            session_id: row.session_id,
            task_type: row.task_type,
            priority: row.priority as u8,
            payload: row.payload,
            deadline: row.deadline,
            required_capabilities,
            cost_budget_usd: row.cost_budget_usd,
            idempotency_key: row.idempotency_key,
            status,
            assignment: AssignmentRecord {
                agent_id: row.agent_id,
                attempt: row.attempt.max(0) as u32,
                assigned_at: row.assigned_at,
                lease_expires_at: row.lease_expires_at,
            },
            result: row.result,
            observed_cost_usd: row.observed_cost_usd,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn submit(&self, params: NewTask, idempotency_ttl: ChronoDuration) -> CoreResult<SubmitOutcome> {
        let now = Utc::now();

        if let Some(key) = &params.idempotency_key {
            let existing = sqlx::query_as::<_, TaskRow>(
                "SELECT * FROM tasks WHERE tenant_id = $1 AND idempotency_key = $2",
            )
            .bind(&params.tenant_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| CoreError::Retryable(err.to_string()))?;

            if let Some(row) = existing {
                let task = Task::try_from(row)?;
                let is_terminal = task.status.is_terminal();
                let within_ttl = now - task.created_at < idempotency_ttl;
                if !is_terminal || within_ttl {
                    return Ok(SubmitOutcome { task, is_new: false });
                }
            }
        }

        let task = Task::new(params, now);
        let (status_label, status_detail) = status_to_row_parts(&task.status);
        let required_capabilities = serde_json::to_value(&task.required_capabilities)
            .map_err(|err| CoreError::Fatal(err.to_string()))?;

        let insert = sqlx::query(
            r#"
            INSERT INTO tasks (
                task_id, tenant_id, requester_id, session_id, task_type, priority, payload, deadline,
                required_capabilities, cost_budget_usd, idempotency_key, status, status_detail,
                attempt, observed_cost_usd, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            "#,
        )
        .bind(task.task_id)
        .bind(&task.tenant_id)
        .bind(&task.requester_id)
        .bind(&task.session_id)
        .bind(&task.task_type)
        .bind(task.priority as i16)
        .bind(&task.payload)
        .bind(task.deadline)
        .bind(required_capabilities)
        .bind(task.cost_budget_usd)
        .bind(&task.idempotency_key)
        .bind(&status_label)
        .bind(&status_detail)
        .bind(task.assignment.attempt as i32)
        .bind(task.observed_cost_usd)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => {
                self.append_event(task.task_id, &TaskStatus::Pending, &task.status, "submitted", now)
                    .await?;
                Ok(SubmitOutcome { task, is_new: true })
            }
            // Unique violation: a concurrent submission won the idempotency race.
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                let row = sqlx::query_as::<_, TaskRow>(
                    "SELECT * FROM tasks WHERE tenant_id = $1 AND idempotency_key = $2",
                )
                .bind(&task.tenant_id)
                .bind(&task.idempotency_key)
                .fetch_one(&self.pool)
                .await
                .map_err(|err| CoreError::Retryable(err.to_string()))?;
                Ok(SubmitOutcome { task: Task::try_from(row)?, is_new: false })
            }
            Err(err) => Err(CoreError::Retryable(err.to_string())),
        }
    }

    async fn get(&self, tenant_id: &str, task_id: Uuid) -> CoreResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE tenant_id = $1 AND task_id = $2",
        )
        .bind(tenant_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| CoreError::Retryable(err.to_string()))?
        .ok_or_else(|| CoreError::InvalidParams {
            field: "task_id".into(),
            reason: "unknown task".into(),
        })?;
        Task::try_from(row)
    }

    async fn get_any(&self, task_id: Uuid) -> CoreResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| CoreError::Retryable(err.to_string()))?
            .ok_or_else(|| CoreError::InvalidParams {
                field: "task_id".into(),
                reason: "unknown task".into(),
            })?;
        Task::try_from(row)
    }

    async fn transition(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        next: TaskStatus,
        detail: &str,
    ) -> CoreResult<Task> {
        let now = Utc::now();
        let current = self.get(tenant_id, task_id).await?;
        if !current.status.can_transition_to(&next) {
            return Err(CoreError::ConflictState(format!(
                "{} -> {}",
                current.status.label(),
                next.label()
            )));
        }
        let (status_label, status_detail) = status_to_row_parts(&next);
        let attempt = if matches!(next, TaskStatus::Failed { retryable: true, .. }) {
            current.assignment.attempt as i32 + 1
        } else {
            current.assignment.attempt as i32
        };

        sqlx::query(
            "UPDATE tasks SET status = $1, status_detail = $2, attempt = $3, updated_at = $4 WHERE task_id = $5 AND tenant_id = $6",
        )
        .bind(&status_label)
        .bind(&status_detail)
        .bind(attempt)
        .bind(now)
        .bind(task_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|err| CoreError::Retryable(err.to_string()))?;

        self.append_event(task_id, &current.status, &next, detail, now).await?;
        self.get(tenant_id, task_id).await
    }

    async fn record_assignment(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        agent_id: String,
        lease_expires_at: DateTime<Utc>,
    ) -> CoreResult<Task> {
        let now = Utc::now();
        let current = self.get(tenant_id, task_id).await?;
        if !current.status.can_transition_to(&TaskStatus::Assigned) {
            return Err(CoreError::ConflictState(format!(
                "{} -> assigned",
                current.status.label()
            )));
        }
        let (status_label, status_detail) = status_to_row_parts(&TaskStatus::Assigned);

        sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1, status_detail = $2, agent_id = $3, assigned_at = $4,
                lease_expires_at = $5, updated_at = $6
            WHERE task_id = $7 AND tenant_id = $8
            "#,
        )
        .bind(&status_label)
        .bind(&status_detail)
        .bind(&agent_id)
        .bind(now)
        .bind(lease_expires_at)
        .bind(now)
        .bind(task_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|err| CoreError::Retryable(err.to_string()))?;

        self.append_event(
            task_id,
            &current.status,
            &TaskStatus::Assigned,
            &format!("assigned to {agent_id}"),
            now,
        )
        .await?;
        self.get(tenant_id, task_id).await
    }

    async fn record_result(
        &self,
        tenant_id: &str,
        task_id: Uuid,
        result: Json,
        cost_usd: f64,
    ) -> CoreResult<Task> {
        let now = Utc::now();
        let current = self.get(tenant_id, task_id).await?;
        if !current.status.can_transition_to(&TaskStatus::Completed) {
            return Err(CoreError::ConflictState(format!(
                "{} -> completed",
                current.status.label()
            )));
        }
        let (status_label, status_detail) = status_to_row_parts(&TaskStatus::Completed);

        sqlx::query(
            "UPDATE tasks SET status = $1, status_detail = $2, result = $3, observed_cost_usd = $4, updated_at = $5 WHERE task_id = $6 AND tenant_id = $7",
        )
        .bind(&status_label)
        .bind(&status_detail)
        .bind(&result)
        .bind(cost_usd)
        .bind(now)
        .bind(task_id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await
        .map_err(|err| CoreError::Retryable(err.to_string()))?;

        self.append_event(task_id, &current.status, &TaskStatus::Completed, "completed", now)
            .await?;
        self.get(tenant_id, task_id).await
    }

    async fn list_expirable(&self, now: DateTime<Utc>) -> CoreResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE status IN ('pending', 'assigned') AND deadline IS NOT NULL AND deadline < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| CoreError::Retryable(err.to_string()))?;

        rows.into_iter().map(Task::try_from).collect()
    }

    async fn events(&self, task_id: Uuid) -> CoreResult<Vec<TaskEvent>> {
        #[derive(sqlx::FromRow)]
        struct EventRow {
            task_id: Uuid,
            ts: DateTime<Utc>,
            from_status: String,
            to_status: String,
            detail: String,
        }

        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT task_id, ts, from_status, to_status, detail FROM task_events WHERE task_id = $1 ORDER BY ts ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| CoreError::Retryable(err.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| TaskEvent {
                task_id: r.task_id,
                ts: r.ts,
                from_status: r.from_status,
                to_status: r.to_status,
                detail: r.detail,
            })
            .collect())
    }
}
