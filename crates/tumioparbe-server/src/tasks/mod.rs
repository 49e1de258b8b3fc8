//! Background automation: invoice generation and payment reminders.
//!
//! Both jobs run from the daily [`scheduler`], from the `run-task` CLI
//! command, or on demand through the automation API. On-demand runs are
//! spawned and their results kept in the cache under a task id.

pub mod invoices;
pub mod reminders;
pub mod scheduler;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing;
use crate::cache::{task_result_key, DbCache, TASK_RESULT_TTL};
use crate::db::DbPool;
use crate::error::AppResult;
use crate::services::SmsService;

pub use invoices::{generate_monthly_invoices, InvoiceRun};
pub use reminders::{send_payment_reminders, ReminderRun};

/// The jobs automation can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    GenerateInvoices,
    SendReminders,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::GenerateInvoices => "generate_invoices",
            TaskKind::SendReminders => "send_reminders",
        }
    }

    pub fn started_message(&self) -> &'static str {
        match self {
            TaskKind::GenerateInvoices => "Invoice generation task started",
            TaskKind::SendReminders => "Payment reminder task started",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Success,
    Failure,
}

/// What the cache holds for a spawned task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub task: TaskKind,
    pub status: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs automation jobs against the database and SMS gateway.
#[derive(Clone)]
pub struct Automation {
    pool: DbPool,
    sms: SmsService,
    cache: DbCache,
}

impl Automation {
    pub fn new(pool: DbPool, sms: SmsService, cache: DbCache) -> Self {
        Self { pool, sms, cache }
    }

    /// Run a job to completion and return its JSON outcome.
    pub async fn run(&self, kind: TaskKind, force: bool) -> AppResult<serde_json::Value> {
        let today = billing::today();
        let value = match kind {
            TaskKind::GenerateInvoices => {
                serde_json::to_value(generate_monthly_invoices(&self.pool, today, force).await?)?
            }
            TaskKind::SendReminders => {
                serde_json::to_value(send_payment_reminders(&self.pool, &self.sms, today, force).await?)?
            }
        };
        Ok(value)
    }

    /// Start a job in the background and return its task id.
    pub async fn spawn(&self, kind: TaskKind, force: bool) -> AppResult<String> {
        let task_id = Uuid::new_v4().to_string();
        let pending = TaskRecord {
            task_id: task_id.clone(),
            task: kind,
            status: TaskState::Pending,
            result: None,
            error: None,
        };
        self.cache
            .set(&task_result_key(&task_id), &pending, TASK_RESULT_TTL)
            .await?;

        let automation = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let record = match automation.run(kind, force).await {
                Ok(result) => TaskRecord {
                    status: TaskState::Success,
                    result: Some(result),
                    ..pending
                },
                Err(e) => {
                    tracing::error!(task_id = %id, task = kind.as_str(), error = %e, "Automation task failed");
                    TaskRecord {
                        status: TaskState::Failure,
                        error: Some(e.to_string()),
                        ..pending
                    }
                }
            };
            if let Err(e) = automation
                .cache
                .set(&task_result_key(&id), &record, TASK_RESULT_TTL)
                .await
            {
                tracing::error!(task_id = %id, error = %e, "Failed to store task result");
            }
        });

        tracing::info!(task_id = %task_id, task = kind.as_str(), "Automation task spawned");
        Ok(task_id)
    }

    /// Drop expired cache rows (stale OTPs, old task results).
    pub async fn purge_cache(&self) -> AppResult<u64> {
        self.cache.purge_expired().await
    }

    /// Stored record for a spawned task, if it has not expired.
    pub async fn task_result(&self, task_id: &str) -> AppResult<Option<TaskRecord>> {
        self.cache.get(&task_result_key(task_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let record = TaskRecord {
            task_id: "abc".to_string(),
            task: TaskKind::SendReminders,
            status: TaskState::Pending,
            result: None,
            error: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"task_id": "abc", "task": "send_reminders", "status": "PENDING"})
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(TaskKind::GenerateInvoices.as_str(), "generate_invoices");
        assert_eq!(
            TaskKind::SendReminders.started_message(),
            "Payment reminder task started"
        );
    }
}
