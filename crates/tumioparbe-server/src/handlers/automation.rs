//! Admin automation handlers: manual task triggers and settings.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::CurrentUser;
use crate::db::models::{SettingsUpdate, SystemSettings};
use crate::error::{AppError, AppResult};
use crate::services::SettingsService;
use crate::tasks::{Automation, TaskKind, TaskRecord};

/// State for the automation routes.
#[derive(Clone)]
pub struct AutomationState {
    pub automation: Automation,
    pub settings: SettingsService,
}

#[derive(Debug, Deserialize, Default)]
pub struct TriggerQuery {
    /// Skip the schedule checks; manual triggers force by default
    pub force: Option<bool>,
}

fn settings_body(settings: &SystemSettings) -> Value {
    json!({
        "success": true,
        "payment_reminder_days": settings.payment_reminder_days,
        "invoice_generation_days": settings.invoice_generation_days,
        "auto_generate_invoices": settings.auto_generate_invoices,
        "auto_send_reminders": settings.auto_send_reminders,
    })
}

async fn trigger(state: &AutomationState, user: &CurrentUser, kind: TaskKind, force: bool) -> AppResult<Json<Value>> {
    user.require_staff()?;
    let task_id = state.automation.spawn(kind, force).await?;
    Ok(Json(json!({
        "success": true,
        "message": kind.started_message(),
        "task_id": task_id,
    })))
}

/// `POST /api/automation/generate_invoices/?force=false`
pub async fn generate_invoices(
    State(state): State<AutomationState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<TriggerQuery>,
) -> AppResult<Json<Value>> {
    trigger(&state, &user, TaskKind::GenerateInvoices, query.force.unwrap_or(true)).await
}

/// `POST /api/automation/send_reminders/?force=false`
pub async fn send_reminders(
    State(state): State<AutomationState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<TriggerQuery>,
) -> AppResult<Json<Value>> {
    trigger(&state, &user, TaskKind::SendReminders, query.force.unwrap_or(true)).await
}

/// `GET /api/automation/task_result/{task_id}/`
pub async fn task_result(
    State(state): State<AutomationState>,
    Extension(user): Extension<CurrentUser>,
    Path(task_id): Path<String>,
) -> AppResult<Json<TaskRecord>> {
    user.require_staff()?;
    state
        .automation
        .task_result(&task_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))
}

/// `GET /api/automation/get_settings/`
pub async fn get_settings(
    State(state): State<AutomationState>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<Value>> {
    user.require_staff()?;
    Ok(Json(settings_body(&state.settings.get().await?)))
}

/// `PUT|PATCH /api/automation/update_settings/`
///
/// ```json
/// {"payment_reminder_days": "3,7", "invoice_generation_days": 5}
/// ```
pub async fn update_settings(
    State(state): State<AutomationState>,
    Extension(user): Extension<CurrentUser>,
    Json(update): Json<SettingsUpdate>,
) -> AppResult<Json<Value>> {
    let settings = state.settings.update(&user, update).await?;
    Ok(Json(settings_body(&settings)))
}
