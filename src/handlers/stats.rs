use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use super::check_auth;
use crate::errors::AppResult;
use crate::services::scheduler::{Scheduler, SchedulerStats};

// GET /api/scheduler/stats
pub async fn get_stats(
    State(scheduler): State<Scheduler>,
    headers: HeaderMap,
) -> AppResult<Json<SchedulerStats>> {
    check_auth(&headers, &scheduler.state().config.admin_token)?;
    Ok(Json(scheduler.get_scheduler_stats().await?))
}
