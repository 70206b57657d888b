// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::error::ApiError;
use crate::jobs::Job;
use crate::state::AppState;

/// Fetch one job by id.
///
/// Async clients poll this until the job reaches `COMPLETE` or `FAILED`,
/// or receive the same payload through the status webhook.
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    tag = "Jobs",
    params(
        ("id" = Uuid, Path, description = "Job id")
    ),
    responses(
        (status = 200, description = "Job found", body = Job),
        (status = 404, description = "Unknown job id")
    )
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state.jobs.find(&id)?;
    Ok(Json(job))
}
