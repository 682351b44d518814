//! The HTTP API of the evaluator coordinator.
//!
//! | route                         | body                  | reply           |
//! | ----------------------------- | --------------------- | --------------- |
//! | `POST /receive_model`         | sealed model request  | acknowledgement |
//! | `GET /evaluation_status/<id>` |                       | task state      |

use std::{convert::Infallible, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use warp::{http::StatusCode, reply::Response, Filter, Reply};

use super::{cors, evaluation_id, handle_reject, json_reply, message_reply, with_service};
use crate::{
    common::EvaluationId,
    evaluator::{Evaluator, EvaluatorError},
    settings::ApiSettings,
    storage::{BundleStore, TaskStore},
    task::TaskState,
};

#[derive(Serialize)]
struct StatusReply {
    evaluation_id: EvaluationId,
    #[serde(flatten)]
    state: TaskState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// The routes of the evaluator API.
///
/// Sealed requests are limited to [`ApiSettings::max_upload_size`] bytes.
pub fn routes<S>(
    evaluator: Arc<Evaluator<S>>,
    api: &ApiSettings,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone
where
    S: TaskStore + BundleStore,
{
    let receive = warp::path!("receive_model")
        .and(warp::post())
        .and(evaluation_id())
        .and(warp::body::content_length_limit(api.max_upload_size))
        .and(warp::body::bytes())
        .and(with_service(evaluator.clone()))
        .and_then(handle_receive_model);

    let status = warp::path!("evaluation_status" / EvaluationId)
        .and(warp::get())
        .and(with_service(evaluator))
        .and_then(handle_status);

    receive
        .or(status)
        .recover(handle_reject)
        .with(cors(&api.cors_origins))
        .with(warp::log("http"))
}

fn error_response(e: EvaluatorError) -> Response {
    let status = match e {
        EvaluatorError::Codec(_) | EvaluatorError::IdMismatch { .. } | EvaluatorError::Bundle(_) => {
            StatusCode::BAD_REQUEST
        }
        EvaluatorError::DuplicateEvaluation(_) => StatusCode::CONFLICT,
        EvaluatorError::NotFound(_) => StatusCode::NOT_FOUND,
        EvaluatorError::QueueFull | EvaluatorError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        EvaluatorError::Storage(ref e) => {
            error!("storage failure: {:#}", e);
            return super::error_reply(StatusCode::INTERNAL_SERVER_ERROR, "internal storage error");
        }
    };
    warn!("request failed: {}", e);
    super::error_reply(status, e)
}

/// Handles and responds to a sealed evaluation request.
async fn handle_receive_model<S>(
    id: EvaluationId,
    body: Bytes,
    evaluator: Arc<Evaluator<S>>,
) -> Result<Response, Infallible>
where
    S: TaskStore + BundleStore,
{
    Ok(match evaluator.receive_model(id, &body).await {
        Ok(()) => message_reply("Model received successfully and evaluation started"),
        Err(e) => error_response(e),
    })
}

/// Handles and responds to a status request.
async fn handle_status<S>(
    id: EvaluationId,
    evaluator: Arc<Evaluator<S>>,
) -> Result<Response, Infallible>
where
    S: TaskStore + BundleStore,
{
    Ok(match evaluator.record(id).await {
        Ok(record) => json_reply(
            StatusCode::OK,
            &StatusReply {
                evaluation_id: id,
                state: record.state,
                created_at: record.created_at,
                updated_at: record.updated_at,
            },
        ),
        Err(e) => error_response(e),
    })
}
