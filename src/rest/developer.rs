//! The HTTP API of the developer coordinator.
//!
//! | route                       | body                         | reply                      |
//! | --------------------------- | ---------------------------- | -------------------------- |
//! | `POST /upload_model`        | multipart form, one per role | bundle id and file names   |
//! | `POST /initiate_evaluation` | `{"bundle_id": "<hex>"}`     | evaluation id              |
//! | `POST /receive_results`     | sealed results               | acknowledgement            |
//! | `GET /get_results/<id>`     |                              | metrics                    |

use std::{convert::Infallible, sync::Arc};

use bytes::{Buf, Bytes};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use warp::{http::StatusCode, multipart::FormData, reply::Response, Filter, Reply};

use super::{cors, evaluation_id, handle_reject, json_reply, message_reply, with_service};
use crate::{
    bundle::UploadedFile,
    client::EvaluatorApi,
    common::{BundleId, EvaluationId},
    developer::{Developer, DeveloperError},
    settings::ApiSettings,
    storage::{ResultStore, UploadStore},
};

#[derive(Debug, Deserialize, Serialize)]
struct InitiateRequest {
    bundle_id: BundleId,
}

#[derive(Serialize)]
struct UploadReply<'a> {
    message: &'a str,
    bundle_id: BundleId,
    uploaded_files: Vec<String>,
}

#[derive(Serialize)]
struct InitiateReply<'a> {
    message: &'a str,
    evaluation_id: EvaluationId,
}

/// The routes of the developer API.
///
/// Request bodies are limited to [`ApiSettings::max_upload_size`] bytes.
pub fn routes<S, C>(
    developer: Arc<Developer<S, C>>,
    api: &ApiSettings,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone
where
    S: UploadStore + ResultStore,
    C: EvaluatorApi,
{
    let max_upload_size = api.max_upload_size;
    let upload = warp::path!("upload_model")
        .and(warp::post())
        .and(warp::multipart::form().max_length(max_upload_size))
        .and(with_service(developer.clone()))
        .and_then(handle_upload);

    let initiate = warp::path!("initiate_evaluation")
        .and(warp::post())
        .and(warp::body::content_length_limit(4 * 1024))
        .and(warp::body::json())
        .and(with_service(developer.clone()))
        .and_then(handle_initiate);

    let receive = warp::path!("receive_results")
        .and(warp::post())
        .and(evaluation_id())
        .and(warp::body::content_length_limit(max_upload_size))
        .and(warp::body::bytes())
        .and(with_service(developer.clone()))
        .and_then(handle_receive_results);

    let results = warp::path!("get_results" / EvaluationId)
        .and(warp::get())
        .and(with_service(developer))
        .and_then(handle_get_results);

    upload
        .or(initiate)
        .or(receive)
        .or(results)
        .recover(handle_reject)
        .with(cors(&api.cors_origins))
        .with(warp::log("http"))
}

fn error_response(e: DeveloperError) -> Response {
    let status = match e {
        DeveloperError::Bundle(_)
        | DeveloperError::Codec(_)
        | DeveloperError::IdMismatch { .. }
        | DeveloperError::InvalidResults => StatusCode::BAD_REQUEST,
        DeveloperError::BundleNotFound(_) | DeveloperError::NotFound(_) => StatusCode::NOT_FOUND,
        DeveloperError::Transport(_) => StatusCode::BAD_GATEWAY,
        DeveloperError::Storage(ref e) => {
            error!("storage failure: {:#}", e);
            return super::error_reply(StatusCode::INTERNAL_SERVER_ERROR, "internal storage error");
        }
    };
    warn!("request failed: {}", e);
    super::error_reply(status, e)
}

/// Reads every part of a multipart form.
async fn read_form(form: FormData) -> Result<Vec<UploadedFile>, warp::Error> {
    futures::pin_mut!(form);
    let mut files = Vec::new();
    while let Some(mut part) = form.try_next().await? {
        let field = part.name().to_string();
        let filename = part.filename().map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = part.data().await {
            bytes.extend_from_slice(chunk?.chunk());
        }
        files.push(UploadedFile {
            field,
            filename,
            bytes,
        });
    }
    Ok(files)
}

/// Handles and responds to a model upload.
async fn handle_upload<S, C>(
    form: FormData,
    developer: Arc<Developer<S, C>>,
) -> Result<Response, Infallible>
where
    S: UploadStore + ResultStore,
    C: EvaluatorApi,
{
    let files = match read_form(form).await {
        Ok(files) => files,
        Err(e) => {
            warn!("failed to read the upload: {}", e);
            return Ok(super::error_reply(StatusCode::BAD_REQUEST, e));
        }
    };
    Ok(match developer.upload_model_bundle(files).await {
        Ok(reference) => json_reply(
            StatusCode::OK,
            &UploadReply {
                message: "Model files uploaded successfully",
                bundle_id: reference.bundle_id,
                uploaded_files: reference.files,
            },
        ),
        Err(e) => error_response(e),
    })
}

/// Handles and responds to a request to evaluate an uploaded bundle.
async fn handle_initiate<S, C>(
    request: InitiateRequest,
    developer: Arc<Developer<S, C>>,
) -> Result<Response, Infallible>
where
    S: UploadStore + ResultStore,
    C: EvaluatorApi,
{
    Ok(
        match developer.initiate_evaluation(&request.bundle_id).await {
            Ok(evaluation_id) => json_reply(
                StatusCode::OK,
                &InitiateReply {
                    message: "Evaluation initiated",
                    evaluation_id,
                },
            ),
            Err(e) => error_response(e),
        },
    )
}

/// Handles and responds to sealed results sent by the evaluator.
async fn handle_receive_results<S, C>(
    id: EvaluationId,
    body: Bytes,
    developer: Arc<Developer<S, C>>,
) -> Result<Response, Infallible>
where
    S: UploadStore + ResultStore,
    C: EvaluatorApi,
{
    Ok(match developer.receive_results(id, &body).await {
        Ok(()) => message_reply("Results received and processed"),
        Err(e) => error_response(e),
    })
}

/// Handles and responds to a request for the results of an evaluation.
async fn handle_get_results<S, C>(
    id: EvaluationId,
    developer: Arc<Developer<S, C>>,
) -> Result<Response, Infallible>
where
    S: UploadStore + ResultStore,
    C: EvaluatorApi,
{
    Ok(match developer.get_results(id).await {
        Ok(metrics) => json_reply(StatusCode::OK, &metrics),
        Err(e) => error_response(e),
    })
}
