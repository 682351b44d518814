//! HTTP APIs of the two coordinators.
//!
//! Every error is answered with a JSON body `{"error": "<message>"}` and a status code telling
//! the kind of failure apart. Browsers may call both APIs from the origins listed in
//! [`ApiSettings::cors_origins`]; requests from other origins are refused with `403`.

pub mod developer;
pub mod evaluator;

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use serde::Serialize;
use warp::{
    http::StatusCode,
    reply::{Reply, Response},
    Filter,
};

use crate::{common::EvaluationId, request::EVALUATION_ID_HEADER, settings::ApiSettings};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

fn json_reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn message_reply(message: &str) -> Response {
    json_reply(StatusCode::OK, &MessageBody { message })
}

fn error_reply(status: StatusCode, error: impl ToString) -> Response {
    json_reply(
        status,
        &ErrorBody {
            error: error.to_string(),
        },
    )
}

/// Converts a coordinator service into a `warp` filter.
fn with_service<T>(service: Arc<T>) -> impl Filter<Extract = (Arc<T>,), Error = Infallible> + Clone
where
    T: Send + Sync + 'static,
{
    warp::any().map(move || service.clone())
}

/// Extracts the evaluation id from the request headers.
fn evaluation_id() -> impl Filter<Extract = (EvaluationId,), Error = warp::Rejection> + Clone {
    warp::header::<EvaluationId>(EVALUATION_ID_HEADER)
}

/// The CORS policy of both APIs: `GET` and `POST` from the configured origins.
fn cors(origins: &[String]) -> warp::cors::Builder {
    let cors = warp::cors()
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["content-type", EVALUATION_ID_HEADER]);
    if origins.iter().any(|origin| origin == "*") {
        cors.allow_any_origin()
    } else {
        cors.allow_origins(origins.iter().map(String::as_str))
    }
}

/// Handles `warp` rejections of bad requests.
async fn handle_reject(err: warp::Rejection) -> Result<Response, Infallible> {
    let (code, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::reject::MissingHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidHeader>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "the request body is too large".to_string(),
        )
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (
            StatusCode::LENGTH_REQUIRED,
            "a content length is required".to_string(),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed".to_string(),
        )
    } else {
        error!("unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
        )
    };
    Ok(error_reply(code, message))
}

/// Runs a HTTP server with the provided filter routes.
pub async fn serve<F>(routes: F, bind_address: SocketAddr)
where
    F: Filter + Clone + Send + Sync + 'static,
    F::Extract: Reply,
{
    info!("listening on {}", bind_address);
    warp::serve(routes).run(bind_address).await;
}
