use std::convert::Infallible;
use std::sync::Arc;

use rocket::data::{ByteUnit, Limits, ToByteUnit};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, post, routes, Build, Rocket, State};

use super::models::{
    CreatePasteRequest, ErrorResponse, PasteResponse, StatusRequest, StatusResponse,
};
use super::service::{PasteError, PasteService};

pub const PASSWORD_HEADER: &str = "X-Paste-Password";

/// Room for the request envelope around the paste fields.
const JSON_ENVELOPE_BYTES: usize = 64 * 1024;

type ApiError = (Status, Json<ErrorResponse>);

/// Builds the API mount. The JSON body limit follows the service's payload
/// cap so oversized pastes are rejected by validation, not by the transport.
pub fn build_rocket(service: Arc<PasteService>) -> Rocket<Build> {
    let limits = Limits::default().limit("json", json_body_limit(service.max_payload_bytes()));
    let figment = rocket::Config::figment().merge(("limits", limits));

    rocket::custom(figment)
        .manage(service)
        .mount("/", routes![create_api, show_api, status_api])
        .register("/", catchers![default_catcher])
}

/// The reader's token from `X-Paste-Password`, if any.
pub struct PasteToken(Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PasteToken {
    type Error = Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = request
            .headers()
            .get_one(PASSWORD_HEADER)
            .map(str::to_string);
        Outcome::Success(PasteToken(token))
    }
}

#[post("/api/pastes", data = "<body>")]
async fn create_api(
    service: &State<Arc<PasteService>>,
    body: Json<CreatePasteRequest>,
) -> Result<(Status, Json<PasteResponse>), ApiError> {
    let created = service
        .create(body.into_inner().into())
        .await
        .map_err(api_error)?;
    Ok((Status::Created, Json(created.into())))
}

#[get("/api/pastes/<id>")]
async fn show_api(
    service: &State<Arc<PasteService>>,
    id: &str,
    token: PasteToken,
) -> Result<Json<PasteResponse>, ApiError> {
    let outcome = service
        .read(id, token.0.as_deref())
        .await
        .map_err(api_error)?;
    Ok(Json(outcome.into()))
}

#[post("/api/status", data = "<body>")]
async fn status_api(
    service: &State<Arc<PasteService>>,
    body: Json<StatusRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = service.status(&body.id).await.map_err(api_error)?;
    Ok(Json(status.into()))
}

#[catch(default)]
fn default_catcher(status: Status, _request: &Request<'_>) -> ApiError {
    let reason = status.reason().unwrap_or("Request failed");
    (
        status,
        Json(ErrorResponse {
            error: reason.to_string(),
        }),
    )
}

/// Worst case JSON escaping turns one byte into six (`\u00XX`).
fn json_body_limit(max_payload_bytes: usize) -> ByteUnit {
    max_payload_bytes
        .saturating_mul(6)
        .saturating_add(JSON_ENVELOPE_BYTES)
        .bytes()
}

fn error_status(err: &PasteError) -> Status {
    match err {
        PasteError::Validation(_) => Status::BadRequest,
        PasteError::NotFound(_) => Status::NotFound,
        PasteError::GenerationExhausted => Status::ServiceUnavailable,
        PasteError::Entropy(_) | PasteError::Crypto(_) | PasteError::Store(_) => {
            Status::InternalServerError
        }
    }
}

fn api_error(err: PasteError) -> ApiError {
    let status = error_status(&err);
    let message = match &err {
        PasteError::NotFound(_) => "Paste not found".to_string(),
        PasteError::Validation(_) | PasteError::GenerationExhausted => err.to_string(),
        _ => {
            log::error!("paste request failed: {err}");
            "Internal server error".to_string()
        }
    };
    (status, Json(ErrorResponse { error: message }))
}
