use actix_web::{
    error::{JsonPayloadError, QueryPayloadError},
    middleware, web, App, HttpRequest, HttpResponse, HttpServer,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::auth::{Identity, SessionKeys};
use crate::error::{ApiError, BookingError};
use crate::models::AppointmentStatus;
use crate::schedule::{slot_label, BookingRequest, Scheduler};

pub struct AppState {
    pub scheduler: Scheduler,
    pub sessions: SessionKeys,
    pub dev_mode: bool,
}

impl AppState {
    pub fn reject(&self, error: BookingError) -> ApiError {
        ApiError::new(error, self.dev_mode)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotQuery {
    center_id: String,
    date: String,
}

#[derive(Deserialize)]
pub struct StatusChange {
    status: AppointmentStatus,
}

#[derive(Deserialize)]
pub struct ListQuery {
    status: Option<AppointmentStatus>,
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"success": true}))
}

// Open slots for a center on one day
async fn get_slots(
    query: web::Query<SlotQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (_, open) = state
        .scheduler
        .open_slots(&query.center_id, &query.date)
        .await
        .map_err(|e| state.reject(e))?;

    let labels: Vec<String> = open.into_iter().map(slot_label).collect();
    Ok(HttpResponse::Ok().json(json!({"success": true, "data": labels})))
}

async fn create_appointment(
    identity: Identity,
    body: web::Json<BookingRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let appointment = state
        .scheduler
        .book(&identity.user_id, &body)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(HttpResponse::Created().json(json!({"success": true, "appointment": appointment})))
}

async fn update_status(
    identity: Identity,
    appointment_id: web::Path<String>,
    body: web::Json<StatusChange>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let appointment = state
        .scheduler
        .transition(&identity, &appointment_id, body.status)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(HttpResponse::Ok().json(json!({"success": true, "appointment": appointment})))
}

async fn my_appointments(
    identity: Identity,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let appointments = state
        .scheduler
        .appointments_for(&identity)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(HttpResponse::Ok().json(json!({"success": true, "data": appointments})))
}

async fn list_appointments(
    identity: Identity,
    query: web::Query<ListQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let appointments = state
        .scheduler
        .all_appointments(&identity, query.status)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(HttpResponse::Ok().json(json!({"success": true, "data": appointments})))
}

async fn get_appointment(
    identity: Identity,
    appointment_id: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let appointment = state
        .scheduler
        .appointment(&identity, &appointment_id)
        .await
        .map_err(|e| state.reject(e))?;

    Ok(HttpResponse::Ok().json(json!({"success": true, "appointment": appointment})))
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::new(
        BookingError::Validation {
            message: format!("Invalid request body: {err}"),
            field: None,
        },
        false,
    )
    .into()
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    ApiError::new(
        BookingError::Validation {
            message: format!("Invalid query string: {err}"),
            field: None,
        },
        false,
    )
    .into()
}

/// Registers the API on an app that already carries `web::Data<AppState>`.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error))
        .app_data(web::QueryConfig::default().error_handler(query_error))
        .route("/api/health", web::get().to(health))
        .route("/api/slots", web::get().to(get_slots))
        .service(
            web::resource("/api/appointments")
                .route(web::post().to(create_appointment))
                .route(web::get().to(list_appointments)),
        )
        .route("/api/appointments/mine", web::get().to(my_appointments))
        .route("/api/appointments/{id}", web::get().to(get_appointment))
        .route("/api/appointments/{id}/status", web::patch().to(update_status));
}

pub async fn start_server(port: u16, state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(state);
    info!("Starting web server on port {port}...");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
