//! HTTP API for mailbeacon.

use crate::beacon::MailBeacon;
use crate::models::{Contact, ProcessingResult};
use crate::processor::process_record;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use warp::{Filter, Rejection, Reply, http::StatusCode};

/// Batch request body.
#[derive(Deserialize)]
struct BatchRequest {
    contacts: Vec<Contact>,
}

/// Error payload, mirroring the `{"detail": ...}` shape of the API contract.
#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn with_beacon(
    beacon: Arc<MailBeacon>,
) -> impl Filter<Extract = (Arc<MailBeacon>,), Error = Infallible> + Clone {
    warp::any().map(move || beacon.clone())
}

fn with_semaphore(
    semaphore: Arc<Semaphore>,
) -> impl Filter<Extract = (Arc<Semaphore>,), Error = Infallible> + Clone {
    warp::any().map(move || semaphore.clone())
}

/// Builds the full API route tree under `/api/v1`.
pub(crate) fn api(
    beacon: Arc<MailBeacon>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let semaphore = Arc::new(Semaphore::new(beacon.config().max_concurrency));

    let health = warp::path!("api" / "v1" / "health")
        .and(warp::get())
        .map(|| warp::reply::json(&HealthResponse { status: "ok" }));

    let find_single = warp::path!("api" / "v1" / "find-single")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_beacon(beacon.clone()))
        .and(with_semaphore(semaphore.clone()))
        .and_then(handle_find_single);

    let find_batch = warp::path!("api" / "v1" / "find-batch")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_beacon(beacon))
        .and(with_semaphore(semaphore))
        .and_then(handle_find_batch);

    health
        .or(find_single)
        .or(find_batch)
        .recover(handle_rejection)
}

/// Handles a single contact discovery request.
async fn handle_find_single(
    contact: Contact,
    beacon: Arc<MailBeacon>,
    semaphore: Arc<Semaphore>,
) -> Result<impl Reply, Rejection> {
    let _permit = semaphore.acquire_owned().await.ok();
    tracing::info!("Processing single contact discovery request");
    let result = process_record(&beacon, contact).await;
    Ok(warp::reply::json(&result))
}

/// Handles a batch request: contacts are processed concurrently, capped by the
/// shared semaphore. One failing contact never fails the batch, and an aborted
/// request cancels every in-flight contact.
async fn handle_find_batch(
    request: BatchRequest,
    beacon: Arc<MailBeacon>,
    semaphore: Arc<Semaphore>,
) -> Result<impl Reply, Rejection> {
    tracing::info!("Processing batch of {} contacts", request.contacts.len());

    if request.contacts.is_empty() {
        return Ok(warp::reply::json(&Vec::<ProcessingResult>::new()));
    }

    let tasks = request.contacts.into_iter().map(|contact| {
        let beacon = beacon.clone();
        let semaphore = semaphore.clone();
        let fallback = contact.clone();
        async move {
            let outcome = AssertUnwindSafe(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_record(&beacon, contact).await
            })
            .catch_unwind()
            .await;

            match outcome {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!("Batch contact processing panicked");
                    ProcessingResult::errored(
                        fallback,
                        "Processing failed unexpectedly".to_string(),
                        0.0,
                    )
                }
            }
        }
    });

    let results: Vec<ProcessingResult> = futures::future::join_all(tasks).await;
    Ok(warp::reply::json(&results))
}

/// Maps rejections onto the JSON error shape.
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, detail) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e))
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed".to_string(),
        )
    } else {
        tracing::error!("Unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorResponse { detail }),
        status,
    ))
}

/// Starts the API server and runs until the process is stopped.
pub(crate) async fn serve(beacon: Arc<MailBeacon>, addr: SocketAddr) {
    tracing::info!("Starting API server on {}", addr);
    warp::serve(api(beacon)).run(addr).await;
}
