//! Thin HTTP front end over the admission controller.
//!
//! `GET /queue` runs a simulated unit of work under admission control and
//! `GET /user-limit?limit=N` adjusts the concurrency limit at runtime.

use crate::admission::{Controller, Rejection, SlotToken, Verdict};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppState {
    controller: Controller,
    work: Duration,
}

impl AppState {
    pub fn new(controller: Controller, work: Duration) -> Self {
        Self { controller, work }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }
}

/// Serves requests on `address` until `shutdown` resolves, then finishes
/// the open connections.
pub async fn serve(
    address: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()>,
) -> Result<(), hyper::Error> {
    let make_service = make_service_fn(move |_| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request| handle(state.clone(), request)))
        }
    });

    let server = Server::try_bind(&address)?.serve(make_service);
    info!(message = "Listening for HTTP requests.", address = %server.local_addr());
    server.with_graceful_shutdown(shutdown).await
}

pub async fn handle(state: AppState, request: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (request.method(), request.uri().path()) {
        (&Method::GET, "/queue") => queue(&state).await,
        (&Method::GET, "/user-limit") => user_limit(&state, request.uri().query()),
        _ => json_response(StatusCode::NOT_FOUND, json!({ "message": "Not found." })),
    };
    Ok(response)
}

async fn queue(state: &AppState) -> Response<Body> {
    match state.controller.try_admit() {
        Verdict::Admitted(token) => match process(token, state.work).await {
            Ok(()) => json_response(
                StatusCode::OK,
                json!({ "message": "Your request has been processed." }),
            ),
            Err(rejection) => unavailable(rejection),
        },
        Verdict::Queued { position, deferred } => {
            // The caller is told to retry, but its place in the queue is kept
            // and the work runs once a slot frees up.
            let work = state.work;
            tokio::spawn(async move {
                match deferred.await {
                    Ok(token) => {
                        if process(token, work).await.is_ok() {
                            debug!(message = "Processed queued request.");
                        }
                    }
                    Err(rejection) => {
                        debug!(message = "Dropped queued request.", reason = %rejection)
                    }
                }
            });
            json_response(
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "message": "Too many requests. Please wait and try again later.",
                    "positionInQueue": position,
                }),
            )
        }
        Verdict::Rejected(rejection) => unavailable(rejection),
    }
}

/// Stand-in for real request handling: holds the slot for `work`, unless a
/// forced shutdown abandons it first.
async fn process(token: SlotToken, work: Duration) -> Result<(), Rejection> {
    let processed = tokio::select! {
        _ = tokio::time::sleep(work) => Ok(()),
        _ = token.abandoned() => Err(Rejection::ShuttingDown),
    };
    token.complete();
    processed
}

fn user_limit(state: &AppState, query: Option<&str>) -> Response<Body> {
    let limit = query.and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "limit")
            .and_then(|(_, value)| value.parse::<usize>().ok())
    });

    match limit.map(|limit| state.controller.set_limit(limit)) {
        Some(Ok(())) => json_response(
            StatusCode::OK,
            json!({ "message": "Max concurrent users limit increased." }),
        ),
        _ => json_response(
            StatusCode::BAD_REQUEST,
            json!({ "message": "Invalid limit" }),
        ),
    }
}

fn unavailable(rejection: Rejection) -> Response<Body> {
    json_response(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({ "message": rejection.to_string() }),
    )
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::ShutdownOutcome;
    use pretty_assertions::assert_eq;
    use serde_json::Value;

    fn state(limit: usize, work: Duration) -> AppState {
        AppState::new(Controller::new(limit).unwrap(), work)
    }

    async fn get(state: AppState, uri: &str) -> (StatusCode, Value) {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        let response = handle(state, request).await.unwrap();
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn wait_until_idle(controller: &Controller) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.stats().active > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("controller never became idle");
    }

    #[tokio::test]
    async fn processes_request_below_limit() {
        let state = state(3, Duration::from_millis(1));

        let (status, body) = get(state.clone(), "/queue").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Your request has been processed.");
        assert_eq!(state.controller().stats().active, 0);
    }

    #[tokio::test]
    async fn reports_queue_position_when_full() {
        let state = state(3, Duration::from_millis(1));
        let held = (0..3)
            .map(|_| state.controller().try_admit())
            .collect::<Vec<_>>();
        assert!(held.iter().all(Verdict::is_admitted));

        let (status, body) = get(state.clone(), "/queue").await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["positionInQueue"], 1);
        assert_eq!(state.controller().stats().queued, 1);

        // Freeing the slots runs the queued request in the background.
        drop(held);
        wait_until_idle(state.controller()).await;
        assert_eq!(state.controller().stats().queued, 0);
    }

    #[tokio::test]
    async fn refuses_requests_after_shutdown() {
        let state = state(3, Duration::from_millis(1));
        let outcome = state
            .controller()
            .begin_shutdown(Duration::from_secs(1))
            .await;
        assert_eq!(outcome, ShutdownOutcome::Graceful);

        let (status, body) = get(state, "/queue").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "Server is shutting down.");
    }

    #[tokio::test]
    async fn forced_shutdown_cuts_active_request_short() {
        tokio::time::pause();
        let state = state(1, Duration::from_secs(60));
        let request = tokio::spawn(get(state.clone(), "/queue"));
        while state.controller().stats().active == 0 {
            tokio::task::yield_now().await;
        }

        let outcome = state
            .controller()
            .begin_shutdown(Duration::from_secs(5))
            .await;

        assert_eq!(outcome, ShutdownOutcome::Forced { abandoned: 1 });
        let (status, body) = request.await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "Server is shutting down.");
    }

    #[tokio::test]
    async fn updates_limit() {
        let state = state(3, Duration::from_millis(1));

        let (status, body) = get(state.clone(), "/user-limit?limit=5").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Max concurrent users limit increased.");
        assert_eq!(state.controller().limit(), 5);
    }

    #[tokio::test]
    async fn rejects_invalid_limits() {
        let state = state(3, Duration::from_millis(1));

        for uri in &[
            "/user-limit",
            "/user-limit?limit=0",
            "/user-limit?limit=-2",
            "/user-limit?limit=many",
            "/user-limit?other=4",
        ] {
            let (status, body) = get(state.clone(), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            assert_eq!(body["message"], "Invalid limit");
        }
        assert_eq!(state.controller().limit(), 3);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let state = state(3, Duration::from_millis(1));

        let (status, _) = get(state, "/nope").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn responses_are_json() {
        let request = Request::get("/user-limit?limit=2")
            .body(Body::empty())
            .unwrap();
        let response = handle(state(1, Duration::from_millis(1)), request)
            .await
            .unwrap();

        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
