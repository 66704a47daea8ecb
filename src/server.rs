// src/server.rs

use crate::callback::Authenticator;
use crate::error::NilaOidcError;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use std::sync::Arc;
use tracing::error;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

impl IntoResponse for NilaOidcError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = format!("Error\n{self}\n");
        if matches!(self, Self::MethodNotAllowed(_)) {
            return (status, [(header::CONTENT_TYPE, TEXT_PLAIN), (header::ALLOW, "POST")], body).into_response();
        }
        (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response()
    }
}

/// Builds the router: `/` (protected landing page), `/login`, and the
/// callback at the path of the configured `redirect_uri`.
pub fn router(authenticator: Arc<Authenticator>) -> Router {
    let callback_path = authenticator.settings().redirect_uri.path().to_string();
    Router::new()
        .route("/", get(index))
        .route("/login", get(login))
        .route(&callback_path, any(callback))
        .with_state(authenticator)
}

async fn login(State(auth): State<Arc<Authenticator>>) -> Response {
    let url = auth.begin_login().await;
    (StatusCode::SEE_OTHER, [(header::LOCATION, url.to_string())]).into_response()
}

async fn callback(State(auth): State<Arc<Authenticator>>, method: Method, body: Bytes) -> Response {
    match auth.handle_callback(&method, &body).await {
        Ok(success) => (
            StatusCode::SEE_OTHER,
            [
                (header::SET_COOKIE, success.cookie),
                (header::LOCATION, success.location),
            ],
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn index(State(auth): State<Arc<Authenticator>>, headers: HeaderMap) -> Response {
    match auth.authenticate(&headers).await {
        Ok(Some(signed_in)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_PLAIN)],
            format!("Signed in as {}.\n", signed_in.user.name),
        )
            .into_response(),
        Ok(None) => {
            let mut body = String::from("Not signed in.\n");
            if crate::session::session_token(&headers).is_some() {
                body.push_str("Technically you have a session cookie, but it seems invalid.\n");
            }
            body.push_str("Sign in at /login\n");
            (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response()
        }
        Err(e) => {
            error!("Session lookup failed: {}", e);
            e.into_response()
        }
    }
}
