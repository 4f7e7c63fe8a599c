//! # Frontend Fallback
//!
//! Serves the single-page app build from `storage.static_dir`. Any non-API path
//! that is not an existing file gets `index.html`, so client-side routes work
//! on reload. Unknown `/api/*` paths get a JSON 404 instead.

use super::content_type_for;
use crate::error::AppError;
use crate::state::AppState;
use crate::storage::resolves_within;
use actix_web::http::Method;
use actix_web::{web, HttpRequest, HttpResponse};
use std::path::Path;
use tracing::{debug, warn};

const INDEX_FILE: &str = "index.html";

/// Default service for every request no route matched.
pub async fn frontend_fallback(
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let path = req.path();
    if path == "/api" || path.starts_with("/api/") {
        return Err(AppError::NotFound(format!("No API route for {}", path)));
    }
    if *req.method() != Method::GET && *req.method() != Method::HEAD {
        return Err(AppError::NotFound(format!("No route for {} {}", req.method(), path)));
    }

    let static_dir = &app_state.config.storage.static_dir;
    let requested = path.trim_start_matches('/');

    if !requested.is_empty() {
        let candidate = static_dir.join(requested);
        if resolves_within(static_dir, &candidate) && candidate.is_file() {
            return serve_file(&candidate).await;
        }
        debug!("No static asset for {}, serving {}", path, INDEX_FILE);
    }

    let index = static_dir.join(INDEX_FILE);
    if !index.is_file() {
        warn!("Frontend build not found at {}", static_dir.display());
        return Err(AppError::NotFound("Frontend build not found".to_string()));
    }
    serve_file(&index).await
}

async fn serve_file(path: &Path) -> Result<HttpResponse, AppError> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::Storage(format!("Cannot read {}: {}", path.display(), e)))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(HttpResponse::Ok()
        .content_type(content_type_for(&name))
        .body(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::state_with;
    use crate::transcription::testing::ScriptedTranscriber;
    use actix_web::{test, App};
    use serde_json::Value;
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_spa_fallback_and_api_404() {
        let (_root, state) = state_with(Arc::new(ScriptedTranscriber::succeeding("x"))).await;
        let static_dir = state.config.storage.static_dir.clone();
        std::fs::create_dir_all(static_dir.join("assets")).unwrap();
        std::fs::write(static_dir.join(INDEX_FILE), "<html>app</html>").unwrap();
        std::fs::write(static_dir.join("assets/app.js"), "console.log(1)").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .default_service(web::to(frontend_fallback)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(test::read_body(resp).await, "<html>app</html>");

        let req = test::TestRequest::get().uri("/assets/app.js").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/javascript"
        );

        let req = test::TestRequest::get().uri("/files/some/route").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(test::read_body(resp).await, "<html>app</html>");

        let req = test::TestRequest::get().uri("/api/nope").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "not_found");
    }

    #[actix_web::test]
    async fn test_missing_build_is_404() {
        let (_root, state) = state_with(Arc::new(ScriptedTranscriber::succeeding("x"))).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .default_service(web::to(frontend_fallback)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(resp.status(), 404);
    }
}
