#[macro_use]
extern crate lazy_static;

use std::sync::Arc;

use actix_web::{post, web, App, HttpResponse, HttpServer};
use clap::Parser;
use dotenv::dotenv;

use common::data::{
    FetchFileRequest, OperationResponse, SkippedEntry, SyncLocalToRemoteRequest,
    SyncRemoteToLocalRequest, UploadFileRequest,
};

use crate::config::{AccessTokens, Cli};
use crate::mirror::{Mirror, SyncSummary};
use crate::store::{BlobStore, S3Store};

mod config;
mod errors;
mod local_tree;
mod mirror;
mod remote_tree;
mod server_metrics;
mod store;
mod tree;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    // load secret environment variables
    // like access tokens and aws access keys
    dotenv().ok();
    env_logger::init();

    let tokens = AccessTokens::from_env().expect("Can't load access tokens");
    let creds = s3::creds::Credentials::from_env().expect("Can't get S3 bucket credentials");

    let mut bucket = s3::Bucket::new(
        &cli.s3_bucket,
        s3::Region::Custom {
            region: cli.s3_region.clone(),
            endpoint: cli.s3_endpoint.clone(),
        },
        creds,
    )
    .expect("Can't open S3 bucket");
    bucket.set_path_style();

    let store: Arc<dyn BlobStore> = Arc::new(S3Store::new(bucket));
    let mirror = web::Data::new(Mirror::new(
        store,
        cli.local_directory.clone(),
        tokens,
        cli.parallelism,
    ));

    log::info!(
        "Mirroring {} <-> bucket {} on {}",
        cli.local_directory,
        cli.s3_bucket,
        cli.listen_address
    );

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(mirror.clone())
            .service(server_metrics::healthcheck)
            .service(server_metrics::prometheus_metrics)
            .configure(mirror_routes)
    })
    .bind(&cli.listen_address)?
    .run()
    .await
}

fn mirror_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        // malformed bodies still get the usual response shape
        let response = HttpResponse::BadRequest().json(OperationResponse::failed(err.to_string()));
        actix_web::error::InternalError::from_response(err, response).into()
    }))
    .service(fetch_file)
    .service(upload_file)
    .service(sync_remote_to_local)
    .service(sync_local_to_remote);
}

fn failure(operation: &str, e: errors::MirrorError) -> OperationResponse {
    log::warn!("{operation} failed: {e}");
    OperationResponse::failed(e.to_string())
}

fn synced(message: &str, summary: SyncSummary) -> OperationResponse {
    let skipped = summary
        .skipped
        .into_iter()
        .map(|s| SkippedEntry {
            path: s.path,
            reason: s.reason,
        })
        .collect();
    OperationResponse::ok_with_summary(message, summary.files, skipped)
}

#[post("/fetch-file-from-azure")]
async fn fetch_file(
    payload: web::Json<FetchFileRequest>,
    mirror: web::Data<Mirror>,
) -> HttpResponse {
    let start_time = std::time::Instant::now();
    let response = match mirror.fetch_file(&payload.path, &payload.token).await {
        Ok(code) => OperationResponse::ok_with_code("File Sent", code),
        Err(e) => failure("fetch-file", e),
    };
    server_metrics::MIRROR_FETCH_FILE_TIME.observe(start_time.elapsed().as_secs_f64());
    HttpResponse::Ok().json(&response)
}

#[post("/upload-code-to-azure")]
async fn upload_file(
    payload: web::Json<UploadFileRequest>,
    mirror: web::Data<Mirror>,
) -> HttpResponse {
    let start_time = std::time::Instant::now();
    let response = match mirror
        .upload_file(&payload.path, &payload.code, &payload.token)
        .await
    {
        Ok(()) => OperationResponse::ok("Upload successful"),
        Err(e) => failure("upload-file", e),
    };
    server_metrics::MIRROR_UPLOAD_FILE_TIME.observe(start_time.elapsed().as_secs_f64());
    HttpResponse::Ok().json(&response)
}

#[post("/sync-blobs-azure-to-local")]
async fn sync_remote_to_local(
    payload: web::Json<SyncRemoteToLocalRequest>,
    mirror: web::Data<Mirror>,
) -> HttpResponse {
    let start_time = std::time::Instant::now();
    let response = match mirror
        .sync_remote_to_local(
            &payload.source_path_inside_azure_container,
            &payload.destination_path_inside_local_directory,
            &payload.token,
        )
        .await
    {
        Ok(summary) => synced("Download completed successfully!", summary),
        Err(e) => failure("sync-remote-to-local", e),
    };
    server_metrics::MIRROR_SYNC_REMOTE_TO_LOCAL_TIME.observe(start_time.elapsed().as_secs_f64());
    HttpResponse::Ok().json(&response)
}

#[post("/sync-blobs-local-to-azure")]
async fn sync_local_to_remote(
    payload: web::Json<SyncLocalToRemoteRequest>,
    mirror: web::Data<Mirror>,
) -> HttpResponse {
    let start_time = std::time::Instant::now();
    let response = match mirror
        .sync_local_to_remote(
            &payload.source_path_inside_local_directory,
            &payload.destination_path_inside_azure_container,
            &payload.token,
        )
        .await
    {
        Ok(summary) => synced("Upload completed successfully!", summary),
        Err(e) => failure("sync-local-to-remote", e),
    };
    server_metrics::MIRROR_SYNC_LOCAL_TO_REMOTE_TIME.observe(start_time.elapsed().as_secs_f64());
    HttpResponse::Ok().json(&response)
}

#[cfg(test)]
use actix_web::test;

#[cfg(test)]
use crate::store::memory::MemoryStore;

#[cfg(test)]
fn test_data(store: Arc<MemoryStore>, local_root: &str) -> web::Data<Mirror> {
    web::Data::new(Mirror::new(store, local_root, AccessTokens::new("r", "w"), 2))
}

#[actix_web::test]
async fn test_fetch_file_route() {
    let store = Arc::new(MemoryStore::default());
    store.insert("proj/a.txt", b"hello", "text/plain");
    let app = test::init_service(
        App::new()
            .app_data(test_data(store, "/unused"))
            .configure(mirror_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/fetch-file-from-azure")
        .set_json(serde_json::json!({"path": "proj/a.txt", "token": "r"}))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        resp,
        serde_json::json!({"success": 1, "message": "File Sent", "data": {"code": "hello"}})
    );

    let req = test::TestRequest::post()
        .uri("/fetch-file-from-azure")
        .set_json(serde_json::json!({"path": "proj", "token": "r"}))
        .to_request();
    let resp: OperationResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp, OperationResponse::failed("This path is a directory."));

    let req = test::TestRequest::post()
        .uri("/fetch-file-from-azure")
        .set_json(serde_json::json!({"path": "proj/a.txt", "token": "guess"}))
        .to_request();
    let resp: OperationResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp, OperationResponse::failed("Invalid token."));
}

#[actix_web::test]
async fn test_upload_file_route() {
    let store = Arc::new(MemoryStore::default());
    let app = test::init_service(
        App::new()
            .app_data(test_data(store.clone(), "/unused"))
            .configure(mirror_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/upload-code-to-azure")
        .set_json(serde_json::json!({"path": "notes/today.md", "code": "- done", "token": "w"}))
        .to_request();
    let resp: OperationResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp, OperationResponse::ok("Upload successful"));
    assert_eq!(store.get("notes/today.md").unwrap().content, b"- done");
}

#[actix_web::test]
async fn test_upload_file_route_failure() {
    let store = Arc::new(MemoryStore::rejecting_uploads("locked"));
    let app = test::init_service(
        App::new()
            .app_data(test_data(store.clone(), "/unused"))
            .configure(mirror_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/upload-code-to-azure")
        .set_json(serde_json::json!({"path": "locked/a.txt", "code": "a", "token": "w"}))
        .to_request();
    let resp: OperationResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp, OperationResponse::failed("Upload NOT successful"));
    assert!(store.keys().is_empty());
}

#[actix_web::test]
async fn test_storage_failure_routes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::failing_listing());
    store.insert("proj/a.txt", b"a", "");
    let app = test::init_service(
        App::new()
            .app_data(test_data(store, dir.path().to_str().unwrap()))
            .configure(mirror_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/fetch-file-from-azure")
        .set_json(serde_json::json!({"path": "proj/a.txt", "token": "r"}))
        .to_request();
    let resp: OperationResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp, OperationResponse::failed("listing of proj/a.txt refused"));

    let req = test::TestRequest::post()
        .uri("/sync-blobs-azure-to-local")
        .set_json(serde_json::json!({
            "sourcePathInsideAzureContainer": "proj/",
            "destinationPathInsideLocalDirectory": "copy/",
            "token": "w"
        }))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        resp,
        serde_json::json!({"success": 0, "message": "listing of proj/ refused"})
    );
    assert!(!dir.path().join("copy").exists());
}

#[cfg(unix)]
#[actix_web::test]
async fn test_sync_route_lists_skipped_entries() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("proj")).unwrap();
    std::fs::write(dir.path().join("proj/README.md"), "# hi").unwrap();
    std::os::unix::fs::symlink(
        dir.path().join("does-not-exist"),
        dir.path().join("proj/dangling"),
    )
    .unwrap();

    let store = Arc::new(MemoryStore::default());
    let app = test::init_service(
        App::new()
            .app_data(test_data(store.clone(), dir.path().to_str().unwrap()))
            .configure(mirror_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/sync-blobs-local-to-azure")
        .set_json(serde_json::json!({
            "sourcePathInsideLocalDirectory": "proj/",
            "destinationPathInsideAzureContainer": "proj/",
            "token": "w"
        }))
        .to_request();
    let resp: OperationResponse = test::call_and_read_body_json(&app, req).await;
    assert!(resp.is_success());
    assert_eq!(resp.files, Some(1));
    assert_eq!(resp.skipped.len(), 1);
    assert_eq!(resp.skipped[0].path, "proj/dangling");
    assert_eq!(store.keys(), vec!["proj/README.md"]);
}

#[actix_web::test]
async fn test_sync_routes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("proj/src")).unwrap();
    std::fs::write(dir.path().join("proj/README.md"), "# hi").unwrap();
    std::fs::write(dir.path().join("proj/src/main.txt"), "x").unwrap();

    let store = Arc::new(MemoryStore::default());
    let app = test::init_service(
        App::new()
            .app_data(test_data(store.clone(), dir.path().to_str().unwrap()))
            .configure(mirror_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/sync-blobs-local-to-azure")
        .set_json(serde_json::json!({
            "sourcePathInsideLocalDirectory": "proj/",
            "destinationPathInsideAzureContainer": "proj/",
            "token": "w"
        }))
        .to_request();
    let resp: OperationResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        resp,
        OperationResponse::ok_with_summary("Upload completed successfully!", 2, Vec::new())
    );
    assert_eq!(store.keys(), vec!["proj/README.md", "proj/src/main.txt"]);

    let req = test::TestRequest::post()
        .uri("/sync-blobs-azure-to-local")
        .set_json(serde_json::json!({
            "sourcePathInsideAzureContainer": "proj/",
            "destinationPathInsideLocalDirectory": "copy/",
            "token": "w"
        }))
        .to_request();
    let resp: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        resp,
        serde_json::json!({"success": 1, "message": "Download completed successfully!", "files": 2})
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("copy/src/main.txt")).unwrap(),
        "x"
    );

    // missing local source is a structured failure, not a 500
    let req = test::TestRequest::post()
        .uri("/sync-blobs-local-to-azure")
        .set_json(serde_json::json!({
            "sourcePathInsideLocalDirectory": "gone/",
            "destinationPathInsideAzureContainer": "proj/",
            "token": "w"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let body: OperationResponse = test::read_body_json(resp).await;
    assert_eq!(body.success, 0);
}

#[actix_web::test]
async fn test_malformed_body() {
    let store = Arc::new(MemoryStore::default());
    let app = test::init_service(
        App::new()
            .app_data(test_data(store, "/unused"))
            .configure(mirror_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/upload-code-to-azure")
        .set_json(serde_json::json!({"path": "a.txt"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: OperationResponse = test::read_body_json(resp).await;
    assert_eq!(body.success, 0);
}

#[actix_web::test]
async fn test_healthcheck() {
    let app = test::init_service(App::new().service(server_metrics::healthcheck)).await;
    let req = test::TestRequest::get().uri("/healthz").to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, web::Bytes::from_static(b"OK"));
}
