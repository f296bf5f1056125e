use std::error::Error;

use actix_web::{HttpResponse, get};
use prometheus::{Histogram, IntCounter, register_histogram, histogram_opts, register_int_counter};


lazy_static! {
    pub static ref MIRROR_FETCH_FILE_TIME: Histogram = register_histogram!(histogram_opts!(
        "mirror_fetch_file_time",
        "Time taken to fetch a single file from the bucket",
        vec![0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
    )).unwrap();
    pub static ref MIRROR_UPLOAD_FILE_TIME: Histogram = register_histogram!(histogram_opts!(
        "mirror_upload_file_time",
        "Time taken to upload a single file to the bucket",
        vec![0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
    )).unwrap();
    pub static ref MIRROR_SYNC_REMOTE_TO_LOCAL_TIME: Histogram = register_histogram!(histogram_opts!(
        "mirror_sync_remote_to_local_time",
        "Time taken to fetch a bucket prefix and write it to the local directory",
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0],
    )).unwrap();
    pub static ref MIRROR_SYNC_LOCAL_TO_REMOTE_TIME: Histogram = register_histogram!(histogram_opts!(
        "mirror_sync_local_to_remote_time",
        "Time taken to read a local tree and upload it to the bucket",
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0],
    )).unwrap();
    pub static ref MIRROR_BLOBS_DOWNLOADED: IntCounter = register_int_counter!(
        "mirror_blobs_downloaded",
        "Blobs downloaded from the bucket by sync requests"
    ).unwrap();
    pub static ref MIRROR_BLOBS_UPLOADED: IntCounter = register_int_counter!(
        "mirror_blobs_uploaded",
        "Blobs uploaded to the bucket"
    ).unwrap();
    pub static ref MIRROR_LOCAL_FILES_WRITTEN: IntCounter = register_int_counter!(
        "mirror_local_files_written",
        "Files written into the local directory"
    ).unwrap();
}

#[get("/healthz")]
async fn healthcheck() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

#[get("/metrics")]
async fn prometheus_metrics() -> Result<HttpResponse, Box<dyn Error>> {
    use prometheus::Encoder;

    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(HttpResponse::Ok().body(buffer))
}

#[test]
fn test_transfer_counter_help() {
    // registration happens on first use
    let _ = MIRROR_BLOBS_UPLOADED.get();
    let _ = MIRROR_BLOBS_DOWNLOADED.get();

    let families = prometheus::gather();
    let help = |name: &str| {
        families
            .iter()
            .find(|family| family.get_name() == name)
            .map(|family| family.get_help().to_string())
    };
    assert_eq!(help("mirror_blobs_uploaded").as_deref(), Some("Blobs uploaded to the bucket"));
    assert_eq!(
        help("mirror_blobs_downloaded").as_deref(),
        Some("Blobs downloaded from the bucket by sync requests")
    );
}
