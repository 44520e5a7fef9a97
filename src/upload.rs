//! Upload pipeline: validation, quota admission, storage write, counters.

use axum::extract::multipart::{Multipart, MultipartError};
use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::{error, info};

use crate::admission;
use crate::config::ALLOWED_EXTENSIONS;
use crate::error::UploadReject;
use crate::http::{MetricStatus, flash};
use crate::metrics::AppMetrics;
use crate::storage::Storage;
use crate::usage::UsageMeter;

/// Upload limits shared with the router's body-limit layer.
#[derive(Debug)]
pub struct UploadConfig {
    pub max_upload_bytes: u64,
}

/// `POST /`: run the upload pipeline and map its outcome to a response plus
/// counter updates. This is the only place outcomes become HTTP statuses.
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(usage): Extension<Arc<UsageMeter>>,
    Extension(metrics): Extension<Arc<AppMetrics>>,
    Extension(limits): Extension<Arc<UploadConfig>>,
    jar: CookieJar,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    match handle_upload(&storage, &usage, &limits, &headers, multipart).await {
        Ok(filename) => {
            metrics.upload_total.inc();
            info!(filename, "file uploaded");
            (flash(jar, "File successfully uploaded"), Redirect::to("/")).into_response()
        }
        Err(reject) => {
            metrics.upload_failed.inc();
            let mut response = match &reject {
                UploadReject::Validation(message) => {
                    (flash(jar, message), Redirect::to("/")).into_response()
                }
                UploadReject::QuotaExceeded => (
                    flash(jar, "Upload failed: Disk space is running low"),
                    Redirect::to("/"),
                )
                    .into_response(),
                UploadReject::TooLarge => {
                    (flash(jar, "File too large"), Redirect::to("/")).into_response()
                }
                UploadReject::Storage(err) => {
                    metrics.error_500_total.inc();
                    error!(error = %err, "upload failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
                }
            };
            response
                .extensions_mut()
                .insert(MetricStatus(reject.metric_status()));
            response
        }
    }
}

/// The pipeline itself. Steps in order, each with a distinct early exit:
/// size ceiling, filename presence, extension allow-list, quota admission,
/// streamed write.
async fn handle_upload(
    storage: &Storage,
    usage: &UsageMeter,
    limits: &UploadConfig,
    headers: &HeaderMap,
    mut multipart: Multipart,
) -> Result<String, UploadReject> {
    if let Some(declared) = declared_size(headers)
        && declared > limits.max_upload_bytes
    {
        return Err(UploadReject::TooLarge);
    }

    let mut field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => break field,
            Ok(Some(_)) => continue,
            Ok(None) => return Err(UploadReject::Validation("No file part")),
            Err(err) => return Err(reject_from_multipart(err)),
        }
    };

    let filename = field.file_name().map(str::trim).unwrap_or_default().to_string();
    if filename.is_empty() {
        return Err(UploadReject::Validation("No file selected"));
    }
    if !allowed_file(&filename) {
        return Err(UploadReject::Validation("File type not allowed"));
    }
    let target = storage
        .resolve_name(&filename)
        .map_err(|_| UploadReject::Validation("Invalid filename"))?;

    let percent = usage.percent().await.map_err(UploadReject::Storage)?;
    if !admission::admit(percent) {
        info!(filename, "upload rejected by quota at {percent:.2}% usage");
        return Err(UploadReject::QuotaExceeded);
    }

    let mut pending = storage.begin_write(&target).await.map_err(UploadReject::Storage)?;
    let mut written: u64 = 0;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                written += chunk.len() as u64;
                if let Err(err) = pending.write_chunk(&chunk).await {
                    pending.abort().await;
                    return Err(UploadReject::Storage(err));
                }
            }
            Ok(None) => break,
            Err(err) => {
                pending.abort().await;
                return Err(reject_from_multipart(err));
            }
        }
    }
    pending.commit().await.map_err(UploadReject::Storage)?;
    info!(filename, bytes = written, "upload stored");
    Ok(filename)
}

fn declared_size(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}

/// A body over the router limit surfaces as a 413 multipart error mid-read;
/// anything else means the form data itself was unusable.
fn reject_from_multipart(err: MultipartError) -> UploadReject {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        UploadReject::TooLarge
    } else {
        UploadReject::Validation("No file part")
    }
}

/// Case-insensitive suffix match after the last dot.
fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::extract::FromRequest;
    use axum::http::Request;
    use tempfile::tempdir;
    use tokio::fs;

    const BOUNDARY: &str = "test-boundary";

    fn make_state(capacity_bytes: u64) -> (tempfile::TempDir, Arc<Storage>, Arc<UsageMeter>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("uploads");
        std::fs::create_dir_all(&root).expect("create root");
        let storage = Arc::new(Storage::new(root.clone()));
        let usage = Arc::new(UsageMeter::new(root, capacity_bytes));
        (temp, storage, usage)
    }

    fn make_limits() -> Arc<UploadConfig> {
        Arc::new(UploadConfig {
            max_upload_bytes: crate::config::MAX_UPLOAD_BYTES,
        })
    }

    fn multipart_body(filename: &str, content: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn make_multipart(body: Vec<u8>) -> (HeaderMap, Multipart) {
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::CONTENT_LENGTH, body.len())
            .body(AxumBody::from(body))
            .expect("request");
        let headers = request.headers().clone();
        let multipart = Multipart::from_request(request, &()).await.expect("multipart");
        (headers, multipart)
    }

    #[tokio::test]
    async fn stores_an_allowed_file() {
        let (_temp, storage, usage) = make_state(1024 * 1024);
        let (headers, multipart) = make_multipart(multipart_body("notes.txt", b"hello")).await;

        let filename = handle_upload(&storage, &usage, &make_limits(), &headers, multipart)
            .await
            .expect("upload");

        assert_eq!(filename, "notes.txt");
        let contents = fs::read(storage.root_path().join("notes.txt"))
            .await
            .expect("read stored file");
        assert_eq!(contents, b"hello");
    }

    #[tokio::test]
    async fn rejects_disallowed_extension_regardless_of_content() {
        let (_temp, storage, usage) = make_state(1024 * 1024);
        let (headers, multipart) = make_multipart(multipart_body("payload.exe", b"GIF89a")).await;

        let result = handle_upload(&storage, &usage, &make_limits(), &headers, multipart).await;

        assert!(matches!(
            result,
            Err(UploadReject::Validation("File type not allowed"))
        ));
        let mut entries = fs::read_dir(storage.root_path()).await.expect("read dir");
        assert!(entries.next_entry().await.expect("entry").is_none());
    }

    #[tokio::test]
    async fn rejects_missing_file_part() {
        let (_temp, storage, usage) = make_state(1024 * 1024);
        let body = format!("--{BOUNDARY}--\r\n").into_bytes();
        let (headers, multipart) = make_multipart(body).await;

        let result = handle_upload(&storage, &usage, &make_limits(), &headers, multipart).await;

        assert!(matches!(
            result,
            Err(UploadReject::Validation("No file part"))
        ));
    }

    #[tokio::test]
    async fn rejects_empty_filename() {
        let (_temp, storage, usage) = make_state(1024 * 1024);
        let (headers, multipart) = make_multipart(multipart_body("", b"data")).await;

        let result = handle_upload(&storage, &usage, &make_limits(), &headers, multipart).await;

        assert!(matches!(
            result,
            Err(UploadReject::Validation("No file selected"))
        ));
    }

    #[tokio::test]
    async fn rejects_traversal_filename() {
        let (_temp, storage, usage) = make_state(1024 * 1024);
        let (headers, multipart) = make_multipart(multipart_body("../escape.txt", b"data")).await;
        let result = handle_upload(&storage, &usage, &make_limits(), &headers, multipart).await;

        assert!(matches!(
            result,
            Err(UploadReject::Validation("Invalid filename"))
        ));
        assert!(
            fs::metadata(storage.root_path().parent().unwrap().join("escape.txt"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn rejects_when_quota_exceeded() {
        let (_temp, storage, usage) = make_state(1000);
        fs::write(storage.root_path().join("existing.bin"), vec![0u8; 900])
            .await
            .expect("seed storage");
        let (headers, multipart) = make_multipart(multipart_body("more.txt", b"data")).await;

        let result = handle_upload(&storage, &usage, &make_limits(), &headers, multipart).await;

        assert!(matches!(result, Err(UploadReject::QuotaExceeded)));
        assert!(
            fs::metadata(storage.root_path().join("more.txt")).await.is_err(),
            "rejected upload must not reach storage"
        );
    }

    #[tokio::test]
    async fn admits_at_exactly_the_boundary() {
        let (_temp, storage, usage) = make_state(1000);
        fs::write(storage.root_path().join("existing.bin"), vec![0u8; 800])
            .await
            .expect("seed storage");
        let (headers, multipart) = make_multipart(multipart_body("edge.txt", b"ok")).await;

        handle_upload(&storage, &usage, &make_limits(), &headers, multipart)
            .await
            .expect("boundary upload admitted");
    }

    #[tokio::test]
    async fn oversized_declared_length_short_circuits() {
        let (_temp, storage, usage) = make_state(1000);
        // Usage is already over quota; too-large must win because it is
        // checked before the gate or storage are consulted.
        fs::write(storage.root_path().join("existing.bin"), vec![0u8; 990])
            .await
            .expect("seed storage");

        let body = multipart_body("big.txt", b"tiny");
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::CONTENT_LENGTH, 200 * 1024 * 1024u64)
            .body(AxumBody::from(body))
            .expect("request");
        let headers = request.headers().clone();
        let multipart = Multipart::from_request(request, &()).await.expect("multipart");

        let result = handle_upload(&storage, &usage, &make_limits(), &headers, multipart).await;
        assert!(matches!(result, Err(UploadReject::TooLarge)));
    }

    #[tokio::test]
    async fn unwritable_storage_surfaces_a_storage_error() {
        let temp = tempdir().expect("tempdir");
        // Point the store at a regular file; temp-file creation under it fails.
        let bogus_root = temp.path().join("not-a-dir");
        std::fs::write(&bogus_root, b"flat").expect("seed file");
        let storage = Arc::new(Storage::new(bogus_root.clone()));
        let usage = Arc::new(UsageMeter::new(temp.path().to_path_buf(), 1024 * 1024));

        let (headers, multipart) = make_multipart(multipart_body("doc.txt", b"data")).await;
        let result = handle_upload(&storage, &usage, &make_limits(), &headers, multipart).await;

        assert!(matches!(result, Err(UploadReject::Storage(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uploads_each_count_once() {
        let (_temp, storage, usage) = make_state(1024 * 1024);
        let metrics = Arc::new(AppMetrics::new().expect("metrics"));
        let limits = make_limits();

        let mut handles = Vec::new();
        for index in 0..4 {
            let storage = storage.clone();
            let usage = usage.clone();
            let metrics = metrics.clone();
            let limits = limits.clone();
            handles.push(tokio::spawn(async move {
                let filename = format!("file-{index}.txt");
                let (headers, multipart) =
                    make_multipart(multipart_body(&filename, b"payload")).await;
                let response = upload_file(
                    Extension(storage),
                    Extension(usage),
                    Extension(metrics),
                    Extension(limits),
                    CookieJar::new(),
                    headers,
                    multipart,
                )
                .await;
                assert!(response.status().is_redirection());
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(metrics.upload_total.get(), 4);
        assert_eq!(metrics.upload_failed.get(), 0);
        for index in 0..4 {
            let path = storage.root_path().join(format!("file-{index}.txt"));
            assert!(fs::metadata(&path).await.is_ok(), "missing file-{index}");
        }
    }

    #[tokio::test]
    async fn storage_failure_maps_to_500_with_counters() {
        let temp = tempdir().expect("tempdir");
        let bogus_root = temp.path().join("not-a-dir");
        std::fs::write(&bogus_root, b"flat").expect("seed file");
        let storage = Arc::new(Storage::new(bogus_root));
        let usage = Arc::new(UsageMeter::new(temp.path().to_path_buf(), 1024 * 1024));
        let metrics = Arc::new(AppMetrics::new().expect("metrics"));

        let (headers, multipart) = make_multipart(multipart_body("doc.txt", b"data")).await;
        let response = upload_file(
            Extension(storage),
            Extension(usage),
            Extension(metrics.clone()),
            Extension(make_limits()),
            CookieJar::new(),
            headers,
            multipart,
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(metrics.upload_failed.get(), 1);
        assert_eq!(metrics.error_500_total.get(), 1);
        assert_eq!(
            response.extensions().get::<MetricStatus>().map(|m| m.0),
            Some(500)
        );
    }

    #[tokio::test]
    async fn quota_rejection_flashes_and_counts_failure() {
        let (_temp, storage, usage) = make_state(1000);
        fs::write(storage.root_path().join("existing.bin"), vec![0u8; 900])
            .await
            .expect("seed storage");
        let metrics = Arc::new(AppMetrics::new().expect("metrics"));

        let (headers, multipart) = make_multipart(multipart_body("more.txt", b"data")).await;
        let response = upload_file(
            Extension(storage),
            Extension(usage),
            Extension(metrics.clone()),
            Extension(make_limits()),
            CookieJar::new(),
            headers,
            multipart,
        )
        .await;

        assert!(response.status().is_redirection());
        assert_eq!(metrics.upload_failed.get(), 1);
        assert_eq!(metrics.error_500_total.get(), 0);
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .expect("flash cookie");
        assert!(set_cookie.contains("Disk space is running low"));
    }

    #[test]
    fn allowed_file_matches_case_insensitively() {
        assert!(allowed_file("photo.PNG"));
        assert!(allowed_file("scan.pdf"));
        assert!(allowed_file("archive.tar.gif"));
        assert!(!allowed_file("no-extension"));
        assert!(!allowed_file("trailing-dot."));
        assert!(!allowed_file("script.sh"));
        assert!(!allowed_file(".gitignore"));
    }

    #[test]
    fn declared_size_reads_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, "42".parse().unwrap());
        assert_eq!(declared_size(&headers), Some(42));
        assert_eq!(declared_size(&HeaderMap::new()), None);
    }
}
