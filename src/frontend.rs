//! Embedded upload form page.

use axum::body::Body as AxumBody;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets"]
struct FormAssets;

/// `GET /`: serve the upload form. Flash messages are rendered client-side
/// from the flash cookie and cleared after display.
pub async fn upload_form() -> Response {
    let Some(asset) = FormAssets::get("upload.html") else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upload form asset missing").into_response();
    };
    let mime = mime_guess::from_path("upload.html").first_or_octet_stream();
    (
        [(header::CONTENT_TYPE, mime.essence_str())],
        AxumBody::from(asset.data.into_owned()),
    )
        .into_response()
}
