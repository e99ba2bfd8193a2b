use std::sync::Arc;

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::middleware::auth::{Identity, RequireUser};
use crate::store::postgres::{ImageMetaRow, NewImage};
use crate::AppState;

/// Transport-level body cap, comfortably above the base64 inflation of the
/// default 2 MiB image cap. The decoded-size check below is the real limit.
pub const BODY_LIMIT: usize = 10 * 1024 * 1024;

// -- Response DTO --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub id: Uuid,
    /// Decoded byte length.
    pub size: i64,
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// Owning token's public id; only shown to administrators.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,
}

fn image_url(base_url: &str, id: Uuid) -> String {
    format!("{}/api/images/{}.png", base_url.trim_end_matches('/'), id)
}

fn image_response(base_url: &str, meta: &ImageMetaRow, include_owner: bool) -> ImageResponse {
    ImageResponse {
        id: meta.public_id,
        size: meta.size,
        url: image_url(base_url, meta.public_id),
        created_at: meta.created_at,
        token_id: include_owner.then_some(meta.owner_id),
    }
}

/// Fetch URLs carry a `.png` suffix; everything else is not an image path.
fn parse_png_path(raw: &str) -> Option<Uuid> {
    let id = raw.strip_suffix(".png")?;
    Uuid::parse_str(id).ok()
}

fn decode_payload(data: &str) -> Result<Vec<u8>, AppError> {
    BASE64.decode(data).map_err(|_| {
        AppError::Unprocessable(
            "The \"data\" property must contain valid base64-encoded image data.".to_string(),
        )
    })
}

// -- Handlers --

/// GET /api/images - list image metadata, newest first. Users see their own
/// uploads; administrators see everything plus the owning token id.
pub async fn list_images(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<ImageResponse>>, AppError> {
    let owner = match &identity {
        Identity::Admin => None,
        Identity::User(token) => Some(token.id),
    };

    let images = state.db.list_images(owner).await?;
    let include_owner = identity.is_admin();

    Ok(Json(
        images
            .iter()
            .map(|meta| image_response(&state.config.base_url, meta, include_owner))
            .collect(),
    ))
}

/// POST /api/images - upload an image. Token holders only.
///
/// `application/json` bodies carry base64 text in a `data` property;
/// `multipart/form-data` bodies carry the raw file in an `image` field.
/// After the insert the owner is trimmed back to the configured quota.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    RequireUser(token): RequireUser,
    req: Request,
) -> Result<(StatusCode, Json<ImageResponse>), AppError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (data, size) = if content_type.starts_with("application/json") {
        read_json_upload(req, state.config.max_image_size).await?
    } else if content_type.starts_with("multipart/form-data") {
        read_multipart_upload(req, &state, state.config.max_image_size).await?
    } else {
        return Err(AppError::UnsupportedMediaType);
    };

    let image = NewImage {
        public_id: Uuid::new_v4(),
        data,
        size: size as i64,
        created_at: Utc::now(),
        token_id: token.id,
    };
    state.db.insert_image(&image).await?;

    // The purge runs after the insert so the fresh upload takes part in the
    // recency ordering and only older images are evicted. The insert is not
    // rolled back when the purge fails.
    match state
        .db
        .purge_images(token.id, state.config.image_quota)
        .await
    {
        Ok(purged) if purged > 0 => {
            tracing::debug!(token = %token.public_id, purged, "quota purge evicted images");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(token = %token.public_id, "quota purge failed: {}", e);
            return Err(AppError::Conflict("Could not purge images.".to_string()));
        }
    }

    let meta = ImageMetaRow {
        public_id: image.public_id,
        size: image.size,
        created_at: image.created_at,
        owner_id: token.public_id,
    };

    Ok((
        StatusCode::CREATED,
        Json(image_response(&state.config.base_url, &meta, false)),
    ))
}

/// Pull base64 data out of a JSON body and validate it decodes within the cap.
async fn read_json_upload(req: Request, max_size: usize) -> Result<(String, usize), AppError> {
    let bytes = axum::body::to_bytes(req.into_body(), BODY_LIMIT)
        .await
        .map_err(|_| AppError::PayloadTooLarge)?;

    let body: Value = serde_json::from_slice(&bytes).map_err(|_| {
        AppError::Unprocessable("The request body must be valid JSON.".to_string())
    })?;

    let data = body
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            AppError::Unprocessable(
                "The \"data\" property must contain the base64-encoded image data.".to_string(),
            )
        })?;

    let decoded = decode_payload(data)?;
    if decoded.len() > max_size {
        return Err(AppError::PayloadTooLarge);
    }

    Ok((data.to_string(), decoded.len()))
}

/// Pull the `image` file field out of a multipart body and store it base64-encoded.
async fn read_multipart_upload(
    req: Request,
    state: &Arc<AppState>,
    max_size: usize,
) -> Result<(String, usize), AppError> {
    let mut multipart = Multipart::from_request(req, state).await.map_err(|_| {
        AppError::Unprocessable("The request body is not valid multipart form data.".to_string())
    })?;

    while let Some(field) = multipart.next_field().await.map_err(|_| {
        AppError::Unprocessable("The request body is not valid multipart form data.".to_string())
    })? {
        if field.name() != Some("image") {
            continue;
        }

        let bytes = field.bytes().await.map_err(|_| AppError::PayloadTooLarge)?;
        if bytes.len() > max_size {
            return Err(AppError::PayloadTooLarge);
        }

        return Ok((BASE64.encode(&bytes), bytes.len()));
    }

    Err(AppError::Unprocessable(
        "The \"image\" field is not set.".to_string(),
    ))
}

/// GET /api/images/:id.png - fetch raw image bytes. Public, no auth.
pub async fn fetch_image(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<Response, AppError> {
    let public_id = parse_png_path(&file)
        .ok_or_else(|| AppError::NotFound("No image found with this id.".to_string()))?;

    let image = state
        .db
        .get_image(public_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No image found with this id.".to_string()))?;

    let bytes = BASE64
        .decode(&image.data)
        .map_err(|e| anyhow::anyhow!("stored image {} is not valid base64: {e}", public_id))?;

    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

/// DELETE /api/images/:id - delete an image. Users may delete their own
/// uploads; administrators may delete any image.
pub async fn delete_image(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let public_id = Uuid::parse_str(&id)
        .map_err(|_| AppError::NotFound("No image found with this id.".to_string()))?;

    let owner = match &identity {
        Identity::Admin => None,
        Identity::User(token) => Some(token.id),
    };

    if state.db.delete_image(public_id, owner).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("No image found with this id.".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn json_request(body: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/api/images")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn json_uploads_require_the_data_property() {
        let err = read_json_upload(json_request(r#"{"payload": "x"}"#), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unprocessable(_)));

        let err = read_json_upload(json_request("not json"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unprocessable(_)));
    }

    #[tokio::test]
    async fn json_uploads_report_the_decoded_size() {
        let body = format!(r#"{{"data": "{}"}}"#, BASE64.encode(b"hi"));
        let (data, size) = read_json_upload(json_request(&body), 1024).await.unwrap();
        assert_eq!(data, BASE64.encode(b"hi"));
        assert_eq!(size, 2);
    }

    #[tokio::test]
    async fn json_uploads_over_the_cap_are_rejected() {
        let body = format!(r#"{{"data": "{}"}}"#, BASE64.encode(b"three"));
        let err = read_json_upload(json_request(&body), 4).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge));
    }

    #[test]
    fn image_urls_join_cleanly_with_and_without_trailing_slash() {
        let id = Uuid::parse_str("35667548-c734-4650-86c4-1fc474db1aec").unwrap();
        assert_eq!(
            image_url("http://localhost:3000", id),
            "http://localhost:3000/api/images/35667548-c734-4650-86c4-1fc474db1aec.png"
        );
        assert_eq!(
            image_url("https://img.example.com/", id),
            "https://img.example.com/api/images/35667548-c734-4650-86c4-1fc474db1aec.png"
        );
    }

    #[test]
    fn png_paths_require_suffix_and_a_valid_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_png_path(&format!("{id}.png")), Some(id));
        assert_eq!(parse_png_path(&id.to_string()), None);
        assert_eq!(parse_png_path("not-a-uuid.png"), None);
        assert_eq!(parse_png_path(".png"), None);
    }

    #[test]
    fn payload_size_is_the_decoded_length() {
        // "hello" is five bytes; its base64 form is eight characters.
        let data = BASE64.encode(b"hello");
        assert_eq!(data.len(), 8);
        assert_eq!(decode_payload(&data).unwrap().len(), 5);
    }

    #[test]
    fn garbage_payloads_are_rejected() {
        assert!(decode_payload("not base64 at all!!").is_err());
    }

    #[test]
    fn owner_is_only_serialized_for_admins() {
        let meta = ImageMetaRow {
            public_id: Uuid::new_v4(),
            size: 5,
            created_at: Utc::now(),
            owner_id: Uuid::new_v4(),
        };

        let user_view = serde_json::to_value(image_response("http://x", &meta, false)).unwrap();
        assert!(user_view.get("tokenId").is_none());

        let admin_view = serde_json::to_value(image_response("http://x", &meta, true)).unwrap();
        assert_eq!(
            admin_view["tokenId"],
            serde_json::json!(meta.owner_id.to_string())
        );
    }
}
