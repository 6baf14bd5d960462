//! Image blobs for posts, kept in the key/value store and served publicly
//! under [`UPLOADS_PATH_PREFIX`].

use mime_guess::from_path;
use spin_sdk::http::Response;
use tracing::{info, warn};

use crate::config::*;
use crate::core::db::KvStore;
use crate::core::errors::{ApiError, ApiResult, HandlerResult};
use crate::core::form::UploadedImage;
use crate::core::helpers::{new_id, now};

fn image_extension(file_name: &str) -> ApiResult<String> {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ApiError::BadRequest(format!(
            "Unsupported image type (allowed: {})",
            ALLOWED_IMAGE_EXTENSIONS.join(", ")
        )))
    }
}

/// Stores the image and returns its public path.
pub fn store_image(store: &dyn KvStore, image: &UploadedImage) -> ApiResult<String> {
    let ext = image_extension(&image.file_name)?;
    let file_name = format!("{}-{}.{}", now().timestamp_millis(), new_id(), ext);

    store.set(&upload_key(&file_name), &image.data)?;

    info!(file_name = %file_name, bytes = image.data.len(), "stored upload");
    Ok(format!("{}{}", UPLOADS_PATH_PREFIX, file_name))
}

/// Deletes the blob behind a public path. Paths outside the uploads prefix
/// are ignored.
pub fn delete_image(store: &dyn KvStore, public_path: &str) -> ApiResult<()> {
    match public_path.strip_prefix(UPLOADS_PATH_PREFIX) {
        Some(file_name) if !file_name.is_empty() => {
            store.delete(&upload_key(file_name))?;
            info!(file_name, "deleted upload");
        }
        _ => warn!(public_path, "not an upload path, nothing to delete"),
    }
    Ok(())
}

pub fn serve_upload(store: &dyn KvStore, file_name: &str) -> HandlerResult {
    if file_name.is_empty() || file_name.contains('/') {
        return Err(ApiError::not_found("File"));
    }
    let data = store
        .get(&upload_key(file_name))?
        .ok_or_else(|| ApiError::not_found("File"))?;

    let mime = from_path(file_name).first_or_octet_stream();

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", mime.as_ref())
        .body(data)
        .build())
}
