//! Request body decoding: JSON bodies and `multipart/form-data` uploads.

use futures::stream;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use spin_sdk::http::Request;
use tracing::debug;

use crate::core::errors::{ApiError, ApiResult};
use crate::core::helpers::header_str;

/// An image part taken from a multipart body, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Fields accepted by post create/update, from JSON or multipart.
#[derive(Debug, Default)]
pub struct PostForm {
    pub user_id: Option<String>,
    pub desc: Option<String>,
    pub image: Option<UploadedImage>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PostJson {
    user_id: Option<String>,
    desc: Option<String>,
}

/// Decodes a JSON body; an empty body decodes as `{}`.
pub fn parse_json<T: DeserializeOwned>(req: &Request) -> ApiResult<T> {
    let body = req.body();
    let body: &[u8] = if body.is_empty() { b"{}" } else { body };
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "rejecting malformed JSON body");
        ApiError::BadRequest("Malformed JSON body".to_string())
    })
}

pub fn parse_post_form(req: &Request, max_upload_bytes: usize) -> ApiResult<PostForm> {
    let content_type = header_str(req, "Content-Type").unwrap_or_default();
    if !content_type.starts_with("multipart/form-data") {
        let json: PostJson = parse_json(req)?;
        return Ok(PostForm {
            user_id: json.user_id,
            desc: json.desc,
            image: None,
        });
    }

    let boundary = multer::parse_boundary(content_type)
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))?;
    futures::executor::block_on(read_multipart(req.body().to_vec(), boundary, max_upload_bytes))
}

async fn read_multipart(body: Vec<u8>, boundary: String, max_upload_bytes: usize) -> ApiResult<PostForm> {
    let body_stream = stream::iter(vec![Ok::<Vec<u8>, std::io::Error>(body)]);
    let mut multipart = multer::Multipart::new(body_stream, boundary);
    let mut form = PostForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                if data.is_empty() {
                    continue;
                }
                if data.len() > max_upload_bytes {
                    return Err(ApiError::BadRequest(format!(
                        "Image too large (max {} bytes)",
                        max_upload_bytes
                    )));
                }
                form.image = Some(UploadedImage {
                    file_name,
                    data: data.to_vec(),
                });
            }
            "userId" => form.user_id = Some(field.text().await.map_err(multipart_error)?),
            "desc" => form.desc = Some(field.text().await.map_err(multipart_error)?),
            other => debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    Ok(form)
}

fn multipart_error(err: multer::Error) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart body: {}", err))
}
