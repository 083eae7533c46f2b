use super::{MediaStore, RemoteMedia};
use crate::image::detect_format;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const UPLOAD_PATH: &str = "/cgi-bin/material/add_material";

/// Error codes the platform documents as "try again later".
const BUSY_ERRCODE: i64 = -1;
const RATE_LIMITED_ERRCODE: i64 = 45009;

#[derive(Debug, Deserialize)]
struct MaterialResponse {
    media_id: Option<String>,
    url: Option<String>,
    #[serde(default)]
    errcode: i64,
    errmsg: Option<String>,
}

/// Permanent-material upload endpoint of a publishing platform.
///
/// The access token is obtained and refreshed elsewhere; this client only
/// attaches it to each request.
pub struct HttpMediaStore {
    client: Client,
    base_url: String,
    access_token: String,
}

impl HttpMediaStore {
    pub fn new(base_url: String, access_token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn status_error(status: StatusCode, body: &str) -> Error {
        let message = format!("media API error (status {}): {}", status, body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Error::UploadTransient(message)
        } else {
            Error::UploadRejected(message)
        }
    }

    fn errcode_error(errcode: i64, errmsg: Option<String>) -> Error {
        let message = format!(
            "media API errcode {}: {}",
            errcode,
            errmsg.unwrap_or_default()
        );
        match errcode {
            BUSY_ERRCODE | RATE_LIMITED_ERRCODE => Error::UploadTransient(message),
            _ => Error::UploadRejected(message),
        }
    }
}

#[async_trait]
impl MediaStore for HttpMediaStore {
    async fn upload(&self, path: &Path) -> Result<RemoteMedia> {
        let data = tokio::fs::read(path).await?;
        let format = detect_format(&data).ok_or_else(|| {
            Error::UploadRejected(format!("{} is not a supported image", path.display()))
        })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("image.{}", format.extension()));

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(format.mime())?;
        let form = Form::new().part("media", part);

        let url = format!("{}{}", self.base_url, UPLOAD_PATH);
        let response = self
            .client
            .post(&url)
            .query(&[("access_token", self.access_token.as_str()), ("type", "image")])
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send upload request: {}", e);
                e
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            tracing::error!("Media API error (status {}): {}", status, body);
            return Err(Self::status_error(status, &body));
        }

        let parsed: MaterialResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::error!("Failed to parse media API response: {}\nBody: {}", e, body);
            Error::UploadRejected(format!("Failed to parse media API response: {}", e))
        })?;

        if parsed.errcode != 0 {
            return Err(Self::errcode_error(parsed.errcode, parsed.errmsg));
        }

        match (parsed.media_id, parsed.url) {
            (Some(media_id), Some(url)) if !media_id.is_empty() => {
                tracing::info!("Uploaded {} as media {}", path.display(), media_id);
                Ok(RemoteMedia { media_id, url })
            }
            _ => Err(Error::UploadRejected(
                "media API response is missing media_id or url".to_string(),
            )),
        }
    }
}
