use std::io;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::{AUTHORIZATION, LOCATION, RETRY_AFTER};
use reqwest::{Body, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,modifiedTime)";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const ROOT_FOLDER_ID: &str = "root";
pub const DEFAULT_PAGE_SIZE: u32 = 1000;

/// Streamed file content, in either direction.
pub type ByteStream = BoxStream<'static, Result<Bytes, DriveError>>;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after_secs: Option<u64>,
    },
    #[error("upload session response has no Location header")]
    MissingUploadSession,
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    pub async fn list_folder_page(
        &self,
        folder_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(
                "q",
                &format!(
                    "'{}' in parents and trashed = false",
                    escape_query_value(folder_id)
                ),
            );
            query.append_pair("fields", LIST_FIELDS);
            query.append_pair("pageSize", &page_size.to_string());
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Follows `nextPageToken` until the listing is exhausted.
    pub async fn list_folder_all(
        &self,
        folder_id: &str,
        page_size: u32,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let page_size = page_size.max(1);
        let mut page_token: Option<String> = None;
        let mut files = Vec::new();
        loop {
            let page = self
                .list_folder_page(folder_id, page_size, page_token.as_deref())
                .await?;
            files.extend(page.files);
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(files)
    }

    /// Returns the first non-trashed folder named `name` directly under `parent_id`.
    pub async fn find_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<DriveFile>, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair(
                "q",
                &format!(
                    "name = '{}' and mimeType = '{}' and trashed = false and '{}' in parents",
                    escape_query_value(name),
                    FOLDER_MIME_TYPE,
                    escape_query_value(parent_id)
                ),
            )
            .append_pair("fields", "files(id,name)")
            .append_pair("spaces", "drive");
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        let list: FileList = Self::handle_response(response).await?;
        Ok(list.files.into_iter().next())
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut().append_pair("fields", "id,name");
        let metadata = FileMetadata {
            name: Some(name),
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: Some(vec![parent_id]),
            modified_time: None,
        };
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .json(&metadata)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Opens a resumable upload session for a new file and returns the session URL.
    pub async fn start_create_upload(
        &self,
        parent_id: &str,
        name: &str,
        modified_time: &str,
    ) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", "id,name");
        let metadata = FileMetadata {
            name: Some(name),
            mime_type: None,
            parents: Some(vec![parent_id]),
            modified_time: Some(modified_time),
        };
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .json(&metadata)
            .send()
            .await?;
        Self::upload_session(response).await
    }

    /// Opens a resumable upload session replacing the content of `file_id`.
    pub async fn start_update_upload(
        &self,
        file_id: &str,
        modified_time: &str,
    ) -> Result<Url, DriveError> {
        let mut url = self.endpoint(&format!("/upload/drive/v3/files/{file_id}"))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", "id,name");
        let metadata = FileMetadata {
            name: None,
            mime_type: None,
            parents: None,
            modified_time: Some(modified_time),
        };
        let response = self
            .http
            .patch(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .json(&metadata)
            .send()
            .await?;
        Self::upload_session(response).await
    }

    pub async fn upload_content(
        &self,
        session: Url,
        body: impl Into<Body>,
    ) -> Result<DriveFile, DriveError> {
        let response = self
            .http
            .put(session)
            .header(AUTHORIZATION, self.auth_header_value())
            .body(body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        modified_time: &str,
        content: ByteStream,
    ) -> Result<DriveFile, DriveError> {
        let session = self
            .start_create_upload(parent_id, name, modified_time)
            .await?;
        self.upload_content(session, Body::wrap_stream(content))
            .await
    }

    pub async fn update_file(
        &self,
        file_id: &str,
        modified_time: &str,
        content: ByteStream,
    ) -> Result<DriveFile, DriveError> {
        let session = self.start_update_upload(file_id, modified_time).await?;
        self.upload_content(session, Body::wrap_stream(content))
            .await
    }

    pub async fn get_file_content(&self, file_id: &str) -> Result<ByteStream, DriveError> {
        let mut url = self.endpoint(&format!("/drive/v3/files/{file_id}"))?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, self.auth_header_value())
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.bytes_stream().map_err(DriveError::from).boxed())
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn upload_session(response: Response) -> Result<Url, DriveError> {
        let response = Self::check_status(response).await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(DriveError::MissingUploadSession)?;
        Ok(Url::parse(location)?)
    }

    async fn check_status(response: Response) -> Result<Response, DriveError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Err(DriveError::Api {
            status,
            body,
            retry_after_secs,
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: Response,
    ) -> Result<T, DriveError> {
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            DriveError::Api {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

// Retry-After is either delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
            .as_secs(),
    )
}

/// Escapes a literal for use inside a single-quoted Drive query string.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parents: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    modified_time: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE)
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_query_value("Bob's notes"), "Bob\\'s notes");
        assert_eq!(escape_query_value("a\\b"), "a\\\\b");
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(
            classify_api_status(StatusCode::UNAUTHORIZED),
            ApiErrorClass::Auth
        );
        assert_eq!(
            classify_api_status(StatusCode::TOO_MANY_REQUESTS),
            ApiErrorClass::RateLimit
        );
        assert_eq!(
            classify_api_status(StatusCode::SERVICE_UNAVAILABLE),
            ApiErrorClass::Transient
        );
        assert_eq!(
            classify_api_status(StatusCode::NOT_FOUND),
            ApiErrorClass::Permanent
        );
    }

    #[test]
    fn parses_retry_after_seconds_and_past_dates() {
        assert_eq!(parse_retry_after("7"), Some(7));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), Some(0));
        assert_eq!(parse_retry_after("soon"), None);
    }
}
