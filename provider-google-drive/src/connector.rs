//! Google Drive API connector implementation
//!
//! Implements [`CloudBackend`] for Google Drive API v3.

use bridge_traits::http::{HttpMethod, HttpRequest};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use core_auth::{AuthConfig, OAuthEndpoints};
use core_request::{CloudBackend, EitherError, FileType, Item, PageData, Range};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::GoogleDriveError;
use crate::types::{DriveFile, FileMetadata, FilesListResponse, FOLDER_MIME_TYPE};

/// Google Drive API base URL
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Google Drive upload endpoint
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Maximum results per page (Google Drive API limit)
const MAX_PAGE_SIZE: u32 = 1000;

/// Fields to request for file resources
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents,trashed,thumbnailLink";

const MULTIPART_BOUNDARY: &str = "cloudstore_multipart_boundary";

/// Google Drive API connector
///
/// Shapes Drive v3 requests and parses its responses; sending, retries and
/// token handling happen in [`core_request::CloudProvider`].
///
/// # Example
///
/// ```ignore
/// use provider_google_drive::GoogleDriveConnector;
/// use core_request::CloudProvider;
///
/// let provider = CloudProvider::new(Box::new(GoogleDriveConnector::new()), config)?;
/// let items = provider.list_directory(provider.root_directory()).result().await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct GoogleDriveConnector;

impl GoogleDriveConnector {
    pub fn new() -> Self {
        Self
    }

    /// Parse RFC 3339 timestamp
    fn parse_timestamp(rfc3339: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Convert DriveFile to Item
    fn convert_file(drive_file: DriveFile) -> Item {
        let file_type = if drive_file.mime_type == FOLDER_MIME_TYPE {
            FileType::Directory
        } else if drive_file.mime_type.is_empty() {
            FileType::Unknown
        } else {
            FileType::File
        };

        Item {
            id: drive_file.id,
            filename: drive_file.name,
            size: drive_file.size.and_then(|s| s.parse().ok()),
            file_type,
            mime_type: Some(drive_file.mime_type).filter(|m| !m.is_empty()),
            modified: drive_file
                .modified_time
                .as_deref()
                .and_then(Self::parse_timestamp),
            parents: drive_file.parents,
            thumbnail_url: drive_file.thumbnail_link,
        }
    }

    fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, GoogleDriveError> {
        serde_json::from_slice(body).map_err(|e| GoogleDriveError::ParseError(e.to_string()))
    }

    fn parse_item(body: &[u8]) -> EitherError<Item> {
        Ok(Self::convert_file(Self::parse(body)?))
    }

    fn file_url(id: &str) -> String {
        format!("{}/files/{}", DRIVE_API_BASE, urlencoding::encode(id))
    }

    fn json_request(
        method: HttpMethod,
        url: String,
        metadata: &FileMetadata,
    ) -> EitherError<HttpRequest> {
        let request = HttpRequest::new(method, url)
            .json(metadata)
            .map_err(GoogleDriveError::from)?;
        Ok(request)
    }

    /// `multipart/related` body carrying the metadata and the content.
    fn multipart_body(metadata: &FileMetadata, content: &[u8]) -> Result<Bytes, GoogleDriveError> {
        let metadata = serde_json::to_vec(metadata)
            .map_err(|e| GoogleDriveError::InvalidRequest(e.to_string()))?;

        let mut body = BytesMut::with_capacity(metadata.len() + content.len() + 256);
        body.put_slice(format!("--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.put_slice(&metadata);
        body.put_slice(format!("\r\n--{}\r\n", MULTIPART_BOUNDARY).as_bytes());
        body.put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.put_slice(content);
        body.put_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
        Ok(body.freeze())
    }
}

impl CloudBackend for GoogleDriveConnector {
    fn name(&self) -> &'static str {
        "google"
    }

    fn oauth_endpoints(&self) -> OAuthEndpoints {
        OAuthEndpoints::new(AUTH_URL, TOKEN_URL)
            .with_scopes([DRIVE_SCOPE])
            .with_auth_param("access_type", "offline")
            .with_auth_param("prompt", "consent")
    }

    fn default_auth_config(&self) -> AuthConfig {
        AuthConfig::new("", None)
    }

    fn root_directory(&self) -> Item {
        Item::new("root", "/", FileType::Directory)
    }

    fn get_item_data_request(&self, id: &str) -> EitherError<HttpRequest> {
        Ok(HttpRequest::new(
            HttpMethod::Get,
            format!("{}?fields={}", Self::file_url(id), FILE_FIELDS),
        ))
    }

    fn get_item_data_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }

    fn list_directory_request(
        &self,
        directory: &Item,
        page_token: Option<&str>,
    ) -> EitherError<HttpRequest> {
        let query = format!("'{}' in parents and trashed=false", directory.id);
        let mut url = format!(
            "{}/files?q={}&pageSize={}&fields=nextPageToken,files({})",
            DRIVE_API_BASE,
            urlencoding::encode(&query),
            MAX_PAGE_SIZE,
            FILE_FIELDS
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        Ok(HttpRequest::new(HttpMethod::Get, url))
    }

    fn list_directory_response(&self, directory: &Item, body: &[u8]) -> EitherError<PageData> {
        let response: FilesListResponse = Self::parse(body)?;
        debug!(
            directory = %directory.id,
            count = response.files.len(),
            has_more = response.next_page_token.is_some(),
            "Parsed Drive listing"
        );
        Ok(PageData {
            items: response
                .files
                .into_iter()
                .filter(|file| !file.trashed)
                .map(Self::convert_file)
                .collect(),
            next_token: response.next_page_token,
        })
    }

    fn download_file_request(&self, item: &Item, range: Range) -> EitherError<HttpRequest> {
        let request = HttpRequest::new(
            HttpMethod::Get,
            format!("{}?alt=media", Self::file_url(&item.id)),
        );
        Ok(match range.header_value() {
            Some(value) => request.header("Range", value),
            None => request,
        })
    }

    fn upload_file_request(
        &self,
        directory: &Item,
        filename: &str,
        content: Bytes,
    ) -> EitherError<HttpRequest> {
        let metadata = FileMetadata {
            name: Some(filename.to_string()),
            parents: vec![directory.id.clone()],
            ..FileMetadata::default()
        };
        let body = Self::multipart_body(&metadata, &content)?;
        Ok(HttpRequest::new(
            HttpMethod::Post,
            format!(
                "{}/files?uploadType=multipart&fields={}",
                DRIVE_UPLOAD_BASE, FILE_FIELDS
            ),
        )
        .header(
            "Content-Type",
            format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
        )
        .body(body))
    }

    fn upload_file_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }

    fn create_directory_request(&self, parent: &Item, name: &str) -> EitherError<HttpRequest> {
        let metadata = FileMetadata {
            name: Some(name.to_string()),
            mime_type: Some(FOLDER_MIME_TYPE.to_string()),
            parents: vec![parent.id.clone()],
        };
        Self::json_request(
            HttpMethod::Post,
            format!("{}/files?fields={}", DRIVE_API_BASE, FILE_FIELDS),
            &metadata,
        )
    }

    fn create_directory_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }

    fn delete_item_request(&self, item: &Item) -> EitherError<HttpRequest> {
        Ok(HttpRequest::new(HttpMethod::Delete, Self::file_url(&item.id)))
    }

    fn move_item_request(&self, item: &Item, destination: &Item) -> EitherError<HttpRequest> {
        let url = format!(
            "{}?addParents={}&removeParents={}&fields={}",
            Self::file_url(&item.id),
            urlencoding::encode(&destination.id),
            urlencoding::encode(&item.parents.join(",")),
            FILE_FIELDS
        );
        Self::json_request(HttpMethod::Patch, url, &FileMetadata::default())
    }

    fn move_item_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }

    fn rename_item_request(&self, item: &Item, name: &str) -> EitherError<HttpRequest> {
        let metadata = FileMetadata {
            name: Some(name.to_string()),
            ..FileMetadata::default()
        };
        Self::json_request(
            HttpMethod::Patch,
            format!("{}?fields={}", Self::file_url(&item.id), FILE_FIELDS),
            &metadata,
        )
    }

    fn rename_item_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }
}
