//! Microsoft Graph connector for OneDrive.

use bridge_traits::http::{HttpMethod, HttpRequest};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_auth::{AuthConfig, OAuthEndpoints};
use core_request::{CloudBackend, EitherError, FileType, Item, PageData, Range};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::OneDriveError;
use crate::types::{ChildrenResponse, DriveItem, FolderFacet, ItemPatch, ItemReference};

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0/me/drive";

const AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const SCOPES: [&str; 2] = ["offline_access", "Files.ReadWrite.All"];

/// Graph caps `$top` at 999 for drive listings
const PAGE_SIZE: u32 = 999;

const ITEM_SELECT: &str = "id,name,size,lastModifiedDateTime,file,folder,parentReference";

#[derive(Debug, Clone, Default)]
pub struct OneDriveConnector;

impl OneDriveConnector {
    pub fn new() -> Self {
        Self
    }

    fn convert_item(drive_item: DriveItem) -> Item {
        let file_type = if drive_item.folder.is_some() {
            FileType::Directory
        } else if drive_item.file.is_some() {
            FileType::File
        } else {
            FileType::Unknown
        };

        Item {
            id: drive_item.id,
            filename: drive_item.name,
            size: drive_item.size.filter(|_| file_type != FileType::Directory),
            file_type,
            mime_type: drive_item.file.and_then(|file| file.mime_type),
            modified: drive_item
                .last_modified_date_time
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            parents: drive_item
                .parent_reference
                .and_then(|parent| parent.id)
                .into_iter()
                .collect(),
            thumbnail_url: None,
        }
    }

    fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, OneDriveError> {
        serde_json::from_slice(body).map_err(|e| OneDriveError::ParseError(e.to_string()))
    }

    fn parse_item(body: &[u8]) -> EitherError<Item> {
        Ok(Self::convert_item(Self::parse(body)?))
    }

    fn item_url(id: &str) -> String {
        format!("{}/items/{}", GRAPH_API_BASE, urlencoding::encode(id))
    }

    fn patch(method: HttpMethod, url: String, patch: &ItemPatch) -> EitherError<HttpRequest> {
        let request = HttpRequest::new(method, url)
            .json(patch)
            .map_err(OneDriveError::from)?;
        Ok(request)
    }
}

impl CloudBackend for OneDriveConnector {
    fn name(&self) -> &'static str {
        "onedrive"
    }

    fn oauth_endpoints(&self) -> OAuthEndpoints {
        OAuthEndpoints::new(AUTH_URL, TOKEN_URL).with_scopes(SCOPES)
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
            format!("{}?$select={}", Self::item_url(id), ITEM_SELECT),
        ))
    }

    fn get_item_data_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }

    /// The page token is the `@odata.nextLink` of the previous page.
    fn list_directory_request(
        &self,
        directory: &Item,
        page_token: Option<&str>,
    ) -> EitherError<HttpRequest> {
        let url = match page_token {
            Some(next_link) => {
                if !next_link.starts_with(GRAPH_API_BASE) {
                    return Err(OneDriveError::InvalidRequest(format!(
                        "Unexpected next page link: {}",
                        next_link
                    ))
                    .into());
                }
                next_link.to_string()
            }
            None => format!(
                "{}/children?$top={}&$select={}",
                Self::item_url(&directory.id),
                PAGE_SIZE,
                ITEM_SELECT
            ),
        };
        Ok(HttpRequest::new(HttpMethod::Get, url))
    }

    fn list_directory_response(&self, directory: &Item, body: &[u8]) -> EitherError<PageData> {
        let response: ChildrenResponse = Self::parse(body)?;
        debug!(
            directory = %directory.id,
            count = response.value.len(),
            has_more = response.next_link.is_some(),
            "Parsed OneDrive listing"
        );
        Ok(PageData {
            items: response.value.into_iter().map(Self::convert_item).collect(),
            next_token: response.next_link,
        })
    }

    fn download_file_request(&self, item: &Item, range: Range) -> EitherError<HttpRequest> {
        let request = HttpRequest::new(
            HttpMethod::Get,
            format!("{}/content", Self::item_url(&item.id)),
        );
        Ok(match range.header_value() {
            Some(value) => request.header("Range", value),
            None => request,
        })
    }

    fn thumbnail_request(&self, item: &Item) -> EitherError<HttpRequest> {
        Ok(HttpRequest::new(
            HttpMethod::Get,
            format!("{}/thumbnails/0/medium/content", Self::item_url(&item.id)),
        ))
    }

    fn upload_file_request(
        &self,
        directory: &Item,
        filename: &str,
        content: Bytes,
    ) -> EitherError<HttpRequest> {
        Ok(HttpRequest::new(
            HttpMethod::Put,
            format!(
                "{}:/{}:/content",
                Self::item_url(&directory.id),
                urlencoding::encode(filename)
            ),
        )
        .header("Content-Type", "application/octet-stream")
        .body(content))
    }

    fn upload_file_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }

    fn create_directory_request(&self, parent: &Item, name: &str) -> EitherError<HttpRequest> {
        let patch = ItemPatch {
            name: Some(name.to_string()),
            folder: Some(FolderFacet::default()),
            conflict_behavior: Some("fail".to_string()),
            ..ItemPatch::default()
        };
        Self::patch(
            HttpMethod::Post,
            format!("{}/children", Self::item_url(&parent.id)),
            &patch,
        )
    }

    fn create_directory_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }

    fn delete_item_request(&self, item: &Item) -> EitherError<HttpRequest> {
        Ok(HttpRequest::new(HttpMethod::Delete, Self::item_url(&item.id)))
    }

    fn move_item_request(&self, item: &Item, destination: &Item) -> EitherError<HttpRequest> {
        let patch = ItemPatch {
            parent_reference: Some(ItemReference {
                id: Some(destination.id.clone()),
            }),
            ..ItemPatch::default()
        };
        Self::patch(HttpMethod::Patch, Self::item_url(&item.id), &patch)
    }

    fn move_item_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }

    fn rename_item_request(&self, item: &Item, name: &str) -> EitherError<HttpRequest> {
        let patch = ItemPatch {
            name: Some(name.to_string()),
            ..ItemPatch::default()
        };
        Self::patch(HttpMethod::Patch, Self::item_url(&item.id), &patch)
    }

    fn rename_item_response(&self, body: &[u8]) -> EitherError<Item> {
        Self::parse_item(body)
    }
}
