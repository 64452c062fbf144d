//! Remote store backed by the Google Drive v3 REST API, scoped to the
//! application-private `appDataFolder` space.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::remote::{FileQuery, FileUpdate, FolderHandle, RemoteFile, RemoteStore};
use crate::session::Session;

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const SPACE: &str = "appDataFolder";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILE_FIELDS: &str = "id,name,mimeType,modifiedTime,version";
const BOUNDARY: &str = "notes_sync_multipart_boundary";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    modified_time: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

impl From<DriveFile> for RemoteFile {
    fn from(f: DriveFile) -> Self {
        RemoteFile {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            modified_time: f.modified_time,
            version: f.version,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

// ---- Query building ----

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Drive `q` expression for a folder listing.
pub fn files_query(folder_id: &str, query: &FileQuery) -> String {
    let mut clauses = vec![format!("{} in parents", quote(folder_id)), "trashed = false".to_string()];
    if let Some(name) = &query.name {
        clauses.push(format!("name = {}", quote(name)));
    }
    if let Some(name) = &query.exclude_name {
        clauses.push(format!("name != {}", quote(name)));
    }
    clauses.join(" and ")
}

/// Drive `q` expression for a folder lookup by name.
pub fn folder_query(parent: &str, name: &str) -> String {
    format!(
        "name = {} and mimeType = {} and {} in parents and trashed = false",
        quote(name),
        quote(FOLDER_MIME),
        quote(parent)
    )
}

/// `multipart/related` body carrying JSON metadata and the media bytes.
pub fn multipart_body(metadata: &serde_json::Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--", BOUNDARY).as_bytes());
    body
}

fn multipart_content_type() -> String {
    format!("multipart/related; boundary={}", BOUNDARY)
}

// ---- Client ----

pub struct DriveStore {
    client: reqwest::Client,
    api_base: String,
    upload_base: String,
}

impl Default for DriveStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveStore {
    pub fn new() -> Self {
        Self::with_endpoints(API_BASE, UPLOAD_BASE)
    }

    /// Point the client at another deployment (proxies, test servers).
    pub fn with_endpoints(api_base: &str, upload_base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        }
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.api_base)
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{}", self.api_base, file_id)
    }

    async fn send(&self, session: &dyn Session, req: RequestBuilder, what: &str) -> SyncResult<Response> {
        let token = session
            .access_token()
            .ok_or_else(|| SyncError::NotAuthorized("missing access token".to_string()))?;
        let res = req
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SyncError::TransientNetwork(format!("{}: {}", what, e)))?;
        check_status(res, what).await
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        session: &dyn Session,
        req: RequestBuilder,
        what: &str,
    ) -> SyncResult<T> {
        let res = self.send(session, req, what).await?;
        res.json::<T>()
            .await
            .map_err(|e| SyncError::Remote(format!("{}: unexpected response: {}", what, e)))
    }

    async fn list(&self, session: &dyn Session, q: String) -> SyncResult<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", q.clone()),
                ("spaces", SPACE.to_string()),
                ("orderBy", "createdTime".to_string()),
                ("fields", format!("nextPageToken,files({})", FILE_FIELDS)),
                ("pageSize", "1000".to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let page: FileList = self
                .send_json(session, self.client.get(self.files_url()).query(&params), "file listing")
                .await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        debug!(count = files.len(), "listed drive files");
        Ok(files)
    }
}

async fn check_status(res: Response, what: &str) -> SyncResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let detail = format!("{} failed: HTTP {} {}", what, status, body.trim());
    Err(match status {
        StatusCode::UNAUTHORIZED => SyncError::NotAuthorized(detail),
        StatusCode::FORBIDDEN if body.contains("insufficient") => SyncError::NotAuthorized(detail),
        StatusCode::NOT_FOUND => SyncError::NotFound(detail),
        StatusCode::PRECONDITION_FAILED => SyncError::VersionConflict(detail),
        StatusCode::TOO_MANY_REQUESTS => SyncError::TransientNetwork(detail),
        s if s.is_server_error() => SyncError::TransientNetwork(detail),
        _ => SyncError::Remote(detail),
    })
}

#[async_trait]
impl RemoteStore for DriveStore {
    async fn find_folder(
        &self,
        session: &dyn Session,
        parent: &str,
        name: &str,
    ) -> SyncResult<Option<FolderHandle>> {
        let found = self.list(session, folder_query(parent, name)).await?;
        // Drive allows duplicate names; the oldest folder wins.
        Ok(found.into_iter().next().map(|f| FolderHandle {
            id: f.id,
            name: f.name,
        }))
    }

    async fn create_folder(
        &self,
        session: &dyn Session,
        parent: &str,
        name: &str,
    ) -> SyncResult<FolderHandle> {
        let body = json!({ "name": name, "mimeType": FOLDER_MIME, "parents": [parent] });
        let req = self
            .client
            .post(self.files_url())
            .query(&[("fields", "id,name")])
            .json(&body);
        let created: DriveFile = self.send_json(session, req, "folder create").await?;
        Ok(FolderHandle {
            id: created.id,
            name: created.name,
        })
    }

    async fn list_files(
        &self,
        session: &dyn Session,
        folder_id: &str,
        query: &FileQuery,
    ) -> SyncResult<Vec<RemoteFile>> {
        let files = self.list(session, files_query(folder_id, query)).await?;
        Ok(files.into_iter().map(RemoteFile::from).collect())
    }

    async fn get_file(&self, session: &dyn Session, file_id: &str) -> SyncResult<RemoteFile> {
        let req = self
            .client
            .get(self.file_url(file_id))
            .query(&[("fields", FILE_FIELDS)]);
        let file: DriveFile = self.send_json(session, req, "file lookup").await?;
        Ok(file.into())
    }

    async fn get_file_content(&self, session: &dyn Session, file_id: &str) -> SyncResult<Vec<u8>> {
        let req = self
            .client
            .get(self.file_url(file_id))
            .query(&[("alt", "media")]);
        let res = self.send(session, req, "file download").await?;
        let bytes = res
            .bytes()
            .await
            .map_err(|e| SyncError::TransientNetwork(format!("file download: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn create_file(
        &self,
        session: &dyn Session,
        folder_id: &str,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
    ) -> SyncResult<RemoteFile> {
        let metadata = json!({ "name": name, "parents": [folder_id], "mimeType": mime_type });
        let req = self
            .client
            .post(format!("{}/files", self.upload_base))
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(reqwest::header::CONTENT_TYPE, multipart_content_type())
            .body(multipart_body(&metadata, mime_type, &content));
        let created: DriveFile = self.send_json(session, req, "file create").await?;
        Ok(created.into())
    }

    async fn update_file(
        &self,
        session: &dyn Session,
        file_id: &str,
        update: FileUpdate,
    ) -> SyncResult<RemoteFile> {
        let mut metadata = serde_json::Map::new();
        if let Some(name) = &update.name {
            metadata.insert("name".to_string(), json!(name));
        }
        if let Some(mime_type) = &update.mime_type {
            metadata.insert("mimeType".to_string(), json!(mime_type));
        }
        let metadata = serde_json::Value::Object(metadata);

        let req = match update.content {
            Some(content) => {
                let mime_type = update
                    .mime_type
                    .as_deref()
                    .unwrap_or("application/octet-stream");
                self.client
                    .patch(format!("{}/files/{}", self.upload_base, file_id))
                    .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
                    .header(reqwest::header::CONTENT_TYPE, multipart_content_type())
                    .body(multipart_body(&metadata, mime_type, &content))
            }
            None => self
                .client
                .patch(self.file_url(file_id))
                .query(&[("fields", FILE_FIELDS)])
                .json(&metadata),
        };
        let updated: DriveFile = self.send_json(session, req, "file update").await?;
        Ok(updated.into())
    }

    async fn delete_file(&self, session: &dyn Session, file_id: &str) -> SyncResult<()> {
        self.send(session, self.client.delete(self.file_url(file_id)), "file delete")
            .await?;
        Ok(())
    }
}
