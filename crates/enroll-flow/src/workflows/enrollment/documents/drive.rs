//! Google Drive implementation of the storage gateway.
//!
//! Buckets map to Drive folders; a stored object's path is its file name
//! inside the folder. Shared-drive flags mirror how the school's document
//! folders are provisioned.

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use chrono::Utc;
use google_drive3::{api::File, api::Scope, DriveHub};

use super::storage::{FileUpload, StorageError, StorageGateway};
use super::SlotKey;

/// Thin wrapper around the generated google-drive3 client, mapping bucket
/// names onto Drive folder ids.
pub struct GoogleDriveStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    hub: DriveHub<C>,
    folders: HashMap<String, String>,
    upload_bucket: String,
}

impl<C> GoogleDriveStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    /// `folders` maps each roster bucket name to a Drive folder id;
    /// `upload_bucket` names the folder new uploads land in.
    pub fn new(hub: DriveHub<C>, folders: HashMap<String, String>, upload_bucket: String) -> Self {
        debug_assert!(folders.contains_key(&upload_bucket));
        Self {
            hub,
            folders,
            upload_bucket,
        }
    }

    fn folder_for(&self, bucket: &str) -> Option<&str> {
        self.folders.get(bucket).map(String::as_str)
    }

    fn upload_folder(&self) -> Option<&str> {
        self.folder_for(self.upload_bucket.as_str())
    }

    fn map_error<E: std::fmt::Display>(err: E) -> StorageError {
        StorageError::Backend(err.to_string())
    }

    async fn find_file_id(&self, path: &str, folder: &str) -> Result<Option<String>, StorageError> {
        let escaped = path.replace('\'', "\\'");
        let result = self
            .hub
            .files()
            .list()
            .q(&format!(
                "name = '{escaped}' and '{folder}' in parents and trashed=false"
            ))
            .param("fields", "files(id)")
            .page_size(1)
            .include_items_from_all_drives(true)
            .supports_all_drives(true)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(Self::map_error)?;

        let (_, file_list) = result;
        Ok(file_list
            .files
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|file| file.id))
    }
}

impl<C> std::fmt::Debug for GoogleDriveStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleDriveStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl<C> StorageGateway for GoogleDriveStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    async fn resolve_signed_url(
        &self,
        path: &str,
        bucket: &str,
    ) -> Result<Option<String>, StorageError> {
        let Some(folder) = self.folder_for(bucket) else {
            return Ok(None);
        };
        let folder = folder.to_string();

        let escaped = path.replace('\'', "\\'");
        let result = self
            .hub
            .files()
            .list()
            .q(&format!(
                "name = '{escaped}' and '{folder}' in parents and trashed=false"
            ))
            .param("fields", "files(id,webViewLink)")
            .page_size(1)
            .include_items_from_all_drives(true)
            .supports_all_drives(true)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(Self::map_error)?;

        let (_, file_list) = result;
        Ok(file_list
            .files
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|file| file.web_view_link))
    }

    async fn delete_object(&self, path: &str, bucket: &str) -> Result<bool, StorageError> {
        let Some(folder) = self.folder_for(bucket) else {
            return Ok(false);
        };
        let folder = folder.to_string();

        let Some(file_id) = self.find_file_id(path, &folder).await? else {
            return Ok(false);
        };

        self.hub
            .files()
            .delete(&file_id)
            .supports_all_drives(true)
            .add_scope(Scope::File)
            .doit()
            .await
            .map_err(Self::map_error)?;
        Ok(true)
    }

    async fn upload(&self, file: &FileUpload, slot: SlotKey) -> Result<String, StorageError> {
        let folder = self
            .upload_folder()
            .ok_or_else(|| StorageError::Backend("upload folder not configured".to_string()))?
            .to_string();

        let path = format!(
            "{}/{}-{}",
            slot.storage_prefix(),
            Utc::now().timestamp_millis(),
            file.file_name
        );

        let metadata = File {
            name: Some(path.clone()),
            parents: Some(vec![folder]),
            ..File::default()
        };

        let cursor = Cursor::new(file.bytes.clone());
        self.hub
            .files()
            .create(metadata)
            .param("fields", "id")
            .supports_all_drives(true)
            .add_scope(Scope::File)
            .upload(cursor, file.content_type.clone())
            .await
            .map_err(Self::map_error)?;

        Ok(path)
    }
}
