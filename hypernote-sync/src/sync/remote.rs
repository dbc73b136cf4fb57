use std::future::Future;

use hypernote_drive::{ByteStream, DEFAULT_PAGE_SIZE, DriveClient, DriveError, ROOT_FOLDER_ID};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    pub modified_time: Option<String>,
}

/// The subset of the drive the sync engine needs.
pub trait RemoteStore: Sync {
    /// Id of the store root, the parent of the sync folder.
    fn root_id(&self) -> &str {
        ROOT_FOLDER_ID
    }

    /// Every non-trashed child of `folder_id`, across all pages.
    fn list_children(
        &self,
        folder_id: &str,
    ) -> impl Future<Output = Result<Vec<RemoteEntry>, DriveError>> + Send;

    fn find_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<String>, DriveError>> + Send;

    fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> impl Future<Output = Result<String, DriveError>> + Send;

    fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        modified_at_millis: i64,
        content: ByteStream,
    ) -> impl Future<Output = Result<String, DriveError>> + Send;

    fn update_file(
        &self,
        file_id: &str,
        modified_at_millis: i64,
        content: ByteStream,
    ) -> impl Future<Output = Result<(), DriveError>> + Send;

    fn get_file_content(
        &self,
        file_id: &str,
    ) -> impl Future<Output = Result<ByteStream, DriveError>> + Send;
}

impl RemoteStore for DriveClient {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteEntry>, DriveError> {
        let files = self.list_folder_all(folder_id, DEFAULT_PAGE_SIZE).await?;
        Ok(files
            .into_iter()
            .map(|file| RemoteEntry {
                is_folder: file.is_folder(),
                id: file.id,
                name: file.name,
                modified_time: file.modified_time,
            })
            .collect())
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<String>, DriveError> {
        Ok(DriveClient::find_folder(self, parent_id, name)
            .await?
            .map(|folder| folder.id))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, DriveError> {
        Ok(DriveClient::create_folder(self, parent_id, name).await?.id)
    }

    async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        modified_at_millis: i64,
        content: ByteStream,
    ) -> Result<String, DriveError> {
        let modified_time = millis_to_rfc3339(modified_at_millis)?;
        let file = DriveClient::create_file(self, parent_id, name, &modified_time, content).await?;
        Ok(file.id)
    }

    async fn update_file(
        &self,
        file_id: &str,
        modified_at_millis: i64,
        content: ByteStream,
    ) -> Result<(), DriveError> {
        let modified_time = millis_to_rfc3339(modified_at_millis)?;
        DriveClient::update_file(self, file_id, &modified_time, content).await?;
        Ok(())
    }

    async fn get_file_content(&self, file_id: &str) -> Result<ByteStream, DriveError> {
        DriveClient::get_file_content(self, file_id).await
    }
}

pub fn millis_to_rfc3339(millis: i64) -> Result<String, DriveError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .ok_or_else(|| DriveError::InvalidTimestamp(millis.to_string()))
}

pub fn parse_rfc3339_millis(value: &str) -> Option<i64> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339).ok()?;
    i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000).ok()
}
