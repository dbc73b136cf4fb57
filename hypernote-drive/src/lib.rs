mod client;

pub use bytes::Bytes;
pub use client::{
    ApiErrorClass, ByteStream, DEFAULT_PAGE_SIZE, DriveClient, DriveError, DriveFile, FOLDER_MIME_TYPE,
    FileList, ROOT_FOLDER_ID, escape_query_value,
};
