use bytesize::ByteSize;
use http::StatusCode;
use thiserror::Error;

use crate::services::UploadRejection;

/// Errors that may occur while processing a multipart upload request.
#[derive(Debug, Error)]
pub(crate) enum FileUploadError {
    /// Represents an invalid request, wrapping the context as a string
    #[error("invalid multipart request: {0}")]
    InvalidMultipartRequest(#[from] multer::Error),

    #[error("Missing multipart field 'operations', it should be the first field in request body.")]
    MissingOperationsField,

    #[error("Missing multipart field 'map', it should be the second field in request body.")]
    MissingMapField,

    #[error("Invalid JSON in the 'operations' multipart field: {0}")]
    InvalidJsonInOperationsField(serde_json::Error),

    #[error("Invalid JSON in the 'map' multipart field: {0}")]
    InvalidJsonInMapField(serde_json::Error),

    #[error("Batched requests are not supported for file uploads.")]
    BatchedRequestsNotSupported,

    #[error("Invalid path '{0}' found inside 'map' field, it should start with 'variables.'.")]
    InvalidPathInsideMapField(String),

    #[error("Invalid path '{0}' found inside 'map' field, missing name of variable.")]
    MissingVariableNameInsideMapField(String),

    #[error(
        "Invalid path '{0}' found inside 'map' field, it does not point to a valid value inside 'operations' field."
    )]
    InputValueNotFound(String),

    #[error("Missing files in the request: {0}.")]
    MissingFiles(String),

    #[error("Exceeded the limit of {0} file uploads in a single request.")]
    MaxFilesLimitExceeded(usize),

    #[error("Exceeded the limit of {limit} on {filename} file.")]
    MaxFileSizeLimitExceeded { limit: ByteSize, filename: String },
}

impl FileUploadError {
    fn status(&self) -> StatusCode {
        match self {
            FileUploadError::MaxFilesLimitExceeded(_)
            | FileUploadError::MaxFileSizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn extension_code(&self) -> &'static str {
        match self {
            FileUploadError::MaxFilesLimitExceeded(_) => "FILE_UPLOADS_LIMITS_MAX_FILES_EXCEEDED",
            FileUploadError::MaxFileSizeLimitExceeded { .. } => {
                "FILE_UPLOADS_LIMITS_MAX_FILE_SIZE_EXCEEDED"
            }
            _ => "FILE_UPLOADS_INVALID_REQUEST",
        }
    }
}

impl From<FileUploadError> for UploadRejection {
    fn from(error: FileUploadError) -> Self {
        Self {
            status: Some(error.status()),
            expose: true,
            message: error.to_string(),
            extension_code: Some(error.extension_code().to_string()),
        }
    }
}
