//! Default multipart processing backed by `multer`.

use axum::body::Body;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::HeaderValue;
use indexmap::IndexMap;
use serde_json_bytes::Value;

use super::MultipartRequestLimits;
use super::ProcessedUpload;
use super::UploadedFile;
use super::UploadedFiles;
use super::error::FileUploadError;
use crate::graphql;
use crate::services::UploadProcessor;
use crate::services::UploadRejection;

const OPERATIONS_FIELD_NAME: &str = "operations";
const MAP_FIELD_NAME: &str = "map";

pub(super) type MapFieldRaw = IndexMap<String, Vec<String>>;

/// The parsed 'map' field: for each file key, the variable paths (with the
/// leading `variables` segment stripped) it is referenced from.
#[derive(Debug)]
pub(super) struct MapField {
    pub(super) per_file: IndexMap<String, Vec<Vec<String>>>,
}

impl MapField {
    pub(super) fn new(map_field: MapFieldRaw) -> Result<Self, FileUploadError> {
        let mut per_file = IndexMap::new();
        for (file_key, paths) in map_field.into_iter() {
            let mut file_paths = Vec::new();
            for path in paths.into_iter() {
                let mut segments = path.split('.');
                let first_segment = segments.next();
                if first_segment != Some("variables") {
                    if first_segment
                        .and_then(|str| str.parse::<usize>().ok())
                        .is_some()
                    {
                        return Err(FileUploadError::BatchedRequestsNotSupported);
                    }
                    return Err(FileUploadError::InvalidPathInsideMapField(path));
                }
                let variable_path: Vec<String> = segments.map(str::to_owned).collect();
                if variable_path.is_empty() {
                    return Err(FileUploadError::MissingVariableNameInsideMapField(path));
                }
                file_paths.push(variable_path);
            }
            per_file.insert(file_key, file_paths);
        }
        Ok(Self { per_file })
    }
}

// Replaces value at path with the provided one.
// Returns the provided path if the path is not valid for the given object
fn replace_value_at_path<'a>(
    variables: &'a mut graphql::Object,
    path: &'a [String],
    value: Value,
) -> Result<(), &'a [String]> {
    if let Some(v) = get_value_at_path(variables, path) {
        *v = value;
        Ok(())
    } else {
        Err(path)
    }
}

fn get_value_at_path<'a>(
    variables: &'a mut graphql::Object,
    path: &'a [String],
) -> Option<&'a mut Value> {
    let mut iter = path.iter();
    let variable_name = iter.next()?;
    let root = variables.get_mut(variable_name.as_str())?;
    iter.try_fold(root, |parent, segment| match parent {
        Value::Object(map) => map.get_mut(segment.as_str()),
        Value::Array(list) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |index| list.get_mut(index)),
        _ => None,
    })
}

/// The built-in [`UploadProcessor`]: reads the `operations` field, the
/// `map` field and then every mapped file, enforcing the configured limits.
#[derive(Debug, Clone, Default)]
pub struct MultipartProcessor;

impl UploadProcessor for MultipartProcessor {
    fn process(
        &self,
        content_type: HeaderValue,
        body: Body,
        limits: MultipartRequestLimits,
    ) -> BoxFuture<'static, Result<ProcessedUpload, UploadRejection>> {
        Box::pin(async move {
            process_multipart(content_type, body, limits)
                .await
                .map_err(UploadRejection::from)
        })
    }
}

async fn process_multipart(
    content_type: HeaderValue,
    body: Body,
    limits: MultipartRequestLimits,
) -> Result<ProcessedUpload, FileUploadError> {
    let boundary = multer::parse_boundary(content_type.to_str().unwrap_or_default())?;
    let mut multipart = multer::Multipart::new(body.into_data_stream(), boundary);

    // 'operations' must be the first field
    let operations = match multipart.next_field().await? {
        Some(field) if field.name() == Some(OPERATIONS_FIELD_NAME) => field.text().await?,
        _ => return Err(FileUploadError::MissingOperationsField),
    };
    let mut operations: graphql::Request =
        serde_json::from_str(&operations).map_err(FileUploadError::InvalidJsonInOperationsField)?;

    // 'map' must be the second field
    let map = match multipart.next_field().await? {
        Some(field) if field.name() == Some(MAP_FIELD_NAME) => field.text().await?,
        _ => return Err(FileUploadError::MissingMapField),
    };
    let map: MapFieldRaw =
        serde_json::from_str(&map).map_err(FileUploadError::InvalidJsonInMapField)?;
    let map = MapField::new(map)?;

    // patch every mapped variable with a placeholder for the file
    for (file_key, paths) in map.per_file.iter() {
        for path in paths.iter() {
            replace_value_at_path(
                &mut operations.variables,
                path,
                Value::String(format!("<Placeholder for file '{file_key}'>").into()),
            )
            .map_err(|path| FileUploadError::InputValueNotFound(path.join(".")))?;
        }
    }

    let mut files = IndexMap::new();
    while let Some(mut field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if !map.per_file.contains_key(&name) {
            tracing::debug!(field = %name, "skipping unmapped multipart field");
            continue;
        }
        if files.len() == limits.max_files {
            return Err(FileUploadError::MaxFilesLimitExceeded(limits.max_files));
        }

        let filename = field.file_name().map(str::to_owned);
        let file_content_type = field.content_type().map(|mime| mime.to_string());
        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            if (data.len() + chunk.len()) as u64 > limits.max_file_size.as_u64() {
                return Err(FileUploadError::MaxFileSizeLimitExceeded {
                    limit: limits.max_file_size,
                    filename: name,
                });
            }
            data.extend_from_slice(&chunk);
        }

        files.insert(
            name,
            UploadedFile {
                filename,
                content_type: file_content_type,
                data: Bytes::from(data),
            },
        );
    }

    let missing: Vec<&str> = map
        .per_file
        .keys()
        .filter(|key| !files.contains_key(key.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(FileUploadError::MissingFiles(missing.join(", ")));
    }

    Ok(ProcessedUpload {
        operations,
        files: UploadedFiles(files),
    })
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn multipart_request(parts: &[(&str, Option<&str>, &str)]) -> (HeaderValue, Body) {
        let mut body = String::new();
        for (name, filename, content) in parts {
            body.push_str("--boundary\r\n");
            match filename {
                Some(filename) => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                     Content-Type: text/plain\r\n\r\n"
                )),
                None => body.push_str(&format!(
                    "Content-Disposition: form-data; name=\"{name}\"\r\n\r\n"
                )),
            }
            body.push_str(content);
            body.push_str("\r\n");
        }
        body.push_str("--boundary--\r\n");
        (
            HeaderValue::from_static("multipart/form-data; boundary=boundary"),
            Body::from(body),
        )
    }

    async fn process(
        parts: &[(&str, Option<&str>, &str)],
        limits: MultipartRequestLimits,
    ) -> Result<ProcessedUpload, FileUploadError> {
        let (content_type, body) = multipart_request(parts);
        process_multipart(content_type, body, limits).await
    }

    #[tokio::test]
    async fn parses_operations_map_and_files() {
        let upload = process(
            &[
                (
                    "operations",
                    None,
                    r#"{"query":"mutation($file: Upload!) { upload(file: $file) }","variables":{"file":null}}"#,
                ),
                ("map", None, r#"{"0":["variables.file"]}"#),
                ("0", Some("a.txt"), "hello"),
            ],
            MultipartRequestLimits::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            upload.operations.variables.get("file"),
            Some(&json!("<Placeholder for file '0'>"))
        );
        let file = upload.files.0.get("0").unwrap();
        assert_eq!(file.filename.as_deref(), Some("a.txt"));
        assert_eq!(file.data.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn operations_must_come_first() {
        let error = process(
            &[
                ("map", None, r#"{"0":["variables.file"]}"#),
                ("operations", None, r#"{"query":"{ me }"}"#),
            ],
            MultipartRequestLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, FileUploadError::MissingOperationsField));
    }

    #[tokio::test]
    async fn map_paths_must_point_into_variables() {
        let error = process(
            &[
                (
                    "operations",
                    None,
                    r#"{"query":"{ me }","variables":{"file":null}}"#,
                ),
                ("map", None, r#"{"0":["query"]}"#),
            ],
            MultipartRequestLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, FileUploadError::InvalidPathInsideMapField(_)));
    }

    #[tokio::test]
    async fn batched_operations_are_rejected() {
        let error = process(
            &[
                ("operations", None, r#"{"query":"{ me }"}"#),
                ("map", None, r#"{"0":["0.variables.file"]}"#),
            ],
            MultipartRequestLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, FileUploadError::BatchedRequestsNotSupported));
    }

    #[tokio::test]
    async fn unknown_variable_path_is_rejected() {
        let error = process(
            &[
                (
                    "operations",
                    None,
                    r#"{"query":"{ me }","variables":{"file":null}}"#,
                ),
                ("map", None, r#"{"0":["variables.other"]}"#),
            ],
            MultipartRequestLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, FileUploadError::InputValueNotFound(_)));
    }

    #[tokio::test]
    async fn missing_file_fields_are_reported() {
        let error = process(
            &[
                (
                    "operations",
                    None,
                    r#"{"query":"{ me }","variables":{"file":null}}"#,
                ),
                ("map", None, r#"{"0":["variables.file"]}"#),
            ],
            MultipartRequestLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, FileUploadError::MissingFiles(_)));
    }

    #[tokio::test]
    async fn file_size_limit_is_enforced() {
        let error = process(
            &[
                (
                    "operations",
                    None,
                    r#"{"query":"{ me }","variables":{"file":null}}"#,
                ),
                ("map", None, r#"{"0":["variables.file"]}"#),
                ("0", Some("a.txt"), "way too large for the limit"),
            ],
            MultipartRequestLimits {
                max_files: 5,
                max_file_size: bytesize::ByteSize::b(4),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            error,
            FileUploadError::MaxFileSizeLimitExceeded { .. }
        ));
    }

    #[tokio::test]
    async fn nested_variable_paths_are_patched() {
        let upload = process(
            &[
                (
                    "operations",
                    None,
                    r#"{"query":"{ me }","variables":{"input":{"files":[null,null]}}}"#,
                ),
                (
                    "map",
                    None,
                    r#"{"0":["variables.input.files.0"],"1":["variables.input.files.1"]}"#,
                ),
                ("0", Some("a.txt"), "a"),
                ("1", Some("b.txt"), "b"),
            ],
            MultipartRequestLimits::default(),
        )
        .await
        .unwrap();

        assert_eq!(
            upload.operations.variables.get("input"),
            Some(&json!({
                "files": [
                    "<Placeholder for file '0'>",
                    "<Placeholder for file '1'>",
                ]
            }))
        );
    }
}
