use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct FetchFileRequest {
    pub path: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadFileRequest {
    pub path: String,
    pub code: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRemoteToLocalRequest {
    pub source_path_inside_azure_container: String,
    pub destination_path_inside_local_directory: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLocalToRemoteRequest {
    pub source_path_inside_local_directory: String,
    pub destination_path_inside_azure_container: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileData {
    pub code: String,
}

/// Local entry a sync left out, `path` is relative to the local directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: String,
    pub reason: String,
}

/// Body returned by every mirror route, `success` is 1 or 0
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationResponse {
    pub success: u8,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<FileData>,
    /// Files transferred by a sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedEntry>,
}

impl OperationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        OperationResponse {
            success: 1,
            message: message.into(),
            data: None,
            files: None,
            skipped: Vec::new(),
        }
    }

    /// Successful sync of `files` files, partial when `skipped` is not empty
    pub fn ok_with_summary(
        message: impl Into<String>,
        files: usize,
        skipped: Vec<SkippedEntry>,
    ) -> Self {
        OperationResponse {
            success: 1,
            message: message.into(),
            data: None,
            files: Some(files),
            skipped,
        }
    }

    pub fn ok_with_code(message: impl Into<String>, code: String) -> Self {
        OperationResponse {
            success: 1,
            message: message.into(),
            data: Some(FileData { code }),
            files: None,
            skipped: Vec::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        OperationResponse {
            success: 0,
            message: message.into(),
            data: None,
            files: None,
            skipped: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success == 1
    }
}

#[test]
fn test_sync_request_field_names() {
    let req: SyncRemoteToLocalRequest = serde_json::from_str(
        r#"{
            "sourcePathInsideAzureContainer": "proj/",
            "destinationPathInsideLocalDirectory": "checkout/",
            "token": "w"
        }"#,
    )
    .unwrap();
    assert_eq!(req.source_path_inside_azure_container, "proj/");
    assert_eq!(req.destination_path_inside_local_directory, "checkout/");

    let req = SyncLocalToRemoteRequest {
        source_path_inside_local_directory: "proj".to_string(),
        destination_path_inside_azure_container: "backup/".to_string(),
        token: "w".to_string(),
    };
    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["sourcePathInsideLocalDirectory"], "proj");
    assert_eq!(json["destinationPathInsideAzureContainer"], "backup/");
}

#[test]
fn test_failed_response_has_no_data() {
    let json = serde_json::to_value(OperationResponse::failed("Invalid token.")).unwrap();
    assert_eq!(json, serde_json::json!({"success": 0, "message": "Invalid token."}));

    let json = serde_json::to_value(OperationResponse::ok_with_code("File Sent", "x".into())).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"success": 1, "message": "File Sent", "data": {"code": "x"}})
    );
}

#[test]
fn test_sync_response_lists_skipped() {
    let res = OperationResponse::ok_with_summary(
        "Upload completed successfully!",
        2,
        vec![SkippedEntry {
            path: "proj/dangling".to_string(),
            reason: "No such file or directory (os error 2)".to_string(),
        }],
    );
    let json = serde_json::to_value(&res).unwrap();
    assert_eq!(json["files"], 2);
    assert_eq!(json["skipped"][0]["path"], "proj/dangling");

    // older bodies without the summary fields still parse
    let res: OperationResponse =
        serde_json::from_str(r#"{"success": 1, "message": "Download completed successfully!"}"#)
            .unwrap();
    assert_eq!(res.files, None);
    assert!(res.skipped.is_empty());
}
