use std::path::PathBuf;

use serde_json::Value;
use tasklink::error::{exit_codes, Error, JsonError};

#[test]
fn exit_code_user_error() {
    let err = Error::PartitionNotFound("work".to_string());
    assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
}

#[test]
fn exit_code_store_unavailable() {
    let err = Error::store_unavailable("reminders", "permission denied");
    assert_eq!(err.exit_code(), exit_codes::STORE_UNAVAILABLE);
}

#[test]
fn exit_code_operation_failed() {
    let err = Error::LockFailed(PathBuf::from("links.json.lock"));
    assert_eq!(err.exit_code(), exit_codes::OPERATION_FAILED);
}

#[test]
fn details_include_store_fields() {
    let err = Error::store_unavailable("vault", "index missing");
    let details = err.details().expect("details");
    assert_eq!(details["store"], Value::String("vault".to_string()));
    assert_eq!(details["message"], Value::String("index missing".to_string()));
}

#[test]
fn json_error_includes_details() {
    let err = Error::LinkFileCorrupt {
        path: PathBuf::from("links.json"),
        message: "expected value".to_string(),
    };
    let json = JsonError::from(&err);
    let value = serde_json::to_value(&json).expect("serialize");
    assert_eq!(value["code"], exit_codes::OPERATION_FAILED);
    assert_eq!(value["details"]["path"], "links.json");
}
