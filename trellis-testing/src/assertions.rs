// Assertions over test responses and recorded storage calls

use crate::memory::MemoryStorage;
use crate::test_client::TestResponse;
use serde_json::Value as JsonValue;
use std::ops::Range;

#[track_caller]
fn assert_status_in(response: &TestResponse, range: Range<u16>, class: &str) {
    let status = response.status();
    assert!(
        range.contains(&status),
        "Status {} is not {}. Body: {}",
        status,
        class,
        response.body_string()
    );
}

#[track_caller]
pub fn assert_status(response: &TestResponse, expected: u16) {
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}. Body: {}",
        expected,
        response.body_string()
    );
}

pub fn assert_success(response: &TestResponse) {
    assert_status_in(response, 200..300, "a success");
}

pub fn assert_client_error(response: &TestResponse) {
    assert_status_in(response, 400..500, "a client error");
}

/// Header lookup is case-insensitive
#[track_caller]
pub fn assert_header(response: &TestResponse, key: &str, expected: &str) {
    match response.header(key) {
        Some(actual) => assert_eq!(actual, expected, "Header {} differs", key),
        None => panic!("Header {} missing, expected {:?}", key, expected),
    }
}

/// The `Content-Type` header contains `mime`
#[track_caller]
pub fn assert_content_type(response: &TestResponse, mime: &str) {
    let content_type = response.header("Content-Type");
    assert!(
        content_type.is_some_and(|ct| ct.contains(mime)),
        "Expected a {} content type, got {:?}",
        mime,
        content_type
    );
}

#[track_caller]
pub fn assert_json(response: &TestResponse, expected: &JsonValue) {
    let actual: JsonValue = response
        .body_json()
        .unwrap_or_else(|err| panic!("{}. Body: {}", err, response.body_string()));
    assert_eq!(&actual, expected, "JSON bodies differ");
}

#[track_caller]
pub fn assert_body_contains(response: &TestResponse, needle: &str) {
    let body = response.body_string();
    assert!(body.contains(needle), "Body does not contain {:?}: {}", needle, body);
}

/// A failed request: `status` plus the JSON error body the runtime sends
#[track_caller]
pub fn assert_error(response: &TestResponse, status: u16) {
    assert_status(response, status);
    let body: JsonValue = response
        .body_json()
        .unwrap_or_else(|err| panic!("{}. Body: {}", err, response.body_string()));
    assert_eq!(body["status"], JsonValue::from(status), "Error body status differs");
    assert!(body["error"].is_string(), "Error body has no message: {}", body);
}

/// Number of recorded storage calls of one kind (`"insert"`, `"select"`, ..)
#[track_caller]
pub fn assert_storage_calls(storage: &MemoryStorage, kind: &str, expected: usize) {
    let calls = storage.calls_to(kind);
    assert_eq!(
        calls.len(),
        expected,
        "Expected {} {} calls, recorded {:?}",
        expected,
        kind,
        calls
    );
}
