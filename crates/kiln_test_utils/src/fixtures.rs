//! Request fixtures shared across crate tests.

use serde_json::json;

use kiln_protocol::WorkRequest;

/// A minimal well-formed work request.
pub fn request(request_id: &str, s3_uri: &str) -> WorkRequest {
    serde_json::from_value(json!({
        "request_id": request_id,
        "s3_uri": s3_uri,
    }))
    .expect("fixture request is an object")
}

/// A message body holding the given `(request_id, s3_uri)` requests.
pub fn request_body(requests: &[(&str, &str)]) -> String {
    let requests: Vec<WorkRequest> = requests
        .iter()
        .map(|(id, uri)| request(id, uri))
        .collect();
    serde_json::to_string(&requests).expect("fixture body serializes")
}
