use conduit::http::response::{Response, StatusCode};

#[test]
fn test_status_code_table() {
    let known = [
        200, 201, 202, 204, 300, 301, 302, 304, 400, 401, 403, 404, 500, 501, 502, 503,
    ];
    for code in known {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(status.as_u16(), code);
        let line = status.status_line();
        assert!(line.starts_with(&format!("HTTP/1.1 {code} ")));
        assert!(line.ends_with(&format!("{}\r\n", status.reason_phrase())));
    }
}

#[test]
fn test_status_code_unknown() {
    assert_eq!(StatusCode::from_u16(999), None);
    assert_eq!(StatusCode::from_u16(405), None);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::MovedTemporarily.reason_phrase(), "Moved Temporarily");
    assert_eq!(StatusCode::ServiceUnavailable.reason_phrase(), "Service Unavailable");
}

#[test]
fn test_canned_body() {
    assert_eq!(StatusCode::BadRequest.canned_body(), "400 Bad Request");
}

#[test]
fn test_response_ok() {
    let response = Response::ok("Hello, World!");
    assert_eq!(response.code, 200);
    assert_eq!(response.body, b"Hello, World!".to_vec());
    assert!(!response.is_completed());
}

#[test]
fn test_response_headers() {
    let mut response = Response::new(201);
    response.add_header("Link", "</a>");
    response.add_header("Link", "</b>");
    response.set_header("Content-Type", "text/plain");
    response.set_header("content-type", "application/json");

    assert_eq!(response.headers.len(), 3);
    assert_eq!(response.headers.get("Content-Type"), Some("application/json"));
}

#[test]
fn test_response_end_and_clear() {
    let mut response = Response::with_json(202, serde_json::json!({"TaskState": "New"}));
    response.write("x");
    response.end();
    assert!(response.is_completed());

    response.clear();
    assert_eq!(response.code, 200);
    assert!(response.body.is_empty());
    assert!(response.json.is_none());
    assert!(!response.is_completed());
}
