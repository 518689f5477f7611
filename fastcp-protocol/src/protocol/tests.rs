use super::*;
use serde_json::json;
use tokio::io::BufReader;

use crate::payload::{CaddyConfig, CreateSiteDirectory};

// ========================================================================
// Envelope encoding
// ========================================================================

#[test]
fn request_without_params_decodes_as_null() {
    let req = decode_request(br#"{"id":"a1","method":"caddy.reload"}"#).unwrap();
    assert_eq!(req.id, "a1");
    assert_eq!(req.method, "caddy.reload");
    assert!(req.params.is_null());
}

#[test]
fn encode_line_appends_single_newline() {
    let req = Request::new("7", "system.status", Value::Null);
    let bytes = encode_line(&req).unwrap();
    assert_eq!(bytes.last(), Some(&b'\n'));
    assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
    // null params are omitted on the wire
    assert!(!String::from_utf8(bytes).unwrap().contains("params"));
}

#[test]
fn ok_response_omits_error_field() {
    let resp = Response::ok("x", json!({"status": "ok"}));
    let text = String::from_utf8(encode_line(&resp).unwrap()).unwrap();
    assert_eq!(text, "{\"id\":\"x\",\"result\":{\"status\":\"ok\"}}\n");
}

#[test]
fn error_response_omits_result_field() {
    let resp = Response::error("x", "unknown method: nope");
    let text = String::from_utf8(encode_line(&resp).unwrap()).unwrap();
    assert_eq!(text, "{\"id\":\"x\",\"error\":\"unknown method: nope\"}\n");
}

#[test]
fn ok_with_null_result_has_neither_field() {
    let resp = Response::ok("x", Value::Null);
    assert!(resp.result.is_none());
    assert!(!resp.is_error());
    assert_eq!(resp.into_result().unwrap(), Value::Null);
}

#[test]
fn into_result_surfaces_error_verbatim() {
    let resp = Response::error("1", "php 8.3 FPM sockets not available after restart: /a (missing)");
    assert_eq!(
        resp.into_result().unwrap_err(),
        "php 8.3 FPM sockets not available after restart: /a (missing)"
    );
}

#[test]
fn malformed_request_is_decode_error() {
    let err = decode_request(b"{not json").unwrap_err();
    assert!(matches!(err, ProtocolError::Decode(_)));
}

#[test]
fn request_missing_method_is_decode_error() {
    assert!(decode_request(br#"{"id":"1"}"#).is_err());
}

// ========================================================================
// Typed params
// ========================================================================

#[test]
fn parse_params_fills_defaults_for_missing_fields() {
    let req = Request::new("1", "site.createDirectory", json!({"username": "alice"}));
    let params: CreateSiteDirectory = req.parse_params().unwrap();
    assert_eq!(params.username, "alice");
    assert_eq!(params.slug, "");
}

#[test]
fn parse_params_accepts_null() {
    let cfg: CaddyConfig = parse_params(&Value::Null).unwrap();
    assert_eq!(cfg, CaddyConfig::default());
}

#[test]
fn parse_params_rejects_wrong_types() {
    let err = parse_params::<CaddyConfig>(&json!({"max_header_size": "big"}));
    assert!(err.is_err());
}

// ========================================================================
// Line reader
// ========================================================================

#[tokio::test]
async fn read_line_splits_messages_and_skips_blank_lines() {
    let input: &[u8] = b"{\"a\":1}\n\n  \r\n{\"b\":2}\r\n";
    let mut reader = BufReader::new(input);
    let mut buf = Vec::new();

    assert!(read_line(&mut reader, &mut buf).await.unwrap());
    assert_eq!(buf, b"{\"a\":1}");
    assert!(read_line(&mut reader, &mut buf).await.unwrap());
    assert_eq!(buf, b"{\"b\":2}");
    assert!(!read_line(&mut reader, &mut buf).await.unwrap());
}

#[tokio::test]
async fn read_line_reports_truncated_message() {
    let input: &[u8] = b"{\"a\":";
    let mut reader = BufReader::new(input);
    let mut buf = Vec::new();
    let err = read_line(&mut reader, &mut buf).await.unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedEof));
}

#[tokio::test]
async fn read_line_handles_small_buffer_chunks() {
    let input: &[u8] = b"{\"method\":\"system.status\",\"id\":\"long-id\"}\n";
    let mut reader = BufReader::with_capacity(4, input);
    let mut buf = Vec::new();
    assert!(read_line(&mut reader, &mut buf).await.unwrap());
    let req = decode_request(&buf).unwrap();
    assert_eq!(req.method, "system.status");
}
