//! RESP reply parser tests - framing decisions and canonical encoding

use super::super::{FrameScanner, RespError, RespParser, RespValue, MAX_NESTING};

#[test]
fn test_simple_string() {
    let (value, consumed) = RespParser::parse(b"+OK\r\n").unwrap();
    assert_eq!(value, RespValue::SimpleString("OK".to_string()));
    assert_eq!(consumed, 5);
}

#[test]
fn test_error() {
    let (value, _) = RespParser::parse(b"-ERR unknown command\r\n").unwrap();
    assert_eq!(value, RespValue::Error("ERR unknown command".to_string()));
}

#[test]
fn test_integer() {
    assert_eq!(RespParser::parse(b":0\r\n").unwrap().0, RespValue::Integer(0));
    assert_eq!(RespParser::parse(b":-1\r\n").unwrap().0, RespValue::Integer(-1));
}

#[test]
fn test_bulk_string() {
    let (value, consumed) = RespParser::parse(b"$5\r\nhello\r\n").unwrap();
    assert_eq!(value, RespValue::BulkString(Some(b"hello".to_vec())));
    assert_eq!(consumed, 11);
    assert_eq!(RespParser::parse(b"$-1\r\n").unwrap().0, RespValue::nil());
}

#[test]
fn test_nested_array() {
    let input = b"*2\r\n*1\r\n:1\r\n$-1\r\n";
    let (value, consumed) = RespParser::parse(input).unwrap();
    assert_eq!(consumed, input.len());
    assert_eq!(
        value,
        RespValue::Array(Some(vec![
            RespValue::Array(Some(vec![RespValue::Integer(1)])),
            RespValue::nil(),
        ]))
    );
}

#[test]
fn test_incomplete_inputs() {
    assert_eq!(RespParser::parse(b""), Err(RespError::Incomplete));
    assert_eq!(RespParser::parse(b"+OK"), Err(RespError::Incomplete));
    assert_eq!(RespParser::parse(b"$5\r\nhel"), Err(RespError::Incomplete));
    assert_eq!(
        RespParser::parse(b"*2\r\n$4\r\nLPOP\r\n"),
        Err(RespError::Incomplete)
    );
}

#[test]
fn test_invalid_inputs() {
    assert!(matches!(
        RespParser::parse(b"PING\r\n"),
        Err(RespError::Invalid(_))
    ));
    assert!(matches!(
        RespParser::parse(b"$abc\r\n"),
        Err(RespError::Invalid(_))
    ));
}

#[test]
fn test_frame_complete() {
    assert!(!RespParser::frame_complete(b""));
    assert!(RespParser::frame_complete(b"+OK\r\n"));
    assert!(!RespParser::frame_complete(b"$10\r\nhello"));
    assert!(RespParser::frame_complete(b"*2\r\n$3\r\nGET\r\n$5\r\nhello\r\n"));
    // Two whole replies back to back
    assert!(RespParser::frame_complete(b"+OK\r\n:1\r\n"));
    // Whole reply followed by a partial one
    assert!(!RespParser::frame_complete(b"+OK\r\n:1"));
    // Inline command can never become RESP, so it is passed on
    assert!(RespParser::frame_complete(b"PING\r\n"));
}

#[test]
fn test_encode_canned_replies() {
    assert_eq!(RespParser::encode(&RespValue::ok()), b"+OK\r\n".to_vec());
    assert_eq!(RespParser::encode(&RespValue::nil()), b"$-1\r\n".to_vec());
    assert_eq!(RespParser::encode(&RespValue::nil_array()), b"*-1\r\n".to_vec());
    assert_eq!(RespParser::encode(&RespValue::empty_array()), b"*0\r\n".to_vec());
    assert_eq!(RespParser::encode(&RespValue::Integer(0)), b":0\r\n".to_vec());
    assert_eq!(
        RespParser::encode(&RespValue::err("ERR invalid password")),
        b"-ERR invalid password\r\n".to_vec()
    );
}

#[test]
fn test_frame_complete_deep_nesting_uses_no_stack() {
    // Far deeper than a small thread stack could recurse
    let handle = std::thread::Builder::new()
        .stack_size(128 * 1024)
        .spawn(|| {
            let mut nested = b"*1\r\n".repeat(200_000);
            let open = RespParser::frame_complete(&nested);
            nested.extend_from_slice(b":1\r\n");
            (open, RespParser::frame_complete(&nested))
        })
        .unwrap();
    assert_eq!(handle.join().unwrap(), (false, true));
}

#[test]
fn test_parse_rejects_excess_nesting() {
    let mut shallow = b"*1\r\n".repeat(10);
    shallow.extend_from_slice(b":1\r\n");
    assert!(RespParser::parse(&shallow).is_ok());

    let mut deep = b"*1\r\n".repeat(200_000);
    deep.extend_from_slice(b":1\r\n");
    assert!(matches!(
        RespParser::parse(&deep),
        Err(RespError::Invalid(msg)) if msg.contains(&MAX_NESTING.to_string())
    ));
}

#[test]
fn test_scanner_resumes_as_buffer_grows() {
    let request = b"*3\r\n$4\r\nSADD\r\n$7\r\nworkers\r\n$2\r\nw1\r\n";
    let mut scanner = FrameScanner::new();

    for end in 0..request.len() {
        assert!(!scanner.is_complete(&request[..end]), "complete at {}", end);
    }
    assert!(scanner.is_complete(request));
}

#[test]
fn test_scanner_null_and_negative_lengths() {
    assert!(FrameScanner::new().is_complete(b"*-1\r\n"));
    assert!(FrameScanner::new().is_complete(b"$-1\r\n"));
    assert!(FrameScanner::new().is_complete(b"*2\r\n$-1\r\n*0\r\n"));
    // Invalid input is handed on rather than waited for
    assert!(FrameScanner::new().is_complete(b"$-5\r\n"));
    assert!(FrameScanner::new().is_complete(b"*1\r\n$3\r\nfooXX"));
    assert!(!FrameScanner::new().is_complete(b"$4000000000\r\nabc"));
}
