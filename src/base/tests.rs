use crate::base::neterror::{ErrorCategory, NetError};
use std::io;

#[test]
fn test_net_error_roundtrip() {
    // Standard Chromium error
    let original = NetError::ConnectionRefused;
    let code = original.as_i32();
    assert_eq!(code, -102);
    let converted = NetError::from(code);
    assert!(matches!(converted, NetError::ConnectionRefused));

    let too_big = NetError::from(NetError::MsgTooBig.as_i32());
    assert!(matches!(too_big, NetError::MsgTooBig));
}

#[test]
fn test_unknown_error() {
    let err = NetError::from(-9999);
    assert!(matches!(err, NetError::Unknown(-9999)));
}

#[test]
fn test_categories() {
    assert_eq!(
        NetError::InvalidArgument("Request must be GET: POST".into()).category(),
        ErrorCategory::InvalidArgument
    );
    assert_eq!(NetError::IllegalState("Closed").category(), ErrorCategory::IllegalState);
    assert_eq!(NetError::protocol("bad accept").category(), ErrorCategory::ProtocolViolation);
    assert_eq!(NetError::ConnectionReset.category(), ErrorCategory::TransportFailure);
    assert_eq!(NetError::MsgTooBig.category(), ErrorCategory::TransportFailure);
}

#[test]
fn test_io_error_mapping() {
    let eof = NetError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
    assert!(matches!(eof, NetError::ConnectionClosed));

    let reset = NetError::from(io::Error::new(io::ErrorKind::ConnectionReset, "rst"));
    assert!(matches!(reset, NetError::ConnectionReset));

    let other = NetError::from(io::Error::new(io::ErrorKind::Other, "boom"));
    assert!(matches!(other, NetError::Io(_)));
    assert_eq!(other.category(), ErrorCategory::TransportFailure);
}

#[test]
fn test_illegal_state_message() {
    assert_eq!(NetError::IllegalState("Not connected").to_string(), "Not connected");
}
