//! Tests for log capture and Range parsing

use super::logfile::*;
use tracing_subscriber::layer::SubscriberExt;

#[test]
fn test_capture_records_events_with_level_and_fields() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());

    tracing::subscriber::with_default(subscriber, || {
        tracing::error!("something broke");
        tracing::info!(port = 6000, "listening");
    });

    let contents = capture.contents();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("ERROR"));
    assert!(lines[0].ends_with("something broke"));
    assert!(lines[1].contains(" INFO "));
    assert!(lines[1].contains("listening port=6000"));
}

#[test]
fn test_capture_is_bounded() {
    let capture = LogCapture::new(3);

    for i in 0..5 {
        capture.push(format!("line {}", i));
    }

    assert_eq!(capture.len(), 3);
    assert_eq!(capture.contents(), "line 2\nline 3\nline 4\n");
}

#[test]
fn test_capture_outside_subscriber_sees_nothing() {
    let capture = LogCapture::default();

    tracing::error!("not captured");

    assert!(capture.is_empty());
}

#[test]
fn test_parse_byte_ranges() {
    assert_eq!(
        ByteRange::parse("bytes=0-99"),
        Some(ByteRange::From {
            start: 0,
            end: Some(99)
        })
    );
    assert_eq!(
        ByteRange::parse("bytes=100-"),
        Some(ByteRange::From {
            start: 100,
            end: None
        })
    );
    assert_eq!(ByteRange::parse("bytes=-20"), Some(ByteRange::Suffix(20)));
    assert_eq!(ByteRange::parse("bytes=0-1,5-6"), None);
    assert_eq!(ByteRange::parse("items=0-1"), None);
    assert_eq!(ByteRange::parse("bytes=x-1"), None);
}

#[test]
fn test_resolve_byte_ranges() {
    assert_eq!(
        ByteRange::From {
            start: 2,
            end: Some(5)
        }
        .resolve(10),
        Some((2, 5))
    );
    assert_eq!(
        ByteRange::From {
            start: 2,
            end: Some(500)
        }
        .resolve(10),
        Some((2, 9))
    );
    assert_eq!(
        ByteRange::From {
            start: 10,
            end: None
        }
        .resolve(10),
        None
    );
    assert_eq!(ByteRange::Suffix(3).resolve(10), Some((7, 9)));
    assert_eq!(ByteRange::Suffix(30).resolve(10), Some((0, 9)));
    assert_eq!(ByteRange::Suffix(3).resolve(0), None);
}
