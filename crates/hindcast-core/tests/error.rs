//! Tests for error handling

use hindcast_core::error::{HindcastError, HindcastResult};
use hindcast_core::version;

#[test]
fn test_attach_refused_display()
{
    let error = HindcastError::AttachRefused(5);
    let message = format!("{}", error);
    assert!(message.contains("attach refused"));
    assert!(message.contains('5'));
}

#[test]
fn test_remote_read_display()
{
    let error = HindcastError::RemoteRead(299);
    let message = format!("{}", error);
    assert!(message.contains("remote memory read"));
    assert!(message.contains("299"));
}

#[test]
fn test_version_mismatch_names_both_versions()
{
    let error = HindcastError::VersionMismatch {
        found: version::pack(2, 5, 0, 0),
        required: version::current(),
    };
    let message = format!("{}", error);
    assert!(message.contains("2.5"));
    assert!(message.contains(&format!(
        "{}.{}",
        version::VERSION_MAJOR,
        version::VERSION_MINOR
    )));
}

#[test]
fn test_unknown_event_kind_display()
{
    let error = HindcastError::UnknownEventKind(170);
    let message = format!("{}", error);
    assert!(message.contains("unknown event kind"));
    assert!(message.contains("170"));
}

#[test]
fn test_io_error_converts()
{
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let error: HindcastError = io.into();
    match error {
        HindcastError::Io(_) => {}
        _ => panic!("Expected Io variant"),
    }
}

#[test]
fn test_result_type()
{
    // Test that the Result alias is properly usable
    let _result: HindcastResult<()> = Ok(());
    let _error_result: HindcastResult<()> = Err(HindcastError::UserAbort);
}
