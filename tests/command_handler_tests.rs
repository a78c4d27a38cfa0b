mod common;

use common::*;
use vtcbus::command::*;
use vtcbus::config::{ConfigKey, ConfigStore, MemoryConfigStore};

fn handler() -> (CommandHandler, MemoryConfigStore, std::sync::Arc<vtcbus::SharedContext>) {
    let store = MemoryConfigStore::new(test_document());
    let ctx = test_context(40);
    (CommandHandler::new(Box::new(store.clone()), ctx.clone()), store, ctx)
}

#[test]
fn test_decode_known_commands() {
    assert_eq!(decode_command(br#"{"CMD":"RST"}"#).unwrap(), Command::Reset);
    assert_eq!(decode_command(br#"{"CMD":"PNG"}"#).unwrap(), Command::Ping);

    match decode_command(br#"{"CMD":"CNFG","CNFG":{"SITE":"south"}}"#).unwrap() {
        Command::Reconfigure(fields) => assert_eq!(fields["SITE"], "south"),
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn test_decode_unknown_or_missing_keyword() {
    assert_eq!(
        decode_command(br#"{"CMD":"XYZ"}"#).unwrap(),
        Command::Unknown(Some("XYZ".to_string()))
    );
    assert_eq!(decode_command(br#"{"SITE":"north"}"#).unwrap(), Command::Unknown(None));
    assert_eq!(decode_command(br#"{"CMD":7}"#).unwrap(), Command::Unknown(None));
}

#[test]
fn test_decode_rejects_malformed_payloads() {
    assert!(matches!(decode_command(b"{\"CMD\":"), Err(CommandError::InvalidPayload(_))));
    assert!(matches!(decode_command(b"[1,2,3]"), Err(CommandError::InvalidPayload(_))));
    assert!(matches!(
        decode_command(br#"{"CMD":"CNFG","CNFG":"SITE=south"}"#),
        Err(CommandError::InvalidPayload(_))
    ));
    assert!(matches!(decode_command(br#"{"CMD":"CNFG"}"#), Err(CommandError::InvalidPayload(_))));

    let oversized = format!(r#"{{"CMD":"PNG","PAD":"{}"}}"#, "x".repeat(MAX_COMMAND_SIZE));
    assert!(decode_command(oversized.as_bytes()).is_err());
}

#[test]
fn test_invalid_command_reports_without_side_effects() {
    let (mut handler, store, ctx) = handler();

    let outcome = handler.handle(br#"{"CMD":"XYZ"}"#);

    assert_eq!(
        outcome,
        CommandOutcome {
            status: Some(STATUS_INVALID_COMMAND),
            restart: false
        }
    );
    assert!(!ctx.ping_requested());
    assert_eq!(store.commits(), 0);
}

#[test]
fn test_malformed_payload_reports_error() {
    let (mut handler, store, _ctx) = handler();

    let outcome = handler.handle(b"not json at all");

    assert_eq!(outcome.status, Some(STATUS_INVALID_PAYLOAD));
    assert!(!outcome.restart);
    assert_eq!(store.commits(), 0);
}

#[test]
fn test_ping_sets_flag_silently() {
    let (mut handler, _store, ctx) = handler();

    let outcome = handler.handle(br#"{"CMD":"PNG"}"#);

    assert_eq!(outcome, CommandOutcome::default());
    assert!(ctx.ping_requested());
}

#[test]
fn test_reset_acknowledges_and_restarts() {
    let (mut handler, store, _ctx) = handler();

    let outcome = handler.handle(br#"{"CMD":"RST"}"#);

    assert_eq!(outcome.status, Some(STATUS_RESETTING));
    assert!(outcome.restart);
    assert_eq!(store.commits(), 0);
}

#[test]
fn test_reconfigure_commits_and_restarts() {
    let (mut handler, store, _ctx) = handler();

    let outcome = handler.handle(br#"{"CMD":"CNFG","CNFG":{"VTHRESHOLD":"130.0","MQTT":"10.0.0.9","COLOR":"red"}}"#);

    assert_eq!(outcome.status, Some(STATUS_RECONFIGURING));
    assert!(outcome.restart);
    assert_eq!(store.commits(), 1);

    let document = handler.store().load().unwrap();
    assert_eq!(document.get(ConfigKey::VoltageThreshold), Some("130.0"));
    assert_eq!(document.get(ConfigKey::Mqtt), Some("10.0.0.9"));
    assert_eq!(document.get(ConfigKey::Site), Some("north"));
}

#[test]
fn test_command_wire_form() {
    assert_eq!(Command::Ping.to_json().to_string(), r#"{"CMD":"PNG"}"#);
    assert_eq!(Command::Reset.to_json().to_string(), r#"{"CMD":"RST"}"#);

    let wire = Command::Reconfigure(
        serde_json::json!({ "SITE": "south" }).as_object().cloned().unwrap(),
    )
    .to_json()
    .to_string();
    assert_eq!(decode_command(wire.as_bytes()).unwrap(), Command::Reconfigure(
        serde_json::json!({ "SITE": "south" }).as_object().cloned().unwrap(),
    ));
}
