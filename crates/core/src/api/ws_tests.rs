use axum::extract::ws::Message;

use super::{frame_text, BuffersControl};

#[test]
fn frame_text_accepts_text_and_binary() {
    assert_eq!(frame_text(Message::Text("hi".into())).as_deref(), Some("hi"));
    assert_eq!(frame_text(Message::Binary("hi".into())).as_deref(), Some("hi"));
    assert_eq!(frame_text(Message::Ping(Vec::new().into())), None);
}

#[test]
fn subscribe_message_round_trips() -> anyhow::Result<()> {
    let parsed: BuffersControl = serde_json::from_str(r#"{"subscribe":"abc"}"#)?;
    let matched = matches!(parsed, BuffersControl::Subscribe(ref id) if id == "abc");
    assert!(matched);
    Ok(())
}

#[test]
fn unsubscribe_message_round_trips() -> anyhow::Result<()> {
    let parsed: BuffersControl = serde_json::from_str(r#"{"unsubscribe":"abc"}"#)?;
    let matched = matches!(parsed, BuffersControl::Unsubscribe(ref id) if id == "abc");
    assert!(matched);
    Ok(())
}

#[test]
fn unknown_control_message_is_rejected() {
    let parsed = serde_json::from_str::<BuffersControl>(r#"{"frobnicate":"abc"}"#);
    assert!(parsed.is_err());
}
