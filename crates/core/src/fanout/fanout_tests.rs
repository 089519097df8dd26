use super::*;

#[test]
fn frame_message_has_correct_header() {
    let msg = frame_message("abc", b"payload");
    assert_eq!(msg[0], WIRE_TAG);
    let sid_len = u32::from_le_bytes([msg[1], msg[2], msg[3], msg[4]]);
    assert_eq!(sid_len, 3);
    assert_eq!(&msg[5..8], b"abc");
    assert_eq!(&msg[8..], b"payload");
}

#[tokio::test]
async fn subscribe_receives_immediate_snapshot() {
    let fanout = Fanout::new();
    fanout.publish("s1", frame_message("s1", b"frame-1"));
    let (sub, initial) = fanout.subscribe("s1");
    assert!(initial.is_some());
    let received = sub.recv().await;
    assert_eq!(received, frame_message("s1", b"frame-1"));
}

#[tokio::test]
async fn publish_fans_out_to_all_subscribers() {
    let fanout = Fanout::new();
    let (sub_a, _) = fanout.subscribe("s1");
    let (sub_b, _) = fanout.subscribe("s1");
    fanout.publish("s1", frame_message("s1", b"frame-1"));
    assert_eq!(sub_a.recv().await, frame_message("s1", b"frame-1"));
    assert_eq!(sub_b.recv().await, frame_message("s1", b"frame-1"));
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let fanout = Fanout::new();
    let (sub, _) = fanout.subscribe("s1");
    fanout.unsubscribe("s1", sub.id());
    fanout.publish("s1", frame_message("s1", b"frame-1"));
    assert_eq!(fanout.subscriber_count("s1"), 0);
}

#[tokio::test]
async fn overflow_marks_subscriber_stale() {
    let fanout = Fanout::new();
    let (sub, _) = fanout.subscribe("s1");
    for i in 0..(MAX_QUEUE + 5) {
        fanout.publish("s1", frame_message("s1", format!("frame-{i}").as_bytes()));
    }
    assert!(sub.is_stale());
}

#[test]
fn zero_subscribers_after_remove_session() {
    let fanout = Fanout::new();
    let (_sub, _) = fanout.subscribe("s1");
    fanout.remove_session("s1");
    assert_eq!(fanout.subscriber_count("s1"), 0);
}
