mod common;

use chrono::Local;
use common::{RecordingApi, group_message, harness};
use revoke_relay::api::SendPacket;
use revoke_relay::message::MessageKind;
use revoke_relay::plugins::dispatch_message;

#[tokio::test]
async fn command_replies_with_ledger_contents() {
    let root = tempfile::tempdir().unwrap();
    let h = harness(root.path(), "", RecordingApi::default()).await;
    let now = Local::now().timestamp();

    dispatch_message(&h.ctx, group_message("m1", MessageKind::Text, "hi all", now))
        .await
        .unwrap();
    let mut bob = group_message("m2", MessageKind::Text, "最后信息", now);
    bob.actual_user_id = Some("u2".to_string());
    bob.actual_user_nickname = Some("Bob".to_string());
    dispatch_message(&h.ctx, bob).await.unwrap();

    let ledger = h.plugin.last_spoken().read("g1").await.unwrap().unwrap();
    assert!(ledger.contains("【Alice】"));

    let sent = h.api.sent();
    assert_eq!(
        sent,
        vec![SendPacket::Text {
            to: "g1".to_string(),
            content: ledger
        }]
    );
}

#[tokio::test]
async fn command_without_ledger_says_no_record_yet() {
    let root = tempfile::tempdir().unwrap();
    let h = harness(root.path(), "", RecordingApi::default()).await;
    let now = Local::now().timestamp();

    // 匿名发送者不会写入最后发言记录
    let mut msg = group_message("m1", MessageKind::Text, "  最后信息 ", now);
    msg.actual_user_id = None;
    msg.actual_user_nickname = None;
    dispatch_message(&h.ctx, msg).await.unwrap();

    assert_eq!(
        h.api.sent(),
        vec![SendPacket::Text {
            to: "g1".to_string(),
            content: "当前群聊(g1)还没有生成最后发言记录文件。".to_string()
        }]
    );
}

#[tokio::test]
async fn empty_ledger_and_private_chat() {
    let root = tempfile::tempdir().unwrap();
    let h = harness(root.path(), "", RecordingApi::default()).await;
    let now = Local::now().timestamp();

    tokio::fs::write(h.plugin.last_spoken().path_for("g1"), "\n")
        .await
        .unwrap();
    let mut msg = group_message("m1", MessageKind::Text, "最后信息", now);
    msg.actual_user_id = None;
    msg.actual_user_nickname = None;
    dispatch_message(&h.ctx, msg).await.unwrap();
    assert_eq!(
        h.api.sent(),
        vec![SendPacket::Text {
            to: "g1".to_string(),
            content: "最后发言记录文件为空。".to_string()
        }]
    );

    // 私聊中的同名文本不是命令
    let mut private = group_message("m2", MessageKind::Text, "最后信息", now);
    private.is_group = false;
    dispatch_message(&h.ctx, private).await.unwrap();
    assert_eq!(h.api.sent().len(), 1);
}

#[tokio::test]
async fn help_command_replies_in_place() {
    let root = tempfile::tempdir().unwrap();
    let h = harness(root.path(), "", RecordingApi::default()).await;
    let now = Local::now().timestamp();

    let mut msg = group_message("m1", MessageKind::Text, "防撤回帮助", now);
    msg.is_group = false;
    msg.from_user_id = "wxid_friend".to_string();
    dispatch_message(&h.ctx, msg).await.unwrap();

    match h.api.sent().as_slice() {
        [SendPacket::Text { to, content }] => {
            assert_eq!(to, "wxid_friend");
            assert!(content.contains("最后信息"));
        }
        other => panic!("unexpected sends: {:?}", other),
    }
}
