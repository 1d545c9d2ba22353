//! Integration tests for the stream channel

use ipk_proto::{Message, MessageType, ReplyStatus};
use ipk_transport::{Channel, NetworkError, SendOutcome, StreamChannel};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

async fn connected_pair() -> (StreamChannel, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut channel = StreamChannel::new(listener.local_addr().unwrap());

    let (connected, accepted) = tokio::join!(channel.connect(), listener.accept());
    connected.unwrap();
    let (server, _) = accepted.unwrap();

    (channel, server)
}

#[tokio::test]
async fn test_send_writes_one_text_frame() {
    let (mut channel, mut server) = connected_pair().await;

    let auth = Message::Auth {
        username: "alice".to_string(),
        display_name: "Alice".to_string(),
        secret: "secret123".to_string(),
    };
    assert_eq!(channel.send(&auth).await.unwrap(), SendOutcome::Sent);

    let expected = b"AUTH alice AS Alice USING secret123\r\n";
    let mut buf = vec![0u8; expected.len()];
    timeout(Duration::from_secs(5), server.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(buf, expected);
}

#[tokio::test]
async fn test_frame_split_across_reads() {
    let (mut channel, mut server) = connected_pair().await;
    let (first_seen_tx, first_seen_rx) = oneshot::channel();

    let server_task = tokio::spawn(async move {
        server.write_all(b"MSG FROM a").await.unwrap();
        first_seen_rx.await.unwrap();
        server.write_all(b" IS hi\r\n").await.unwrap();
        server
    });

    channel.receive().await.unwrap();
    let partial = channel.process().await.unwrap();
    assert!(partial.incomplete);
    first_seen_tx.send(()).unwrap();

    channel.receive().await.unwrap();
    let complete = channel.process().await.unwrap();
    assert!(!complete.incomplete);
    assert_eq!(complete.message_type, MessageType::Msg);
    assert_eq!(complete.content, "a: hi");

    server_task.await.unwrap();
}

#[tokio::test]
async fn test_coalesced_frames_decode_one_by_one() {
    let (mut channel, mut server) = connected_pair().await;

    server
        .write_all(b"REPLY OK IS Joined.\r\nMSG FROM Bob IS hey\r\n")
        .await
        .unwrap();

    // Both frames may need more than one read on a busy machine
    let mut decoded = Vec::new();
    while decoded.len() < 2 {
        channel.receive().await.unwrap();
        loop {
            let response = channel.process().await.unwrap();
            if response.incomplete {
                break;
            }
            decoded.push(response);
        }
    }

    assert_eq!(decoded[0].status, Some(ReplyStatus::Ok));
    assert_eq!(decoded[0].content, "Action Success: Joined.");
    assert_eq!(decoded[1].content, "Bob: hey");
}

#[tokio::test]
async fn test_malformed_frame_is_protocol_error() {
    let (mut channel, mut server) = connected_pair().await;

    server.write_all(b"HELLO FROM nowhere\r\n").await.unwrap();
    channel.receive().await.unwrap();

    assert!(matches!(
        channel.process().await,
        Err(NetworkError::Protocol(_))
    ));
}

#[tokio::test]
async fn test_server_close_is_reported() {
    let (mut channel, server) = connected_pair().await;
    drop(server);

    assert!(matches!(
        channel.receive().await,
        Err(NetworkError::Closed)
    ));
}

#[tokio::test]
async fn test_disconnect_says_bye_and_half_closes() {
    let (mut channel, mut server) = connected_pair().await;

    channel.disconnect("Alice").await.unwrap();

    let mut received = Vec::new();
    timeout(Duration::from_secs(5), server.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, b"BYE FROM Alice\r\n");
}

#[tokio::test]
async fn test_send_before_connect_fails() {
    let mut channel = StreamChannel::new("127.0.0.1:9".parse().unwrap());
    let bye = Message::Bye {
        display_name: "Alice".to_string(),
    };

    assert!(matches!(
        channel.send(&bye).await,
        Err(NetworkError::NotConnected)
    ));
}

#[tokio::test]
async fn test_try_receive_does_not_wait() {
    let (mut channel, mut server) = connected_pair().await;

    assert!(!channel.try_receive().unwrap());

    server.write_all(b"MSG FROM a IS hi\r\n").await.unwrap();
    timeout(Duration::from_secs(5), channel.readable())
        .await
        .unwrap()
        .unwrap();
    while !channel.try_receive().unwrap() {
        channel.readable().await.unwrap();
    }

    let response = channel.process().await.unwrap();
    assert_eq!(response.content, "a: hi");
}
