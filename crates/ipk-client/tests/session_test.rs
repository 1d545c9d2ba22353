//! End-to-end session tests against scripted loopback servers

use ipk_client::{
    engine::ProtocolEngine,
    session::{ExitStatus, Session, State},
    shutdown::Shutdown,
};
use ipk_proto::{BinaryCodec, Message, ReplyStatus};
use ipk_transport::{DatagramChannel, DatagramConfig, StreamChannel, Transport};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(10);

async fn stream_engine() -> (ProtocolEngine, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let channel = StreamChannel::new(listener.local_addr().unwrap());
    let mut engine = ProtocolEngine::new(Transport::Stream(channel));

    let (connected, accepted) = tokio::join!(engine.connect(), listener.accept());
    connected.unwrap();
    (engine, accepted.unwrap().0)
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    timeout(LIMIT, reader.read_line(&mut line))
        .await
        .expect("server read timed out")
        .unwrap();
    line
}

fn text(session: &Session<Vec<u8>>) -> String {
    String::from_utf8(session.output().clone()).unwrap()
}

#[tokio::test]
async fn test_stream_auth_then_chat() {
    let (engine, server) = stream_engine().await;
    let (read_half, mut write_half) = server.into_split();

    let server_task = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let auth = read_frame(&mut reader).await;
        write_half
            .write_all(b"REPLY OK IS Auth success\r\n")
            .await
            .unwrap();
        let msg = read_frame(&mut reader).await;
        let bye = read_frame(&mut reader).await;
        (auth, msg, bye)
    });

    let input: &[u8] = b"/auth alice secret123 Alice\nhello\n";
    let (_trigger, shutdown) = Shutdown::channel();
    let mut session = Session::new(engine, Vec::new(), Duration::from_secs(5));

    let status = timeout(LIMIT, session.run(input, shutdown)).await.unwrap();
    let (auth, msg, bye) = server_task.await.unwrap();

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(session.state(), State::End);
    assert_eq!(auth, "AUTH alice AS Alice USING secret123\r\n");
    assert_eq!(msg, "MSG FROM Alice IS hello\r\n");
    assert_eq!(bye, "BYE FROM Alice\r\n");
    assert_eq!(text(&session), "Action Success: Auth success\n");
}

#[tokio::test]
async fn test_stream_rejected_auth_stays_in_start() {
    let (engine, server) = stream_engine().await;
    let (read_half, mut write_half) = server.into_split();

    let server_task = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        read_frame(&mut reader).await;
        write_half
            .write_all(b"REPLY NOK IS Bad secret\r\n")
            .await
            .unwrap();
        // No BYE follows, the session never opened
        read_frame(&mut reader).await
    });

    let input: &[u8] = b"/auth alice wrong Alice\nhello\n";
    let (_trigger, shutdown) = Shutdown::channel();
    let mut session = Session::new(engine, Vec::new(), Duration::from_secs(5));

    let status = timeout(LIMIT, session.run(input, shutdown)).await.unwrap();
    drop(session);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(server_task.await.unwrap(), "");
}

#[tokio::test]
async fn test_stream_server_error_ends_session() {
    let (engine, server) = stream_engine().await;
    let (read_half, mut write_half) = server.into_split();

    let server_task = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        read_frame(&mut reader).await;
        write_half
            .write_all(b"REPLY OK IS Welcome\r\nERR FROM Server IS go away\r\n")
            .await
            .unwrap();
        read_frame(&mut reader).await
    });

    let (mut user, input) = tokio::io::duplex(1024);
    user.write_all(b"/auth alice secret123 Alice\n").await.unwrap();

    let (_trigger, shutdown) = Shutdown::channel();
    let mut session = Session::new(engine, Vec::new(), Duration::from_secs(5));
    let status = timeout(LIMIT, session.run(BufReader::new(input), shutdown))
        .await
        .unwrap();

    assert_eq!(status, ExitStatus::ClientFailure);
    assert_eq!(session.state(), State::Error);
    assert_eq!(
        text(&session),
        "Action Success: Welcome\nERROR FROM Server: go away\n"
    );
    assert_eq!(server_task.await.unwrap(), "BYE FROM Alice\r\n");
}

#[tokio::test]
async fn test_stream_malformed_frame_is_protocol_failure() {
    let (engine, server) = stream_engine().await;
    let (read_half, mut write_half) = server.into_split();

    let server_task = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        write_half.write_all(b"HELLO THERE\r\n").await.unwrap();
        read_frame(&mut reader).await
    });

    let (_user, input) = tokio::io::duplex(1024);
    let (_trigger, shutdown) = Shutdown::channel();
    let mut session = Session::new(engine, Vec::new(), Duration::from_secs(5));
    let status = timeout(LIMIT, session.run(BufReader::new(input), shutdown))
        .await
        .unwrap();

    assert_eq!(status, ExitStatus::ProtocolFailure);
    assert!(text(&session).starts_with("ERROR: "));
    assert!(server_task
        .await
        .unwrap()
        .starts_with("ERR FROM Display_Name IS "));
}

#[tokio::test]
async fn test_reply_timeout_is_not_fatal() {
    let (engine, _server) = stream_engine().await;

    let input: &[u8] = b"/auth alice secret123 Alice\n";
    let (_trigger, shutdown) = Shutdown::channel();
    let mut session = Session::new(engine, Vec::new(), Duration::from_millis(100));

    let status = timeout(LIMIT, session.run(input, shutdown)).await.unwrap();

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(text(&session), "ERROR: No reply from server\n");
}

#[tokio::test]
async fn test_interrupt_says_goodbye() {
    let (engine, server) = stream_engine().await;
    let (read_half, mut write_half) = server.into_split();
    let (trigger, shutdown) = Shutdown::channel();

    let server_task = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        read_frame(&mut reader).await;
        write_half.write_all(b"REPLY OK IS Hi\r\n").await.unwrap();
        read_frame(&mut reader).await
    });

    let (mut user, input) = tokio::io::duplex(1024);
    user.write_all(b"/auth alice secret123 Alice\n").await.unwrap();

    let mut session = Session::new(engine, Vec::new(), Duration::from_secs(5));
    let run = session.run(BufReader::new(input), shutdown);
    let interrupt = async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.trigger();
    };

    let (status, ()) = timeout(LIMIT, async { tokio::join!(run, interrupt) })
        .await
        .unwrap();

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(server_task.await.unwrap(), "BYE FROM Alice\r\n");
}

async fn recv(socket: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; 65_535];
    let (len, from) = timeout(LIMIT, socket.recv_from(&mut buf))
        .await
        .expect("server receive timed out")
        .unwrap();
    buf.truncate(len);
    (buf, from)
}

#[tokio::test]
async fn test_datagram_auth_with_retransmission() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = DatagramConfig {
        timeout: Duration::from_millis(100),
        retransmissions: 3,
    };
    let channel = DatagramChannel::bind(server.local_addr().unwrap(), config)
        .await
        .unwrap();
    let engine = ProtocolEngine::new(Transport::Datagram(channel));

    let server_task = tokio::spawn(async move {
        // First AUTH goes unanswered
        let (first, _) = recv(&server).await;
        let (second, from) = recv(&server).await;

        server
            .send_to(&BinaryCodec::confirm(0), from)
            .await
            .unwrap();
        let reply = Message::Reply {
            status: ReplyStatus::Ok,
            ref_id: 0,
            content: "Auth success".to_string(),
        };
        server
            .send_to(&BinaryCodec::encode(&reply, 0).unwrap(), from)
            .await
            .unwrap();

        let (reply_confirm, _) = recv(&server).await;
        let (bye, from) = recv(&server).await;
        server
            .send_to(&BinaryCodec::confirm(1), from)
            .await
            .unwrap();

        (first, second, reply_confirm, bye)
    });

    let input: &[u8] = b"/auth alice secret123 Alice\n";
    let (_trigger, shutdown) = Shutdown::channel();
    let mut session = Session::new(engine, Vec::new(), Duration::from_secs(5));

    let status = timeout(LIMIT, session.run(input, shutdown)).await.unwrap();
    let (first, second, reply_confirm, bye) = server_task.await.unwrap();

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(first, second);
    assert_eq!(BinaryCodec::peek_header(&first).unwrap(), (0x02, 0));
    assert_eq!(reply_confirm, vec![0x00, 0x00, 0x00]);
    assert_eq!(BinaryCodec::peek_header(&bye).unwrap(), (0xFF, 1));
    assert_eq!(text(&session), "Action Success: Auth success\n");
}

/// Engine over a datagram channel, plus the address the server can reach it on
async fn datagram_engine(server: &UdpSocket) -> (ProtocolEngine, SocketAddr) {
    let config = DatagramConfig {
        timeout: Duration::from_millis(200),
        retransmissions: 3,
    };
    let channel = DatagramChannel::bind(server.local_addr().unwrap(), config)
        .await
        .unwrap();
    let port = channel.local_addr().unwrap().port();

    (
        ProtocolEngine::new(Transport::Datagram(channel)),
        SocketAddr::from(([127, 0, 0, 1], port)),
    )
}

#[tokio::test]
async fn test_datagram_reply_overtakes_confirm() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (engine, _) = datagram_engine(&server).await;

    let server_task = tokio::spawn(async move {
        let (_, from) = recv(&server).await;

        let reply = Message::Reply {
            status: ReplyStatus::Ok,
            ref_id: 0,
            content: "Auth success".to_string(),
        };
        server
            .send_to(&BinaryCodec::encode(&reply, 0).unwrap(), from)
            .await
            .unwrap();
        server
            .send_to(&BinaryCodec::confirm(0), from)
            .await
            .unwrap();

        let (reply_confirm, _) = recv(&server).await;
        let (bye, from) = recv(&server).await;
        server
            .send_to(&BinaryCodec::confirm(1), from)
            .await
            .unwrap();
        (reply_confirm, bye)
    });

    let input: &[u8] = b"/auth alice secret123 Alice\n";
    let (_trigger, shutdown) = Shutdown::channel();
    let mut session = Session::new(engine, Vec::new(), Duration::from_millis(1500));

    let status = timeout(LIMIT, session.run(input, shutdown)).await.unwrap();
    let (reply_confirm, bye) = server_task.await.unwrap();

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(text(&session), "Action Success: Auth success\n");
    assert_eq!(reply_confirm, vec![0x00, 0x00, 0x00]);
    assert_eq!(BinaryCodec::peek_header(&bye).unwrap(), (0xFF, 1));
}

#[tokio::test]
async fn test_datagram_duplicates_are_dispatched_once() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (engine, to_client) = datagram_engine(&server).await;

    let (_user, input) = tokio::io::duplex(1024);
    let (_trigger, shutdown) = Shutdown::channel();
    let mut session = Session::new(engine, Vec::new(), Duration::from_secs(5));

    let server_task = tokio::spawn(async move {
        let msg = Message::Msg {
            display_name: "Bob".to_string(),
            content: "hello".to_string(),
        };
        let err = Message::Err {
            display_name: "Server".to_string(),
            content: "bye".to_string(),
        };
        let msg_frame = BinaryCodec::encode(&msg, 5).unwrap();
        let err_frame = BinaryCodec::encode(&err, 6).unwrap();

        let mut confirms = Vec::new();
        for frame in [&msg_frame, &msg_frame, &err_frame, &err_frame] {
            server.send_to(frame, to_client).await.unwrap();
            if confirms.len() < 3 {
                confirms.push(recv(&server).await.0);
            }
        }
        confirms
    });

    let status = timeout(LIMIT, session.run(BufReader::new(input), shutdown))
        .await
        .unwrap();
    let confirms = server_task.await.unwrap();

    assert_eq!(status, ExitStatus::ClientFailure);
    assert_eq!(session.state(), State::Error);
    assert_eq!(text(&session), "Bob: hello\nERROR FROM Server: bye\n");
    assert_eq!(
        confirms,
        vec![vec![0x00, 0x00, 0x05], vec![0x00, 0x00, 0x05], vec![0x00, 0x00, 0x06]]
    );
}
