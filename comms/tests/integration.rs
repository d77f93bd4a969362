use std::{net::SocketAddr, time::Duration};

use comms::{MAX_MSG_LEN, Router, msg};
use tokio::{
    io::{self, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time,
};

#[tokio::test]
async fn send_recv() {
    const SIZE: usize = 128;

    let msg = vec![b"Hello".to_vec(), Vec::new(), b", world!".to_vec()];

    let (one, two) = io::duplex(SIZE);
    let (rx, tx) = io::split(one);
    let (_, mut tx) = comms::channel(rx, tx);

    let (two_rx, two_tx) = io::split(two);
    let (mut rx, _) = comms::channel(two_rx, two_tx);

    let (sent, received) = tokio::join!(tx.send(&msg), rx.recv());
    sent.unwrap();
    assert_eq!(received.unwrap(), msg);
}

#[tokio::test]
async fn back_to_back_messages_keep_their_boundaries() {
    let (one, two) = io::duplex(16);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut tx) = comms::channel(io::empty(), tx);
    let (mut rx, _) = comms::channel(rx, io::sink());

    let writer = tokio::spawn(async move {
        for i in 0..10u32 {
            tx.send(&vec![msg::encode_id(i); i as usize]).await.unwrap();
        }
    });

    for i in 0..10u32 {
        let frames = rx.recv().await.unwrap();
        assert_eq!(frames.len(), i as usize);
        assert!(frames.iter().all(|f| msg::decode_id(f).unwrap() == i));
    }

    writer.await.unwrap();
}

#[tokio::test]
async fn recv_survives_being_cancelled_mid_message() {
    let (one, two) = io::duplex(64);
    let (_, mut raw) = io::split(one);
    let (rx, _) = io::split(two);
    let (mut rx, _) = comms::channel(rx, io::sink());

    // Encode a message by hand and deliver only half of it.
    let (mut wire_rx, wire_tx) = io::duplex(64);
    let (_, mut tx) = comms::channel(io::empty(), wire_tx);
    let msg = vec![b"adieu".to_vec(), msg::encode_id(3)];
    tx.send(&msg).await.unwrap();
    drop(tx);

    let mut bytes = Vec::new();
    wire_rx.read_to_end(&mut bytes).await.unwrap();

    let (head, tail) = bytes.split_at(bytes.len() / 2);
    raw.write_all(head).await.unwrap();

    tokio::select! {
        biased;
        _ = rx.recv() => panic!("a half message must not be delivered"),
        _ = tokio::task::yield_now() => {}
    }

    raw.write_all(tail).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), msg);
}

#[tokio::test]
async fn eof_is_reported_as_unexpected() {
    let (one, two) = io::duplex(16);
    drop(one);
    let (rx, _) = io::split(two);
    let (mut rx, _) = comms::channel(rx, io::sink());

    let err = rx.recv().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn oversized_headers_are_rejected_before_allocating() {
    for len in [MAX_MSG_LEN as u64 + 1, 1 << 45, u64::MAX] {
        let (one, two) = io::duplex(64);
        let (_, mut raw) = io::split(one);
        let (rx, _) = io::split(two);
        let (mut rx, _) = comms::channel(rx, io::sink());

        raw.write_all(&len.to_be_bytes()).await.unwrap();
        raw.write_all(&[0; 16]).await.unwrap();

        let err = rx.recv().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}

#[tokio::test]
async fn router_prepends_and_routes_by_peer() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut router = Router::bind(addr, 1).await.unwrap();
    let addr = router.local_addr();

    let (mut a_rx, mut a_tx) = comms::connect(addr).await.unwrap();
    let (mut b_rx, mut b_tx) = comms::connect(addr).await.unwrap();

    a_tx.send(&vec![b"from a".to_vec()]).await.unwrap();
    let a = router.recv().await.unwrap();
    b_tx.send(&vec![b"from b".to_vec()]).await.unwrap();
    let b = router.recv().await.unwrap();

    assert_ne!(a.peer, b.peer);
    assert_eq!(a.msg, vec![b"from a".to_vec()]);
    assert_eq!(b.msg, vec![b"from b".to_vec()]);

    router.send(b.peer, &vec![b"to b".to_vec()]).await.unwrap();
    router.send(a.peer, &vec![b"to a".to_vec()]).await.unwrap();

    assert_eq!(a_rx.recv().await.unwrap(), vec![b"to a".to_vec()]);
    assert_eq!(b_rx.recv().await.unwrap(), vec![b"to b".to_vec()]);
}

#[tokio::test]
async fn router_refuses_unknown_peers() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut router = Router::bind(addr, 1).await.unwrap();

    let err = router.send(42, &vec![Vec::new()]).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
}

#[tokio::test]
async fn router_forgets_peers_that_left() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut router = Router::bind(addr, 1).await.unwrap();
    let addr = router.local_addr();

    let (a_rx, mut a_tx) = comms::connect(addr).await.unwrap();
    let (_b_rx, mut b_tx) = comms::connect(addr).await.unwrap();

    a_tx.send(&vec![b"from a".to_vec()]).await.unwrap();
    let a = router.recv().await.unwrap();
    b_tx.send(&vec![b"from b".to_vec()]).await.unwrap();
    let b = router.recv().await.unwrap();
    assert_eq!(router.peers(), 2);

    drop((a_rx, a_tx));

    // Nothing else is sent, so this only handles the departure.
    assert!(time::timeout(Duration::from_millis(200), router.recv()).await.is_err());
    assert_eq!(router.peers(), 1);

    let err = router.send(a.peer, &vec![Vec::new()]).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotConnected);
    router.send(b.peer, &vec![Vec::new()]).await.unwrap();
}

#[tokio::test]
async fn router_drops_peers_announcing_oversized_messages() {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut router = Router::bind(addr, 1).await.unwrap();
    let addr = router.local_addr();

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&(1u64 << 45).to_be_bytes()).await.unwrap();
    raw.write_all(&[0; 16]).await.unwrap();

    assert!(time::timeout(Duration::from_millis(200), router.recv()).await.is_err());
    assert_eq!(router.peers(), 0);

    let mut rest = Vec::new();
    let read = time::timeout(Duration::from_secs(1), raw.read_to_end(&mut rest)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));

    let (_b_rx, mut b_tx) = comms::connect(addr).await.unwrap();
    b_tx.send(&vec![b"still here".to_vec()]).await.unwrap();
    assert_eq!(router.recv().await.unwrap().msg, vec![b"still here".to_vec()]);
}
