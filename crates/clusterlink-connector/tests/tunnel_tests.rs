//! Tunnel multiplexer tests

use clusterlink_connector::tunnel;
use clusterlink_connector::{CallContext, Lifetime};
use clusterlink_proto::stream::{channel, ChannelReceiver, ChannelSender};
use clusterlink_proto::{
    Duplex, FramedReceiver, FramedSender, MessageReceiver, MessageSender, TunnelMessage,
};
use std::time::Duration;
use tokio::time::timeout;

/// One side of a tunnel as the test sees it, plus the half handed to the relay
struct Peer {
    tx: ChannelSender<TunnelMessage>,
    rx: ChannelReceiver<TunnelMessage>,
}

fn peer() -> (Peer, Duplex<TunnelMessage>) {
    let (tx, relay_rx) = channel::<TunnelMessage>(4);
    let (relay_tx, rx) = channel::<TunnelMessage>(4);
    let relay_end: Duplex<TunnelMessage> = (Box::new(relay_tx), Box::new(relay_rx));
    (Peer { tx, rx }, relay_end)
}

fn frame(data: &str) -> TunnelMessage {
    TunnelMessage::new(data.as_bytes().to_vec())
}

#[tokio::test]
async fn test_frames_keep_order_per_direction() {
    let service = Lifetime::new();
    let caller_lifetime = Lifetime::new();
    let ctx = CallContext::new(&service, &caller_lifetime, "Tunnel-test");

    let (mut caller, caller_end) = peer();
    let (mut manager, manager_end) = peer();

    let relay = tunnel::relay(&ctx, caller_end, manager_end);
    let drive = async {
        for data in ["f1", "f2", "f3"] {
            caller.tx.send(frame(data)).await.unwrap();
        }
        manager.tx.send(frame("g1")).await.unwrap();

        for expected in ["f1", "f2", "f3"] {
            let got = manager.rx.recv().await.unwrap().unwrap();
            assert_eq!(got.payload, expected.as_bytes());
        }
        let got = caller.rx.recv().await.unwrap().unwrap();
        assert_eq!(got.payload, b"g1");

        caller.tx.close_send().await.unwrap();
        manager.tx.close_send().await.unwrap();

        // Each send pump half-closes its destination on the way out
        assert_eq!(manager.rx.recv().await.unwrap(), None);
        assert_eq!(caller.rx.recv().await.unwrap(), None);
    };

    timeout(Duration::from_secs(5), async { tokio::join!(relay, drive) })
        .await
        .expect("relay did not finish");
}

#[tokio::test]
async fn test_cancel_unwinds_all_pumps() {
    let service = Lifetime::new();
    let caller_lifetime = Lifetime::new();
    let ctx = CallContext::new(&service, &caller_lifetime, "Tunnel-test");

    // Neither endpoint ever closes; only cancellation can end the relay
    let (mut caller, caller_end) = peer();
    let (_manager, manager_end) = peer();

    let relay = tunnel::relay(&ctx, caller_end, manager_end);
    let cancel = async {
        caller.tx.send(frame("f1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        caller_lifetime.end("caller went away");
    };

    timeout(Duration::from_secs(2), async { tokio::join!(relay, cancel) })
        .await
        .expect("pumps did not exit after cancellation");
    assert!(!service.is_done());
}

#[tokio::test]
async fn test_stalled_consumer_does_not_block_other_direction() {
    let service = Lifetime::new();
    let caller_lifetime = Lifetime::new();
    let ctx = CallContext::new(&service, &caller_lifetime, "Tunnel-test");

    let (mut caller, caller_end) = peer();
    let (mut manager, manager_end) = peer();

    let relay = tunnel::relay(&ctx, caller_end, manager_end);
    let drive = async {
        // The caller never reads; fill everything between manager and caller
        for i in 0..16 {
            let sent = timeout(
                Duration::from_millis(50),
                manager.tx.send(frame(&format!("g{}", i))),
            )
            .await;
            if sent.is_err() {
                break;
            }
        }

        // Caller to manager keeps flowing
        caller.tx.send(frame("f1")).await.unwrap();
        let got = manager.rx.recv().await.unwrap().unwrap();
        assert_eq!(got.payload, b"f1");

        caller_lifetime.end("done");
    };

    timeout(Duration::from_secs(5), async { tokio::join!(relay, drive) })
        .await
        .expect("relay did not finish");
    drop(caller.rx);
}

#[tokio::test]
async fn test_relay_over_framed_streams() {
    let service = Lifetime::new();
    let caller_lifetime = Lifetime::new();
    let ctx = CallContext::new(&service, &caller_lifetime, "Tunnel-test");

    let (caller_io, caller_far) = tokio::io::duplex(4096);
    let (manager_io, manager_far) = tokio::io::duplex(4096);

    let (caller_read, caller_write) = tokio::io::split(caller_io);
    let (manager_read, manager_write) = tokio::io::split(manager_io);
    let caller_end: Duplex<TunnelMessage> = (
        Box::new(FramedSender::<_, TunnelMessage>::new(caller_write)),
        Box::new(FramedReceiver::<_, TunnelMessage>::new(caller_read)),
    );
    let manager_end: Duplex<TunnelMessage> = (
        Box::new(FramedSender::<_, TunnelMessage>::new(manager_write)),
        Box::new(FramedReceiver::<_, TunnelMessage>::new(manager_read)),
    );

    let (caller_far_read, caller_far_write) = tokio::io::split(caller_far);
    let (manager_far_read, manager_far_write) = tokio::io::split(manager_far);
    let mut caller_tx = FramedSender::<_, TunnelMessage>::new(caller_far_write);
    let mut caller_rx = FramedReceiver::<_, TunnelMessage>::new(caller_far_read);
    let mut manager_tx = FramedSender::<_, TunnelMessage>::new(manager_far_write);
    let mut manager_rx = FramedReceiver::<_, TunnelMessage>::new(manager_far_read);

    let relay = tunnel::relay(&ctx, caller_end, manager_end);
    let drive = async {
        caller_tx.send(frame("hello")).await.unwrap();
        let got = manager_rx.recv().await.unwrap().unwrap();
        assert_eq!(got.payload, b"hello");

        manager_tx.send(frame("world")).await.unwrap();
        let got = caller_rx.recv().await.unwrap().unwrap();
        assert_eq!(got.payload, b"world");

        // Shutting the writers down reads as end of stream on the far side
        caller_tx.close_send().await.unwrap();
        manager_tx.close_send().await.unwrap();
        assert!(manager_rx.recv().await.unwrap().is_none());
        assert!(caller_rx.recv().await.unwrap().is_none());
    };

    timeout(Duration::from_secs(5), async { tokio::join!(relay, drive) })
        .await
        .expect("relay did not finish");
}
