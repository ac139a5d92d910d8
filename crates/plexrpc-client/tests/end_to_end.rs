//! Client/server end-to-end tests over real sockets, plus duplex-backed
//! teardown tests with a scripted peer.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use plexrpc_client::{Call, Client};
use plexrpc_common::codec::{frame, CodecKind};
use plexrpc_common::{CodecRegistry, Options, PlexError};
use plexrpc_server::{Server, Service};

#[derive(Serialize, Deserialize, Default)]
struct SumArgs {
    num: i64,
    num2: i64,
}

#[derive(Serialize, Deserialize, Default)]
struct SleepArgs {
    millis: u64,
}

fn foo() -> Service {
    Service::new("Foo")
        .method("Sum", |args: SumArgs, reply: &mut i64| {
            *reply = args.num + args.num2;
            Ok(())
        })
        .method("Sleep", |args: SleepArgs, reply: &mut u64| {
            std::thread::sleep(Duration::from_millis(args.millis));
            *reply = args.millis;
            Ok(())
        })
        .method("Fail", |_: SumArgs, _: &mut i64| Err("refused".into()))
}

async fn start_server() -> SocketAddr {
    let server = Arc::new(Server::new(CodecRegistry::default()));
    server.register(foo()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        server.accept(listener).await;
    });
    addr
}

#[tokio::test]
async fn call_returns_the_matching_reply() {
    let addr = start_server().await;
    let codecs = CodecRegistry::default();
    let client = Client::dial(&addr.to_string(), None, &codecs).await.unwrap();

    let sum: i64 = client
        .call("Foo.Sum", SumArgs { num: 1, num2: 17 })
        .await
        .unwrap();
    assert_eq!(sum, 18);
    assert!(client.is_available());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_concurrent_calls_share_one_connection() {
    let addr = start_server().await;
    let codecs = CodecRegistry::default();
    let client = Client::dial(&addr.to_string(), None, &codecs).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..5i64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let sum: i64 = client
                .call("Foo.Sum", SumArgs { num: i, num2: 100 * i })
                .await
                .unwrap();
            (i, sum)
        }));
    }
    for task in tasks {
        let (i, sum) = task.await.unwrap();
        assert_eq!(sum, 101 * i);
    }
}

#[tokio::test]
async fn trace_ids_never_collide_while_pending() {
    let addr = start_server().await;
    let codecs = CodecRegistry::default();
    let client = Client::dial(&addr.to_string(), None, &codecs).await.unwrap();

    let (done, completed) = flume::bounded::<Call>(8);
    let mut trace_ids = Vec::new();
    for i in 0..8i64 {
        let trace_id = client
            .do_call("Foo.Sum", json!({"num": i, "num2": 0}), done.clone())
            .await
            .expect("registration should succeed");
        trace_ids.push(trace_id);
    }
    trace_ids.sort();
    trace_ids.dedup();
    assert_eq!(trace_ids.len(), 8);

    for _ in 0..8 {
        let call = completed.recv_async().await.unwrap();
        assert!(call.error.is_none(), "call failed: {:?}", call.error);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_call_does_not_block_fast_one() {
    let addr = start_server().await;
    let codecs = CodecRegistry::default();
    let client = Client::dial(&addr.to_string(), None, &codecs).await.unwrap();

    let (done, completed) = flume::bounded::<Call>(1);
    client
        .do_call("Foo.Sleep", json!({"millis": 400}), done)
        .await
        .unwrap();

    // the fast call completes while the slow one is still outstanding
    let sum: i64 = client
        .call("Foo.Sum", SumArgs { num: 2, num2: 3 })
        .await
        .unwrap();
    assert_eq!(sum, 5);
    assert!(completed.is_empty());

    let slow = completed.recv_async().await.unwrap();
    assert!(slow.error.is_none());
    assert_eq!(slow.reply, Some(json!(400)));
}

#[tokio::test]
async fn json_codec_is_negotiated_end_to_end() {
    let addr = start_server().await;
    let codecs = CodecRegistry::default();
    let opts = Options::with_codec(CodecKind::Json);
    let client = Client::dial(&addr.to_string(), Some(opts), &codecs)
        .await
        .unwrap();

    let sum: i64 = client
        .call("Foo.Sum", SumArgs { num: 20, num2: 22 })
        .await
        .unwrap();
    assert_eq!(sum, 42);
}

#[tokio::test]
async fn remote_errors_do_not_kill_the_connection() {
    let addr = start_server().await;
    let codecs = CodecRegistry::default();
    let client = Client::dial(&addr.to_string(), None, &codecs).await.unwrap();

    let err = client
        .call::<_, i64>("Foo.Missing", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, PlexError::Remote(_)));

    let err = client
        .call::<_, i64>("Foo.Fail", SumArgs { num: 0, num2: 0 })
        .await
        .unwrap_err();
    assert!(matches!(&err, PlexError::Remote(msg) if msg == "refused"));

    // application failures never abort the connection
    let sum: i64 = client
        .call("Foo.Sum", SumArgs { num: 3, num2: 4 })
        .await
        .unwrap();
    assert_eq!(sum, 7);
    assert!(client.is_available());
}

#[tokio::test]
async fn pending_calls_all_fail_when_the_peer_hangs_up() {
    let codecs = CodecRegistry::default();
    let (conn, mut peer) = tokio::io::duplex(64 * 1024);

    const CALLS: usize = 4;
    // scripted peer: consume the handshake and every request frame, answer
    // nothing, then hang up
    let peer_task = tokio::spawn(async move {
        frame::read_frame(&mut peer).await.unwrap();
        for _ in 0..CALLS * 2 {
            frame::read_frame(&mut peer).await.unwrap();
        }
    });

    let client = Client::new(Box::new(conn), None, &codecs).await.unwrap();
    let (done, completed) = flume::bounded::<Call>(CALLS);
    for i in 0..CALLS {
        client
            .do_call("Foo.Sum", json!({"num": i, "num2": 0}), done.clone())
            .await
            .unwrap();
    }

    peer_task.await.unwrap();

    for _ in 0..CALLS {
        let call = completed.recv_async().await.unwrap();
        let err = call.error.expect("call must carry the teardown error");
        assert!(matches!(err, PlexError::Connection(_)));
    }
    assert!(!client.is_available());

    // registration now fails synchronously, without touching the wire
    let err = client
        .call::<_, i64>("Foo.Sum", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, PlexError::Shutdown));
}

#[tokio::test]
#[should_panic(expected = "unbuffered")]
async fn unbuffered_done_sink_panics_before_registration() {
    let codecs = CodecRegistry::default();
    let (conn, _peer) = tokio::io::duplex(1024);
    let client = Client::new(Box::new(conn), None, &codecs).await.unwrap();

    let (done, _completed) = flume::bounded::<Call>(0);
    client.do_call("Foo.Sum", json!({}), done).await;
}

#[tokio::test]
async fn close_is_one_way() {
    let addr = start_server().await;
    let codecs = CodecRegistry::default();
    let client = Client::dial(&addr.to_string(), None, &codecs).await.unwrap();

    assert!(client.is_available());
    client.close().await.unwrap();
    assert!(!client.is_available());
    assert!(matches!(client.close().await, Err(PlexError::Shutdown)));

    let err = client
        .call::<_, i64>("Foo.Sum", SumArgs { num: 1, num2: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, PlexError::Shutdown));
}

#[tokio::test]
async fn dialing_with_unregistered_codec_fails_fast() {
    let mut codecs = CodecRegistry::empty();
    codecs.register(CodecKind::MsgPack, plexrpc_common::codec::MsgPackCodec::open);

    let (conn, _peer) = tokio::io::duplex(1024);
    let err = Client::new(Box::new(conn), Some(Options::with_codec(CodecKind::Json)), &codecs)
        .await
        .unwrap_err();
    assert!(matches!(err, PlexError::UnknownCodec(_)));
}
