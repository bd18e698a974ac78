//! Push session lifecycle: failed dials, session loss, replacement.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Response;
use prefetch_proxy::cache::{CacheKey, ResponseCache};
use prefetch_proxy::http::body::Body;
use prefetch_proxy::lifecycle::Shutdown;
use prefetch_proxy::push::{
    run_ingest, MemoryDialer, MuxSession, PushChannel, PushError, PushReceiver, SessionDialer,
};
use tokio::sync::mpsc;

mod common;
use common::test_config;

/// Refuses the first `failures` dials, then connects into `channel`.
struct FlakyDialer {
    failures: u32,
    dials: AtomicU32,
    inner: MemoryDialer<Box<dyn Fn(Arc<dyn MuxSession>) + Send + Sync>>,
}

impl FlakyDialer {
    fn new(failures: u32, channel: Arc<PushChannel>) -> Self {
        let on_connect: Box<dyn Fn(Arc<dyn MuxSession>) + Send + Sync> =
            Box::new(move |session| channel.replace(session));
        Self {
            failures,
            dials: AtomicU32::new(0),
            inner: MemoryDialer::new(1 << 20, on_connect),
        }
    }

    fn dials(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionDialer for FlakyDialer {
    async fn dial(&self) -> io::Result<Arc<dyn MuxSession>> {
        let attempt = self.dials.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "server side not up"));
        }
        self.inner.dial().await
    }
}

fn spawn_client(
    dialer: Arc<FlakyDialer>,
    shutdown: &Shutdown,
) -> (Arc<ResponseCache>, Vec<tokio::task::JoinHandle<()>>) {
    let config = test_config();
    let cache = Arc::new(ResponseCache::new(config.push.response_ttl()));
    let (tx, rx) = mpsc::channel(config.push.queue_capacity);
    let receiver = PushReceiver::new(dialer, tx, &config.push);
    let tasks = vec![
        tokio::spawn(receiver.run(shutdown.subscribe())),
        tokio::spawn(run_ingest(
            Arc::clone(&cache),
            rx,
            config.push.purge_interval(),
            shutdown.subscribe(),
        )),
    ];
    (cache, tasks)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition holds within 5s");
}

fn response(body: &'static str) -> Response<Body> {
    Response::builder()
        .header("content-length", body.len())
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn receiver_keeps_dialing_until_the_server_side_answers() {
    let channel = Arc::new(PushChannel::new());
    let dialer = Arc::new(FlakyDialer::new(3, Arc::clone(&channel)));
    let shutdown = Shutdown::new();
    let (_cache, tasks) = spawn_client(Arc::clone(&dialer), &shutdown);

    eventually(|| channel.is_connected()).await;
    assert_eq!(dialer.dials(), 4);

    shutdown.trigger();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn lost_session_is_redialed_and_pushes_resume() {
    let channel = Arc::new(PushChannel::new());
    let dialer = Arc::new(FlakyDialer::new(0, Arc::clone(&channel)));
    let shutdown = Shutdown::new();
    let (cache, tasks) = spawn_client(Arc::clone(&dialer), &shutdown);
    eventually(|| channel.is_connected()).await;

    let key = CacheKey::new("http://origin.test/before.js");
    channel.push(&key, response("before")).await.unwrap();
    eventually(|| cache.get(&key).is_some()).await;

    channel.close();
    assert!(!channel.is_connected());
    assert!(matches!(
        channel.push(&key, response("dropped")).await,
        Err(PushError::NoSession)
    ));

    eventually(|| channel.is_connected()).await;
    assert_eq!(dialer.dials(), 2);

    let key = CacheKey::new("http://origin.test/after.js");
    channel.push(&key, response("after")).await.unwrap();
    eventually(|| cache.get(&key).is_some()).await;
    let body = cache.get(&key).unwrap().into_body().collect().await.unwrap();
    assert_eq!(&body[..], b"after");

    shutdown.trigger();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn replacing_the_session_closes_the_old_one() {
    let channel = PushChannel::new();
    let (first_server, first_client) = prefetch_proxy::push::memory_pair(1024);
    let first_server: Arc<dyn MuxSession> = Arc::new(first_server);
    channel.replace(Arc::clone(&first_server));
    assert!(channel.is_connected());

    let (second_server, _second_client) = prefetch_proxy::push::memory_pair(1024);
    channel.replace(Arc::new(second_server));

    assert!(first_server.is_closed());
    assert!(first_client.accept().await.unwrap().is_none());
    assert!(channel.is_connected());
}
