//! Pushed responses arrive on the client side byte for byte.

use std::sync::Arc;
use std::time::Duration;

use prefetch_proxy::cache::{CacheKey, Lookup, ResponseCache, PREFETCH_MARKER};
use prefetch_proxy::http::transport::{HttpTransport, HyperTransport};
use prefetch_proxy::lifecycle::Shutdown;
use prefetch_proxy::prefetch::request::build_prefetch_request;
use prefetch_proxy::push::{run_ingest, MemoryDialer, PushChannel, PushReceiver, SessionDialer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod common;
use common::{payload, test_config, MockOrigin, Route};

struct ClientHalf {
    cache: Arc<ResponseCache>,
    shutdown: Shutdown,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Client-side receiver and ingest loop dialing into `channel`.
fn connect(channel: &Arc<PushChannel>) -> ClientHalf {
    let config = test_config();
    let shutdown = Shutdown::new();
    let cache = Arc::new(ResponseCache::new(config.push.response_ttl()));
    let (tx, rx) = mpsc::channel(config.push.queue_capacity);

    let server = Arc::clone(channel);
    let dialer: Arc<dyn SessionDialer> =
        Arc::new(MemoryDialer::new(1 << 20, move |session| server.replace(session)));
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
    ClientHalf {
        cache,
        shutdown,
        tasks,
    }
}

async fn wait_connected(channel: &PushChannel) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !channel.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("push session connects");
}

#[tokio::test]
async fn bodies_survive_the_push_channel() {
    let sizes = [0usize, 5, 1024, 100_000];
    let mut routes = Vec::new();
    for size in sizes {
        let plain: &'static str = Box::leak(format!("/plain-{}.js", size).into_boxed_str());
        let chunked: &'static str = Box::leak(format!("/chunked-{}.js", size).into_boxed_str());
        routes.push((plain, Route::ok("application/javascript", payload(size))));
        routes.push((chunked, Route::ok("application/javascript", payload(size)).chunked()));
    }
    let origin = MockOrigin::start(routes).await;
    let transport = HyperTransport::new(&test_config().timeouts);

    let channel = Arc::new(PushChannel::new());
    let client = connect(&channel);
    wait_connected(&channel).await;

    for size in sizes {
        for kind in ["plain", "chunked"] {
            let url = origin.url(&format!("/{}-{}.js", kind, size));
            let key = CacheKey::from_url(&url);

            let mut listener = match client.cache.get_or_create_listener(&key) {
                Lookup::Miss(listener) => listener,
                Lookup::Hit(_) => panic!("{} pushed before it was fetched", url),
            };

            let response = transport
                .execute(build_prefetch_request(&url).unwrap(), CancellationToken::new())
                .await
                .unwrap();
            let sent = channel.push(&key, response).await.unwrap();
            assert_eq!(sent as usize, size, "{}", url);

            tokio::time::timeout(Duration::from_secs(5), listener.notified())
                .await
                .expect("push arrives");
            let pushed = client.cache.get(&key).expect("push is cached");
            assert_eq!(pushed.headers().get(PREFETCH_MARKER).unwrap(), "true");
            assert!(
                pushed.headers().get("transfer-encoding").is_none(),
                "{} kept a stale chunked coding",
                url
            );

            let body = pushed.into_body().collect().await.unwrap();
            assert_eq!(body.len(), size, "{}", url);
            assert_eq!(&body[..], &payload(size)[..], "{}", url);
        }
    }

    assert_eq!(client.cache.listener_count(), 0);
    client.shutdown.trigger();
    for task in client.tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn every_consumer_gets_a_full_replay() {
    let origin = MockOrigin::start(vec![(
        "/app.js",
        Route::ok("application/javascript", payload(50_000)),
    )])
    .await;
    let transport = HyperTransport::new(&test_config().timeouts);
    let channel = Arc::new(PushChannel::new());
    let client = connect(&channel);
    wait_connected(&channel).await;

    let url = origin.url("/app.js");
    let key = CacheKey::from_url(&url);
    let response = transport
        .execute(build_prefetch_request(&url).unwrap(), CancellationToken::new())
        .await
        .unwrap();
    channel.push(&key, response).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while client.cache.get(&key).is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let response = client.cache.get(&key).unwrap();
            tokio::spawn(async move { response.into_body().collect().await.unwrap() })
        })
        .collect();
    for reader in readers {
        assert_eq!(&reader.await.unwrap()[..], &payload(50_000)[..]);
    }
    client.shutdown.trigger();
}
