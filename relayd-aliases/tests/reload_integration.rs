use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use relayd_aliases::{
    AliasRecord, AliasSource, AliasTable, FetchError, FetchResult, HttpAliasSource,
    ReloadCoordinator, ReloadTrigger,
};
use relayd_common::Signal;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::broadcast,
};

/// Serves each canned `(status line, body)` to one connection, in order.
async fn http_fixture(responses: Vec<(&'static str, &'static str)>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.unwrap();

            let mut request = Vec::new();
            let mut buf = [0; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        }
    });

    addr
}

/// Hands out queued results and counts calls.
#[derive(Default)]
struct ScriptedSource {
    results: Mutex<VecDeque<FetchResult<Vec<AliasRecord>>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn with(results: Vec<FetchResult<Vec<AliasRecord>>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AliasSource for ScriptedSource {
    async fn fetch(&self) -> FetchResult<Vec<AliasRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Other("script exhausted".to_string())))
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn http_source_parses_listing() {
    let addr = http_fixture(vec![(
        "200 OK",
        "bob@a.com bob@b.com\nbroken\n alice@a.com alice@b.com\ncarol@a.com\t carol@c.org\n",
    )])
    .await;

    let source = HttpAliasSource::new(format!("http://{addr}/aliases")).unwrap();
    let records = source.fetch().await.unwrap();

    assert_eq!(
        records,
        vec![
            AliasRecord::new("bob@a.com", "bob@b.com"),
            AliasRecord::new("carol@a.com", "carol@c.org"),
        ]
    );
}

#[tokio::test]
async fn http_source_rejects_non_ok_status() {
    let addr = http_fixture(vec![("404 Not Found", "bob@a.com bob@b.com\n")]).await;

    let source = HttpAliasSource::new(format!("http://{addr}/aliases")).unwrap();
    let err = source.fetch().await.unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 404, .. }), "{err}");
}

#[tokio::test]
async fn http_source_reports_transport_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let source = HttpAliasSource::new(format!("http://{addr}/aliases")).unwrap();
    let err = source.fetch().await.unwrap_err();

    assert!(matches!(err, FetchError::Transport { .. }), "{err}");
}

#[tokio::test]
async fn http_source_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _silent = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let source =
        HttpAliasSource::with_timeout(format!("http://{addr}/aliases"), Duration::from_millis(200))
            .unwrap();
    let err = source.fetch().await.unwrap_err();

    assert!(matches!(err, FetchError::Transport { .. }), "{err}");
}

#[tokio::test]
async fn failed_refresh_keeps_previous_table() {
    let source = ScriptedSource::with(vec![
        Ok(vec![AliasRecord::new("bob@a.com", "bob@b.com")]),
        Err(FetchError::Other("connection reset".to_string())),
    ]);
    let table = Arc::new(AliasTable::new());
    let coordinator = ReloadCoordinator::new(
        source.clone(),
        Arc::clone(&table),
        ReloadCoordinator::DEFAULT_PERIOD,
    );

    assert_eq!(coordinator.refresh(ReloadTrigger::Startup).await.unwrap(), 1);
    let before = table.lookup("bob@a.com");

    assert!(coordinator.refresh(ReloadTrigger::Manual).await.is_err());

    assert_eq!(table.version(), 1);
    assert_eq!(table.lookup("bob@a.com"), before);
    assert_eq!(table.lookup("nobody@a.com"), None);
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn empty_listing_keeps_previous_table() {
    let source = ScriptedSource::with(vec![
        Ok(vec![AliasRecord::new("bob@a.com", "bob@b.com")]),
        Ok(Vec::new()),
    ]);
    let table = Arc::new(AliasTable::new());
    let coordinator = ReloadCoordinator::new(
        source.clone(),
        Arc::clone(&table),
        ReloadCoordinator::DEFAULT_PERIOD,
    );

    assert_eq!(coordinator.refresh(ReloadTrigger::Startup).await.unwrap(), 1);

    let err = coordinator.refresh(ReloadTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, FetchError::Empty), "{err}");

    assert_eq!(table.version(), 1);
    assert_eq!(
        table.lookup("bob@a.com").map(|r| r.destination().to_string()),
        Some("bob@b.com".to_string())
    );
}

#[tokio::test]
async fn listing_without_valid_lines_is_rejected() {
    let addr = http_fixture(vec![("200 OK", "broken\n\n   \n")]).await;

    let table = Arc::new(AliasTable::new());
    let coordinator = ReloadCoordinator::new(
        Arc::new(HttpAliasSource::new(format!("http://{addr}/aliases")).unwrap()),
        Arc::clone(&table),
        ReloadCoordinator::DEFAULT_PERIOD,
    );

    assert!(matches!(
        coordinator.refresh(ReloadTrigger::Startup).await,
        Err(FetchError::Empty)
    ));
    assert_eq!(table.version(), 0);
}

#[tokio::test]
async fn coordinator_refreshes_on_trigger() {
    let source = ScriptedSource::with(vec![Ok(vec![AliasRecord::new(
        "bob@a.com",
        "bob@b.com",
    )])]);
    let table = Arc::new(AliasTable::new());
    let coordinator = ReloadCoordinator::new(
        source.clone(),
        Arc::clone(&table),
        ReloadCoordinator::DEFAULT_PERIOD,
    );
    let handle = coordinator.handle();

    let (shutdown, receiver) = broadcast::channel(1);
    let running = tokio::spawn(coordinator.run(receiver));

    assert!(handle.trigger(ReloadTrigger::Manual));
    wait_for(|| table.version() == 1).await;

    assert_eq!(
        table.lookup("bob@a.com").map(|r| r.destination().to_string()),
        Some("bob@b.com".to_string())
    );
    assert_eq!(source.calls(), 1);

    shutdown.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();

    assert!(!handle.trigger(ReloadTrigger::Manual));
}

#[tokio::test(start_paused = true)]
async fn periodic_timer_publishes_refreshes() {
    let source = ScriptedSource::with(vec![
        Ok(vec![AliasRecord::new("one@a.com", "one@b.com")]),
        Ok(vec![AliasRecord::new("two@a.com", "two@b.com")]),
    ]);
    let table = Arc::new(AliasTable::new());
    let coordinator =
        ReloadCoordinator::new(source.clone(), Arc::clone(&table), Duration::from_secs(60));

    let (shutdown, receiver) = broadcast::channel(1);
    let running = tokio::spawn(coordinator.run(receiver));

    // Nothing happens before the first period has elapsed
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(source.calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    wait_for(|| table.version() == 1).await;
    assert!(table.lookup("one@a.com").is_some());

    tokio::time::sleep(Duration::from_secs(60)).await;
    wait_for(|| table.version() == 2).await;
    assert!(table.lookup("one@a.com").is_none());
    assert!(table.lookup("two@a.com").is_some());

    shutdown.send(Signal::Shutdown).unwrap();
    running.await.unwrap();
}
