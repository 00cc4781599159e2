//! Remote rate limiting against an in-process pipeline server.
//!
//! The mock implements just enough of the REST pipeline API (`SET .. PX .. NX`,
//! `INCR`, `PEXPIRE .. NX`, `PTTL`) to exercise the shared counter path and its failure modes
//! without an external service.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{net::TcpListener, sync::Mutex};
use visio360::clock::SystemClock;
use visio360::rate_limit::{
    Backend, BackendError, CounterStore, RateLimiter, RemoteConfig, RemoteCounterStore,
};

const TOKEN: &str = "test-token";

#[derive(Default)]
struct MockStore {
    keys: Mutex<HashMap<String, (i64, Option<Instant>)>>,
    down: AtomicBool,
    slow: AtomicBool,
}

fn run_command(keys: &mut HashMap<String, (i64, Option<Instant>)>, command: &[String]) -> Value {
    let now = Instant::now();
    keys.retain(|_, (_, expires)| expires.map_or(true, |at| at > now));
    match command {
        [op, key, value, px, ms, nx] if op == "SET" && px == "PX" && nx == "NX" => {
            if keys.contains_key(key) {
                return json!({"result": null});
            }
            let (Ok(value), Ok(ms)) = (value.parse::<i64>(), ms.parse::<u64>()) else {
                return json!({"error": "ERR value is not an integer"});
            };
            keys.insert(key.clone(), (value, Some(now + Duration::from_millis(ms))));
            json!({"result": "OK"})
        }
        [op, key] if op == "INCR" => {
            let entry = keys.entry(key.clone()).or_insert((0, None));
            entry.0 += 1;
            json!({"result": entry.0})
        }
        [op, key, ms, nx] if op == "PEXPIRE" && nx == "NX" => {
            let Ok(ms) = ms.parse::<u64>() else {
                return json!({"error": "ERR value is not an integer"});
            };
            match keys.get_mut(key) {
                Some((_, expires @ None)) => {
                    *expires = Some(now + Duration::from_millis(ms));
                    json!({"result": 1})
                }
                _ => json!({"result": 0}),
            }
        }
        [op, key] if op == "PTTL" => match keys.get(key) {
            Some((_, Some(at))) => {
                let remaining = at.saturating_duration_since(now).as_millis();
                json!({"result": u64::try_from(remaining).unwrap_or(u64::MAX)})
            }
            Some((_, None)) => json!({"result": -1}),
            None => json!({"result": -2}),
        },
        _ => json!({"error": "ERR unknown command"}),
    }
}

async fn pipeline(
    State(store): State<Arc<MockStore>>,
    headers: HeaderMap,
    Json(commands): Json<Vec<Vec<String>>>,
) -> Response {
    let expected = format!("Bearer {TOKEN}");
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response();
    }
    if store.down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if store.slow.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    // One lock for the whole pipeline, like a single-threaded server.
    let mut keys = store.keys.lock().await;
    let replies: Vec<Value> = commands
        .iter()
        .map(|command| run_command(&mut keys, command))
        .collect();
    Json(replies).into_response()
}

async fn spawn_mock() -> Result<(SocketAddr, Arc<MockStore>)> {
    let store = Arc::new(MockStore::default());
    let app = Router::new()
        .route("/pipeline", post(pipeline))
        .with_state(store.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((addr, store))
}

fn remote_store(addr: SocketAddr, token: &str, timeout: Duration) -> Result<RemoteCounterStore> {
    let config = RemoteConfig::new(format!("http://{addr}"), SecretString::from(token.to_string()))
        .with_timeout(timeout);
    RemoteCounterStore::new(config, Arc::new(SystemClock))
}

#[tokio::test]
async fn concurrent_remote_checks_admit_exactly_max() -> Result<()> {
    let (addr, _store) = spawn_mock().await?;
    let remote = remote_store(addr, TOKEN, Duration::from_secs(5))?;
    let limiter = Arc::new(RateLimiter::with_remote(
        Arc::new(remote),
        Arc::new(SystemClock),
        Duration::from_secs(5),
    ));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let limiter = Arc::clone(&limiter);
        handles.push(tokio::spawn(async move {
            limiter.check("rl:burst:ip:10.0.0.1", 10, Duration::from_secs(60)).await
        }));
    }

    let mut allowed = 0;
    let mut blocked = 0;
    for handle in handles {
        let decision = handle.await?;
        assert_eq!(decision.backend, Backend::Remote);
        if decision.blocked {
            blocked += 1;
            assert!(decision.retry_after_seconds >= 1);
        } else {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 10);
    assert_eq!(blocked, 90);
    Ok(())
}

#[tokio::test]
async fn window_expiry_is_set_once() -> Result<()> {
    let (addr, store) = spawn_mock().await?;
    let remote = remote_store(addr, TOKEN, Duration::from_secs(5))?;

    let first = remote.increment("rl:t:sub:u1", Duration::from_secs(60)).await?;
    let second = remote.increment("rl:t:sub:u1", Duration::from_secs(60)).await?;
    assert_eq!(first.count, 1);
    assert_eq!(second.count, 2);
    assert!(second.reset_at_ms <= first.reset_at_ms + 1_000);

    let keys = store.keys.lock().await;
    let (count, expires) = keys.get("rl:t:sub:u1").context("key missing")?;
    assert_eq!(*count, 2);
    assert!(expires.is_some());
    Ok(())
}

#[tokio::test]
async fn key_without_expiry_gets_a_window() -> Result<()> {
    let (addr, store) = spawn_mock().await?;
    let remote = remote_store(addr, TOKEN, Duration::from_secs(5))?;
    let limiter = RateLimiter::with_remote(Arc::new(remote), Arc::new(SystemClock), Duration::ZERO);
    let window = Duration::from_millis(200);

    // Left behind when a key expires between SET and INCR.
    store
        .keys
        .lock()
        .await
        .insert("rl:otp:ip:1.2.3.4".to_string(), (5, None));

    let stuck = limiter.check("rl:otp:ip:1.2.3.4", 5, window).await;
    assert_eq!(stuck.backend, Backend::Remote);
    assert!(stuck.blocked);
    {
        let keys = store.keys.lock().await;
        let (_, expires) = keys.get("rl:otp:ip:1.2.3.4").context("key missing")?;
        assert!(expires.is_some());
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    let recovered = limiter.check("rl:otp:ip:1.2.3.4", 5, window).await;
    assert!(!recovered.blocked);
    assert_eq!(recovered.remaining, 4);
    Ok(())
}

#[tokio::test]
async fn outage_falls_back_to_memory_without_error() -> Result<()> {
    let (addr, store) = spawn_mock().await?;
    let remote = remote_store(addr, TOKEN, Duration::from_secs(5))?;
    let limiter = RateLimiter::with_remote(Arc::new(remote), Arc::new(SystemClock), Duration::ZERO);
    let window = Duration::from_secs(60);

    let before = limiter.check("rl:api:sub:u1", 3, window).await;
    assert_eq!(before.backend, Backend::Remote);

    store.down.store(true, Ordering::SeqCst);
    let during = limiter.check("rl:api:sub:u1", 3, window).await;
    assert_eq!(during.backend, Backend::Memory);
    assert!(!during.blocked);
    assert_eq!(during.remaining, 2);

    store.down.store(false, Ordering::SeqCst);
    let after = limiter.check("rl:api:sub:u1", 3, window).await;
    assert_eq!(after.backend, Backend::Remote);
    assert_eq!(after.remaining, 1);
    assert_eq!(limiter.configured_backend(), Backend::Remote);
    Ok(())
}

#[tokio::test]
async fn backend_errors_are_classified() -> Result<()> {
    let (addr, store) = spawn_mock().await?;
    let window = Duration::from_secs(60);

    let unauthorized = remote_store(addr, "wrong-token", Duration::from_secs(5))?;
    assert!(matches!(
        unauthorized.increment("k", window).await,
        Err(BackendError::Status(401))
    ));

    store.slow.store(true, Ordering::SeqCst);
    let impatient = remote_store(addr, TOKEN, Duration::from_millis(100))?;
    assert!(matches!(
        impatient.increment("k", window).await,
        Err(BackendError::Timeout)
    ));

    let closed = TcpListener::bind("127.0.0.1:0").await?.local_addr()?;
    let unreachable = remote_store(closed, TOKEN, Duration::from_secs(5))?;
    assert!(matches!(
        unreachable.increment("k", window).await,
        Err(BackendError::Transport(_))
    ));
    Ok(())
}
