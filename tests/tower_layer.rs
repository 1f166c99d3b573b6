//! RetryLayer wrapped around tower services.
use http::StatusCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use stormguard::{
    AttemptError, BackoffConfig, ClockSleeper, Jitter, ManualClock, ResponseMetadata, RetryConfig,
    RetryError, RetryLayer, Retryer,
};
use tower::{service_fn, Service, ServiceBuilder, ServiceExt};

fn retryer() -> (Retryer, ClockSleeper) {
    let clock = ManualClock::new(0);
    let sleeper = ClockSleeper::new(clock.clone());
    let backoff = BackoffConfig::builder().jitter(Jitter::none()).build().expect("valid backoff");
    let retryer = Retryer::builder()
        .config(RetryConfig::standard().with_backoff(backoff))
        .with_clock(clock)
        .with_sleeper(sleeper.clone())
        .build()
        .expect("valid config");
    (retryer, sleeper)
}

#[tokio::test]
async fn flaky_service_recovers_behind_layer() {
    let (retryer, sleeper) = retryer();
    let calls = Arc::new(AtomicU32::new(0));
    let inner = {
        let calls = calls.clone();
        service_fn(move |req: &'static str| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AttemptError::http(
                        ResponseMetadata::status(StatusCode::GATEWAY_TIMEOUT),
                        std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
                    ))
                } else {
                    Ok(req.len())
                }
            }
        })
    };

    let mut svc = ServiceBuilder::new().layer(RetryLayer::new(retryer, "backend")).service(inner);
    let len = svc.ready().await.expect("ready").call("hello").await.expect("recovers");

    assert_eq!(len, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(sleeper.calls().len(), 3);
}

#[tokio::test]
async fn client_error_passes_through_layer() {
    let (retryer, _sleeper) = retryer();
    let calls = Arc::new(AtomicU32::new(0));
    let inner = {
        let calls = calls.clone();
        service_fn(move |_req: ()| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(AttemptError::http(
                    ResponseMetadata::status(StatusCode::FORBIDDEN),
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "forbidden"),
                ))
            }
        })
    };

    let svc = ServiceBuilder::new().layer(RetryLayer::new(retryer, "backend")).service(inner);
    let err = svc.oneshot(()).await.expect_err("403 is final");

    assert!(matches!(err, RetryError::Operation(_)));
    assert_eq!(err.into_source().map(|e| e.kind()), Some(std::io::ErrorKind::PermissionDenied));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
