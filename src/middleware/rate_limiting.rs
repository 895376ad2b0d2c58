use actix_web::{
    Error, HttpMessage, HttpRequest,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderMap, HeaderName, HeaderValue},
};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use futures_util::future::{Ready, ok};
use log::{debug, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use crate::config::settings::RateLimitConfig;
use crate::error::AppError;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests, please try again later.";

/// Source of "now" for the limiter, swappable in tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(to_delta(by)).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Outcome of one limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub is_limited: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset: DateTime<Utc>,
}

impl RateLimitDecision {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(HeaderName::from_static(LIMIT_HEADER), HeaderValue::from(self.limit));
        headers.insert(HeaderName::from_static(REMAINING_HEADER), HeaderValue::from(self.remaining));
        headers.insert(HeaderName::from_static(RESET_HEADER), HeaderValue::from(self.reset.timestamp()));
    }
}

/// Sliding window limiter state: raw request timestamps per client key.
///
/// Every check records a timestamp, including checks that end up limited,
/// so a client hammering a limited endpoint keeps itself limited.
pub struct RateLimitStore {
    windows: DashMap<String, Vec<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
    max_tracked_keys: usize,
}

impl RateLimitStore {
    pub fn new(max_tracked_keys: usize) -> Self {
        Self::with_clock(Arc::new(SystemClock), max_tracked_keys)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, max_tracked_keys: usize) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            max_tracked_keys: max_tracked_keys.max(1),
        }
    }

    pub fn check(&self, key: &str, interval: Duration, limit: u64) -> RateLimitDecision {
        let now = self.clock.now();
        let window = to_delta(interval);
        let window_start = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);

        if !self.windows.contains_key(key) && self.windows.len() >= self.max_tracked_keys {
            self.make_room(window_start);
        }

        // The entry guard holds the shard lock, so concurrent checks on one key serialize here.
        let count = {
            let mut timestamps = self.windows.entry(key.to_string()).or_default();
            timestamps.retain(|&t| t > window_start);
            timestamps.push(now);
            timestamps.len() as u64
        };

        RateLimitDecision {
            is_limited: count > limit,
            limit,
            remaining: limit.saturating_sub(count),
            reset: now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Drop keys with no request inside the trailing window. Returns how many were removed.
    pub fn sweep(&self, interval: Duration) -> usize {
        let window_start = self
            .clock
            .now()
            .checked_sub_signed(to_delta(interval))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.windows.len();
        self.windows
            .retain(|_, timestamps| timestamps.iter().any(|&t| t > window_start));
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn make_room(&self, window_start: DateTime<Utc>) {
        self.windows
            .retain(|_, timestamps| timestamps.iter().any(|&t| t > window_start));
        if self.windows.len() < self.max_tracked_keys {
            return;
        }

        let stalest = self
            .windows
            .iter()
            .min_by_key(|entry| entry.value().last().copied())
            .map(|entry| entry.key().clone());
        if let Some(key) = stalest {
            debug!("Rate limit store full, evicting least recently seen key {}", key);
            self.windows.remove(&key);
        }
    }
}

/// Rate limiting middleware for one endpoint, backed by a shared store.
///
/// The middleware only arms the endpoint's window; the handler records the
/// request through [`enforce_rate_limit`] once its parameters validated, and
/// the decision's headers are copied onto whatever response comes back.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    store: Arc<RateLimitStore>,
    endpoint: String,
    interval: Duration,
    limit: u64,
}

impl RateLimitMiddleware {
    pub fn new(store: Arc<RateLimitStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            endpoint: "default".to_string(),
            interval: Duration::from_secs(config.interval_secs),
            limit: config.max_requests,
        }
    }

    /// Same store and limits, separate windows for the named endpoint.
    pub fn for_endpoint(&self, endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..self.clone()
        }
    }

    fn gate_for(&self, req: &ServiceRequest) -> RateLimitGate {
        let client_ip = extract_client_ip(req);
        RateLimitGate {
            store: self.store.clone(),
            key: format!("{}:{}", self.endpoint, client_ip),
            client_ip,
            interval: self.interval,
            limit: self.limit,
        }
    }
}

// Trusts X-Forwarded-For / X-Real-IP as set by the fronting proxy.
// The first X-Forwarded-For hop is the original client.
fn extract_client_ip(req: &ServiceRequest) -> String {
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded_for.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next().map(str::trim) {
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(real_ip_str) = real_ip.to_str() {
            return real_ip_str.trim().to_string();
        }
    }

    match req.peer_addr() {
        Some(peer_addr) => peer_addr.ip().to_string(),
        None => "anonymous".to_string(),
    }
}

/// Window armed for one request, stored in the request extensions.
#[derive(Clone)]
struct RateLimitGate {
    store: Arc<RateLimitStore>,
    key: String,
    client_ip: String,
    interval: Duration,
    limit: u64,
}

/// Records the request against its endpoint window.
///
/// Outside a rate limited resource (or for a preflight) this is a no-op.
pub fn enforce_rate_limit(req: &HttpRequest) -> Result<(), AppError> {
    let gate = req.extensions().get::<RateLimitGate>().cloned();
    let Some(gate) = gate else {
        return Ok(());
    };

    let decision = gate.store.check(&gate.key, gate.interval, gate.limit);
    let is_limited = decision.is_limited;
    let remaining = decision.remaining;
    req.extensions_mut().insert(decision);

    if is_limited {
        warn!("Rate limit exceeded for {} from IP: {}", req.path(), gate.client_ip);
        return Err(AppError::TooManyRequests(TOO_MANY_REQUESTS_MESSAGE.to_string()));
    }

    debug!(
        "Rate limit passed for {} from IP: {} ({} remaining)",
        req.path(),
        gate.client_ip,
        remaining
    );
    Ok(())
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimitService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitService {
            service: Arc::new(service),
            middleware: self.clone(),
        })
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    service: Arc<S>,
    middleware: RateLimitMiddleware,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        // Skip rate limiting for OPTIONS requests (CORS preflight)
        if req.method() != actix_web::http::Method::OPTIONS {
            let gate = self.middleware.gate_for(&req);
            req.extensions_mut().insert(gate);
        }

        Box::pin(async move {
            let mut response = service.call(req).await?;
            let decision = response.request().extensions().get::<RateLimitDecision>().cloned();
            if let Some(decision) = decision {
                decision.apply_headers(response.headers_mut());
            }
            Ok(response)
        })
    }
}

/// Periodically sweep expired client windows out of the store.
pub async fn start_memory_store_cleanup_task(
    store: Arc<RateLimitStore>,
    window_duration: Duration,
    cleanup_interval: Duration,
) {
    let mut interval = tokio::time::interval(cleanup_interval);
    info!(
        "Starting rate limit memory store cleanup task (interval: {}s)",
        cleanup_interval.as_secs()
    );

    loop {
        interval.tick().await;
        let removed = store.sweep(window_duration);
        debug!(
            "Rate limit cleanup removed {} keys, {} still tracked",
            removed,
            store.tracked_keys()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, test as actix_test, web};
    use chrono::TimeZone;
    use proptest::prelude::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn manual_store(max_keys: usize) -> (Arc<ManualClock>, RateLimitStore) {
        let clock = Arc::new(ManualClock::new(start()));
        let store = RateLimitStore::with_clock(clock.clone(), max_keys);
        (clock, store)
    }

    #[test]
    fn test_third_call_in_window_is_limited() {
        let (clock, store) = manual_store(100);

        let first = store.check("ip1", MINUTE, 2);
        clock.advance(Duration::from_millis(300));
        let second = store.check("ip1", MINUTE, 2);
        clock.advance(Duration::from_millis(300));
        let third = store.check("ip1", MINUTE, 2);

        assert!(!first.is_limited);
        assert_eq!(first.remaining, 1);
        assert!(!second.is_limited);
        assert_eq!(second.remaining, 0);
        assert!(third.is_limited);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.limit, 2);
    }

    #[test]
    fn test_reset_is_relative_to_call_time() {
        let (clock, store) = manual_store(100);
        let first = store.check("ip1", MINUTE, 5);
        assert_eq!(first.reset, start() + TimeDelta::seconds(60));

        clock.advance(Duration::from_secs(10));
        let second = store.check("ip1", MINUTE, 5);
        assert_eq!(second.reset, start() + TimeDelta::seconds(70));
    }

    #[test]
    fn test_window_slides_instead_of_resetting() {
        let (clock, store) = manual_store(100);

        store.check("ip1", MINUTE, 2);
        clock.advance(Duration::from_secs(40));
        store.check("ip1", MINUTE, 2);
        clock.advance(Duration::from_secs(10));
        assert!(store.check("ip1", MINUTE, 2).is_limited);

        // t=60s: the call at t=0 has left the window, the ones at 40s and 50s remain
        clock.advance(Duration::from_secs(10));
        let decision = store.check("ip1", MINUTE, 2);
        assert!(decision.is_limited);

        // Everything recorded so far has expired
        clock.advance(MINUTE);
        let decision = store.check("ip1", MINUTE, 2);
        assert!(!decision.is_limited);
        assert_eq!(decision.remaining, 1);
    }

    #[test]
    fn test_keys_are_isolated() {
        let (_clock, store) = manual_store(100);
        for _ in 0..3 {
            store.check("ip1", MINUTE, 2);
        }
        let other = store.check("ip2", MINUTE, 2);
        assert!(!other.is_limited);
        assert_eq!(other.remaining, 1);
    }

    #[test]
    fn test_concurrent_checks_do_not_lose_updates() {
        let (_clock, store) = manual_store(100);
        let store = Arc::new(store);
        let limit = 10u64;

        let handles: Vec<_> = (0..limit + 5)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.check("ip1", MINUTE, limit))
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|d| !d.is_limited)
            .count();

        assert_eq!(allowed as u64, limit);
    }

    #[test]
    fn test_sweep_drops_idle_keys() {
        let (clock, store) = manual_store(100);
        store.check("idle", MINUTE, 5);
        clock.advance(Duration::from_secs(45));
        store.check("active", MINUTE, 5);
        clock.advance(Duration::from_secs(30));

        assert_eq!(store.sweep(MINUTE), 1);
        assert_eq!(store.tracked_keys(), 1);
    }

    #[test]
    fn test_store_is_bounded_by_max_tracked_keys() {
        let (clock, store) = manual_store(2);
        store.check("a", MINUTE, 5);
        clock.advance(Duration::from_secs(1));
        store.check("b", MINUTE, 5);
        clock.advance(Duration::from_secs(1));
        store.check("c", MINUTE, 5);

        assert_eq!(store.tracked_keys(), 2);
        // "a" was the least recently seen and got evicted; "b" kept its history
        clock.advance(Duration::from_secs(1));
        let decision = store.check("b", MINUTE, 5);
        assert_eq!(decision.remaining, 3);
    }

    proptest! {
        #[test]
        fn prop_nth_call_limited_iff_over_limit(limit in 1u64..20, calls in 1u64..40, step_ms in 0u64..500) {
            let (clock, store) = manual_store(100);
            for n in 1..=calls {
                let decision = store.check("ip", MINUTE, limit);
                prop_assert_eq!(decision.is_limited, n > limit);
                prop_assert_eq!(decision.remaining, limit.saturating_sub(n));
                clock.advance(Duration::from_millis(step_ms));
            }
        }

        #[test]
        fn prop_expired_window_never_limits(limit in 1u64..10, calls in 1u64..30) {
            let (clock, store) = manual_store(100);
            for _ in 0..calls {
                store.check("ip", MINUTE, limit);
            }
            clock.advance(MINUTE);
            let decision = store.check("ip", MINUTE, limit);
            prop_assert!(!decision.is_limited);
            prop_assert_eq!(decision.remaining, limit - 1);
        }
    }

    async fn ping(req: HttpRequest) -> Result<HttpResponse, AppError> {
        enforce_rate_limit(&req)?;
        Ok(HttpResponse::Ok().body("pong"))
    }

    async fn strict_ping(req: HttpRequest) -> Result<HttpResponse, AppError> {
        if req.headers().get("x-token").is_none() {
            return Err(AppError::BadRequest("Missing token".to_string()));
        }
        enforce_rate_limit(&req)?;
        Ok(HttpResponse::Ok().body("pong"))
    }

    fn limiter(max_requests: u64) -> RateLimitMiddleware {
        let config = RateLimitConfig {
            max_requests,
            ..RateLimitConfig::default()
        };
        RateLimitMiddleware::new(Arc::new(RateLimitStore::new(100)), &config).for_endpoint("ping")
    }

    #[actix_rt::test]
    async fn test_middleware_sets_headers_and_rejects_over_limit() {
        let app = actix_test::init_service(
            App::new().service(web::resource("/ping").wrap(limiter(1)).route(web::get().to(ping))),
        )
        .await;

        let req = actix_test::TestRequest::get()
            .uri("/ping")
            .insert_header(("x-forwarded-for", "10.0.0.1, 172.16.0.1"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get(LIMIT_HEADER).unwrap(), "1");
        assert_eq!(resp.headers().get(REMAINING_HEADER).unwrap(), "0");
        assert!(resp.headers().contains_key(RESET_HEADER));

        let req = actix_test::TestRequest::get()
            .uri("/ping")
            .insert_header(("x-forwarded-for", "10.0.0.1"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 429);
        assert_eq!(resp.headers().get(REMAINING_HEADER).unwrap(), "0");
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("Too many requests"));

        // A different client is unaffected
        let req = actix_test::TestRequest::get()
            .uri("/ping")
            .insert_header(("x-real-ip", "10.0.0.2"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_rt::test]
    async fn test_middleware_lets_preflight_through() {
        let app = actix_test::init_service(
            App::new().service(
                web::resource("/ping")
                    .wrap(limiter(0))
                    .route(web::get().to(ping))
                    .route(web::method(actix_web::http::Method::OPTIONS).to(ping)),
            ),
        )
        .await;

        let req = actix_test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/ping")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert!(!resp.headers().contains_key(LIMIT_HEADER));
    }

    #[actix_rt::test]
    async fn test_rejected_validation_does_not_consume_the_window() {
        let app = actix_test::init_service(
            App::new().service(web::resource("/ping").wrap(limiter(1)).route(web::get().to(strict_ping))),
        )
        .await;

        for _ in 0..3 {
            let req = actix_test::TestRequest::get()
                .uri("/ping")
                .insert_header(("x-forwarded-for", "10.0.0.1"))
                .to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), 400);
            assert!(!resp.headers().contains_key(LIMIT_HEADER));
        }

        let req = actix_test::TestRequest::get()
            .uri("/ping")
            .insert_header(("x-forwarded-for", "10.0.0.1"))
            .insert_header(("x-token", "t"))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get(REMAINING_HEADER).unwrap(), "0");
    }

    #[test]
    fn test_enforce_outside_limited_resource_is_a_no_op() {
        let req = actix_test::TestRequest::default().to_http_request();
        assert!(enforce_rate_limit(&req).is_ok());
        assert!(req.extensions().get::<RateLimitDecision>().is_none());
    }
}
