//! End-to-end resolver flows against a mocked weather endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nowcast_core::provider::openmeteo::OpenMeteoProvider;
use nowcast_core::{
    Coordinate, ErrorKind, LocatedPosition, LocationSource, LocationWeatherResolver,
    ResolutionState, Timeouts, WeatherProvider, WeatherSnapshot,
};

const VALID_BODY: &str = r#"{
    "current": {
        "time": "2024-08-07T12:00",
        "temperature_2m": 18.3,
        "apparent_temperature": 17.9,
        "relative_humidity_2m": 72,
        "weather_code": 3,
        "wind_speed_10m": 4.2
    }
}"#;

#[derive(Debug)]
struct FixedLocation;

#[async_trait]
impl LocationSource for FixedLocation {
    async fn locate(&self) -> Result<LocatedPosition, ErrorKind> {
        // Small delay so subscribers can observe the Locating state.
        tokio::time::sleep(Duration::from_millis(25)).await;
        let coordinate = Coordinate::new(37.7749, -122.4194)?;
        Ok(LocatedPosition::with_place(
            coordinate,
            "San Francisco, United States",
        ))
    }
}

#[derive(Debug)]
struct DeniedLocation;

#[async_trait]
impl LocationSource for DeniedLocation {
    async fn locate(&self) -> Result<LocatedPosition, ErrorKind> {
        Err(ErrorKind::LocationUnavailable("permission denied".into()))
    }
}

#[derive(Debug)]
struct HangingLocation;

#[async_trait]
impl LocationSource for HangingLocation {
    async fn locate(&self) -> Result<LocatedPosition, ErrorKind> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ErrorKind::LocationUnavailable("never answers".into()))
    }
}

#[derive(Debug)]
struct StubWeather;

#[async_trait]
impl WeatherProvider for StubWeather {
    async fn current(&self, position: &LocatedPosition) -> Result<WeatherSnapshot, ErrorKind> {
        let now = Utc::now();
        Ok(WeatherSnapshot {
            provider: "stub".to_string(),
            location_name: position.display_name(),
            temperature_c: 20.0,
            feels_like_c: 19.5,
            condition: "Clear".to_string(),
            humidity_pct: 40,
            wind_speed_mps: 1.0,
            observation_time: now,
            fetched_at: now,
        })
    }
}

async fn mock_weather_endpoint(server: &MockServer, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "37.7749"))
        .and(query_param("longitude", "-122.4194"))
        .respond_with(template)
        .mount(server)
        .await;
}

fn resolver_for(server: &MockServer, location: Arc<dyn LocationSource>) -> Arc<LocationWeatherResolver> {
    Arc::new(LocationWeatherResolver::new(
        location,
        Arc::new(OpenMeteoProvider::with_base_url(server.uri())),
        Timeouts::default(),
    ))
}

/// Collect every observed state transition into a shared vec.
fn spawn_state_collector(
    mut rx: watch::Receiver<ResolutionState>,
) -> Arc<Mutex<Vec<ResolutionState>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            sink.lock().unwrap().push(state);
        }
    });

    seen
}

async fn wait_for_state<F>(rx: &mut watch::Receiver<ResolutionState>, pred: F)
where
    F: Fn(&ResolutionState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let state = rx.borrow_and_update().clone();
                if pred(&state) {
                    return;
                }
            }
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("expected state was never reached");
}

#[tokio::test]
async fn resolves_to_ready_and_matches_payload_exactly() {
    let server = MockServer::start().await;
    mock_weather_endpoint(
        &server,
        ResponseTemplate::new(200)
            .set_body_raw(VALID_BODY, "application/json")
            .set_delay(Duration::from_millis(25)),
    )
    .await;

    let resolver = resolver_for(&server, Arc::new(FixedLocation));
    let seen = spawn_state_collector(resolver.subscribe());

    let before = Utc::now();
    let snapshot = resolver.resolve().await.expect("resolution succeeds");

    assert_eq!(snapshot.location_name, "San Francisco, United States");
    assert_eq!(snapshot.temperature_c, 18.3);
    assert_eq!(snapshot.feels_like_c, 17.9);
    assert_eq!(snapshot.condition, "Cloudy");
    assert_eq!(snapshot.humidity_pct, 72);
    assert_eq!(snapshot.wind_speed_mps, 4.2);
    assert!(snapshot.fetched_at >= before);

    assert_eq!(resolver.state(), ResolutionState::Ready(snapshot));

    // Give the collector a beat to drain the final transition.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let states = seen.lock().unwrap().clone();
    let locating = states
        .iter()
        .position(|s| *s == ResolutionState::Locating)
        .expect("saw Locating");
    let fetching = states
        .iter()
        .position(|s| *s == ResolutionState::Fetching)
        .expect("saw Fetching");
    let ready = states
        .iter()
        .position(|s| matches!(s, ResolutionState::Ready(_)))
        .expect("saw Ready");
    assert!(locating < fetching && fetching < ready);
}

#[tokio::test]
async fn denied_location_fails_with_location_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(VALID_BODY, "application/json"))
        .expect(0)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(DeniedLocation));

    let err = resolver.resolve().await.unwrap_err();
    assert_eq!(err, ErrorKind::LocationUnavailable("permission denied".into()));
    assert!(matches!(
        resolver.state(),
        ResolutionState::Failed(ErrorKind::LocationUnavailable(_))
    ));

    server.verify().await;
}

#[tokio::test(start_paused = true)]
async fn location_timeout_maps_to_location_unavailable() {
    let resolver = Arc::new(LocationWeatherResolver::new(
        Arc::new(HangingLocation),
        Arc::new(StubWeather),
        Timeouts { locate_secs: 1, fetch_secs: 15 },
    ));

    let err = resolver.resolve().await.unwrap_err();
    assert!(matches!(err, ErrorKind::LocationUnavailable(_)));
    assert!(err.to_string().contains("1s"));
}

#[tokio::test]
async fn provider_500_fails_and_instance_stays_reusable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(VALID_BODY, "application/json"))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(FixedLocation));

    let err = resolver.resolve().await.unwrap_err();
    assert_eq!(
        err,
        ErrorKind::Provider { status: 500, message: "internal error".into() }
    );
    assert_eq!(resolver.state(), ResolutionState::Failed(err));

    // Same instance, fresh attempt, healthy endpoint.
    let snapshot = resolver.resolve().await.expect("second attempt succeeds");
    assert_eq!(snapshot.temperature_c, 18.3);
}

#[tokio::test]
async fn payload_missing_temperature_is_a_parse_failure() {
    let server = MockServer::start().await;
    let body = r#"{
        "current": {
            "time": "2024-08-07T12:00",
            "apparent_temperature": 17.9,
            "relative_humidity_2m": 72,
            "weather_code": 3,
            "wind_speed_10m": 4.2
        }
    }"#;
    mock_weather_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_raw(body, "application/json"),
    )
    .await;

    let resolver = resolver_for(&server, Arc::new(FixedLocation));

    let err = resolver.resolve().await.unwrap_err();
    assert!(matches!(err, ErrorKind::Parse(_)));
}

#[tokio::test]
async fn second_resolve_while_pending_is_busy_and_fetches_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(VALID_BODY, "application/json")
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(FixedLocation));
    let mut rx = resolver.subscribe();

    let first = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve().await })
    };

    wait_for_state(&mut rx, ResolutionState::is_pending).await;
    let err = resolver.resolve().await.unwrap_err();
    assert_eq!(err, ErrorKind::Busy);

    let snapshot = first
        .await
        .expect("task completes")
        .expect("first attempt succeeds");
    assert_eq!(snapshot.temperature_c, 18.3);

    server.verify().await;
}

#[tokio::test]
async fn cancel_during_locating_settles_cancelled_without_a_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(VALID_BODY, "application/json"))
        .expect(0)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(HangingLocation));
    let mut rx = resolver.subscribe();

    let pending = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve().await })
    };

    wait_for_state(&mut rx, |s| *s == ResolutionState::Locating).await;
    resolver.cancel();

    let result = pending.await.expect("task completes");
    assert_eq!(result.unwrap_err(), ErrorKind::Cancelled);
    assert_eq!(resolver.state(), ResolutionState::Idle);

    server.verify().await;
}

#[tokio::test]
async fn cancel_during_fetching_discards_the_late_response() {
    let server = MockServer::start().await;
    mock_weather_endpoint(
        &server,
        ResponseTemplate::new(200)
            .set_body_raw(VALID_BODY, "application/json")
            .set_delay(Duration::from_millis(400)),
    )
    .await;

    let resolver = resolver_for(&server, Arc::new(FixedLocation));
    let mut rx = resolver.subscribe();

    let pending = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve().await })
    };

    wait_for_state(&mut rx, |s| *s == ResolutionState::Fetching).await;
    resolver.cancel();

    let result = pending.await.expect("task completes");
    assert_eq!(result.unwrap_err(), ErrorKind::Cancelled);
    assert_eq!(resolver.state(), ResolutionState::Idle);

    // Wait past the mocked response delay: the late payload must not
    // resurrect the attempt.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(resolver.state(), ResolutionState::Idle);
}

#[tokio::test]
async fn cancelled_instance_can_resolve_again() {
    let server = MockServer::start().await;
    mock_weather_endpoint(
        &server,
        ResponseTemplate::new(200).set_body_raw(VALID_BODY, "application/json"),
    )
    .await;

    let resolver = resolver_for(&server, Arc::new(FixedLocation));
    let mut rx = resolver.subscribe();

    let pending = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve().await })
    };
    wait_for_state(&mut rx, ResolutionState::is_pending).await;
    resolver.cancel();
    let result = pending.await.expect("task completes");
    assert_eq!(result.unwrap_err(), ErrorKind::Cancelled);

    let snapshot = resolver.resolve().await.expect("fresh attempt succeeds");
    assert_eq!(snapshot.temperature_c, 18.3);
}
