use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{HttpClient, HttpRequest, HttpResponse, ManualClock};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use core_auth::{ClientCredentials, ClientCredentialsManager, TokenEndpoint, SPOTIFY_TOKEN_URL};
use mockall::mock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Token endpoint that answers slowly so concurrent callers overlap.
struct SlowTokenEndpoint {
    calls: AtomicUsize,
}

#[async_trait]
impl HttpClient for SlowTokenEndpoint {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: Bytes::from(format!(
                r#"{{"access_token":"tok-{}","token_type":"Bearer","expires_in":3600}}"#,
                n
            )),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_refresh() {
    let http = Arc::new(SlowTokenEndpoint {
        calls: AtomicUsize::new(0),
    });
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let manager = Arc::new(
        ClientCredentialsManager::new(http.clone(), clock.clone()).with_provider(
            "spotify",
            TokenEndpoint::new(SPOTIFY_TOKEN_URL, ClientCredentials::new("id", "secret")),
        ),
    );

    let tokens = futures::future::join_all((0..16).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.access_token("spotify").await })
    }))
    .await;

    assert_eq!(http.calls.load(Ordering::SeqCst), 1);
    for token in tokens {
        assert_eq!(token.unwrap().unwrap(), "tok-1");
    }

    // Past the refresh buffer: one more exchange for the whole burst.
    clock.advance(chrono::Duration::seconds(3600));
    let tokens = futures::future::join_all((0..16).map(|_| {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.access_token("spotify").await })
    }))
    .await;

    assert_eq!(http.calls.load(Ordering::SeqCst), 2);
    for token in tokens {
        assert_eq!(token.unwrap().unwrap(), "tok-2");
    }
}

mock! {
    pub Http {}

    #[async_trait]
    impl HttpClient for Http {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
    }
}

#[tokio::test]
async fn failed_exchange_is_not_cached() {
    let mut http = MockHttp::new();
    let mut seq = mockall::Sequence::new();
    http.expect_execute()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(HttpResponse {
                status: 401,
                headers: HashMap::new(),
                body: Bytes::from_static(br#"{"error":"invalid_client"}"#),
            })
        });
    http.expect_execute()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: Bytes::from_static(br#"{"access_token":"tok-ok","expires_in":3600}"#),
            })
        });

    let manager = ClientCredentialsManager::new(
        Arc::new(http),
        Arc::new(ManualClock::new(Utc::now())),
    )
    .with_provider(
        "spotify",
        TokenEndpoint::new(SPOTIFY_TOKEN_URL, ClientCredentials::new("id", "secret")),
    );

    assert!(manager.access_token("spotify").await.is_err());
    assert_eq!(manager.access_token("spotify").await.unwrap(), "tok-ok");
}
