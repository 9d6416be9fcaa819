use std::sync::Arc;
use std::time::Duration;

use handoff_authority::routes::router;
use handoff_authority::state::AppState;
use handoff_authority::store::InMemoryTokenStore;
use handoff_client::{
    Authority, AuthorityError, ContinuationLink, HandoffConfig, HandoffSession, HandoffState,
    HttpAuthority,
};
use handoff_core::{ContinuationBase, HandoffPair, ManualClock, TokenLedger, TokenStatus};
use tokio::net::TcpListener;
use tokio::time::timeout;

async fn spawn_authority(clock: &ManualClock) -> String {
    let store = Arc::new(InMemoryTokenStore::new(
        TokenLedger::default(),
        Arc::new(clock.clone()),
    ));
    let app = router(AppState::new(
        store,
        ContinuationBase::parse("https://visa.example.com").unwrap(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn http_round_trip_maps_every_outcome() {
    let clock = ManualClock::default();
    let authority = HttpAuthority::new(spawn_authority(&clock).await);
    let pair = HandoffPair::parse("A1", "visa-pg-1").unwrap();

    assert!(authority.can_generate(&pair).await.unwrap());
    assert!(authority.active_token(&pair).await.unwrap().is_none());

    let descriptor = authority.create_token(&pair, false).await.unwrap();
    assert_eq!(descriptor.pair, pair);
    assert!(matches!(
        authority.create_token(&pair, false).await,
        Err(AuthorityError::Conflict)
    ));
    assert_eq!(
        authority.active_token(&pair).await.unwrap(),
        Some(descriptor.clone())
    );

    let other = HandoffPair::parse("A1", "visa-pg-2").unwrap();
    assert!(matches!(
        authority.token_status(&descriptor.token, &other).await,
        Err(AuthorityError::NotFound)
    ));

    let link = ContinuationLink::parse(descriptor.continuation_url.as_str()).unwrap();
    assert_eq!(link.pair, pair);
    link.redeem(&authority).await.unwrap();
    assert!(matches!(
        link.redeem(&authority).await,
        Err(AuthorityError::AlreadyUsed)
    ));

    let report = authority.token_status(&descriptor.token, &pair).await.unwrap();
    assert_eq!(report.status, TokenStatus::Used);
    assert!(matches!(
        authority.create_token(&pair, false).await,
        Err(AuthorityError::Ineligible)
    ));

    authority.reset(&pair).await.unwrap();
    assert!(authority.can_generate(&pair).await.unwrap());
}

#[tokio::test]
async fn expired_link_is_rejected_over_http() {
    let clock = ManualClock::default();
    let authority = HttpAuthority::new(spawn_authority(&clock).await);
    let pair = HandoffPair::parse("A2", "visa-pg-1").unwrap();

    let descriptor = authority.create_token(&pair, false).await.unwrap();
    clock.advance(time::Duration::minutes(10));
    let link = ContinuationLink::parse(descriptor.continuation_url.as_str()).unwrap();
    assert!(matches!(
        link.redeem(&authority).await,
        Err(AuthorityError::Expired)
    ));
}

#[tokio::test]
async fn session_observes_redemption_over_http() {
    let clock = ManualClock::default();
    let base_url = spawn_authority(&clock).await;
    let authority = Arc::new(HttpAuthority::new(base_url));
    let pair = HandoffPair::parse("A3", "visa-pg-1").unwrap();

    let session = HandoffSession::mount(
        authority.clone(),
        pair.clone(),
        HandoffConfig::default().with_poll_interval(Duration::from_millis(50)),
    )
    .await;
    let mut rx = session.subscribe();
    let descriptor = session.request_token().await.unwrap();

    // The phone only has the link.
    ContinuationLink::parse(descriptor.continuation_url.as_str())
        .unwrap()
        .redeem(authority.as_ref())
        .await
        .unwrap();

    let snapshot = timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| matches!(s.state, HandoffState::Used(_))),
    )
    .await
    .expect("redemption observed")
    .expect("session alive")
    .clone();
    assert!(!snapshot.can_generate);
    session.teardown();
}
