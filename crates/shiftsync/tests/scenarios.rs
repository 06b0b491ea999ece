//! End-to-end retrieval against the scripted portal.

use std::sync::Arc;

use shiftsync::test_support::{
    LoginBehavior, PROVIDER_COOKIE, SESSION_COOKIE, ScriptedPortal, fast_config, schedule_page,
};
use shiftsync::{
    Credentials, MemorySessionStore, PayPeriodOption, RetrievalError, RetrievalRequest,
    ScheduleRequest, ScheduleRetriever, SessionStore, ShiftRecord,
};

const ACCOUNT: &str = "jane.doe";

struct Harness {
    portal: ScriptedPortal,
    store: Arc<MemorySessionStore>,
    retriever: ScheduleRetriever,
}

impl Harness {
    fn new(portal: ScriptedPortal) -> Self {
        let store = Arc::new(MemorySessionStore::new());
        let retriever =
            ScheduleRetriever::new(fast_config(), Arc::new(portal.clone()), store.clone())
                .expect("valid config");
        Self {
            portal,
            store,
            retriever,
        }
    }

    fn request(&self) -> RetrievalRequest {
        RetrievalRequest::new(Credentials::new(ACCOUNT, "correct-horse").unwrap())
    }
}

fn shift(day: &str, date: &str, code: &str) -> ShiftRecord {
    ShiftRecord {
        day: day.into(),
        date: date.into(),
        code: code.into(),
    }
}

#[tokio::test]
async fn scenario_a_supplied_cookies_without_period() {
    let harness = Harness::new(ScriptedPortal::new(fast_config()));
    let cookies = harness.portal.valid_cookies();

    let result = harness
        .retriever
        .retrieve(harness.request().with_cookies(cookies))
        .await
        .unwrap();

    assert_eq!(harness.portal.logins(), 0);
    assert_eq!(
        result.shifts,
        vec![
            shift("Mon", "03/03", "D1"),
            shift("Tue", "03/04", ""),
            shift("Wed", "03/05", "N2"),
            shift("Thu", "03/06", "D1"),
            shift("Sat", "03/08", "OFF"),
        ]
    );
    assert_eq!(
        result.pay_periods,
        Some(vec![
            PayPeriodOption {
                id: "202502".into(),
                is_selected: true
            },
            PayPeriodOption {
                id: "202503".into(),
                is_selected: false
            },
        ])
    );
    assert!(result.requested_period_id.is_none());
    assert!(result.refreshed_cookies.find_by_name(SESSION_COOKIE).is_some());
    assert_eq!(harness.portal.drivers_disposed(), 1);
}

#[tokio::test]
async fn scenario_b_fresh_login_persists_cookies() {
    let harness = Harness::new(ScriptedPortal::new(fast_config()));

    let result = harness.retriever.retrieve(harness.request()).await.unwrap();

    assert_eq!(harness.portal.logins(), 1);
    assert!(!result.shifts.is_empty());
    assert!(result.pay_periods.is_some());

    let stored = harness.store.get(ACCOUNT).await.unwrap().unwrap();
    assert!(stored.find_by_name(SESSION_COOKIE).is_some());
    assert!(stored.find_by_name(PROVIDER_COOKIE).is_some());
    assert_eq!(
        stored.find_by_name(SESSION_COOKIE),
        result.refreshed_cookies.find_by_name(SESSION_COOKIE)
    );
}

#[tokio::test]
async fn scenario_b_followup_call_reuses_stored_session() {
    let harness = Harness::new(ScriptedPortal::new(fast_config()));

    harness.retriever.retrieve(harness.request()).await.unwrap();
    harness.retriever.retrieve(harness.request()).await.unwrap();

    assert_eq!(harness.portal.logins(), 1);
    assert_eq!(harness.portal.drivers_created(), 2);
    assert_eq!(harness.portal.drivers_disposed(), 2);
}

#[tokio::test]
async fn scenario_c_sign_in_error_is_reported_verbatim() {
    let harness = Harness::new(
        ScriptedPortal::new(fast_config())
            .with_login(LoginBehavior::RejectPasscode("Unable to sign in".into())),
    );

    let result = harness.retriever.retrieve(harness.request()).await;

    match result {
        Err(RetrievalError::InvalidCredentials(message)) => {
            assert_eq!(message, "Unable to sign in")
        }
        other => panic!("expected InvalidCredentials, got {:?}", other),
    }
    assert!(harness.store.is_empty());
    assert_eq!(harness.portal.drivers_disposed(), 1);
}

#[tokio::test]
async fn scenario_d_stale_cookies_with_period_relogin_once() {
    let period_view = schedule_page(&[&["Mon\n02/03\nE1", "Tue\n02/04"]], &[]);
    let harness = Harness::new(
        ScriptedPortal::new(fast_config()).with_period("202502", period_view),
    );
    let stale = harness.portal.stale_cookies();

    let result = harness
        .retriever
        .retrieve(
            harness
                .request()
                .with_cookies(stale.clone())
                .with_period("202502"),
        )
        .await
        .unwrap();

    assert_eq!(harness.portal.logins(), 1);
    assert_eq!(
        result.shifts,
        vec![shift("Mon", "02/03", "E1"), shift("Tue", "02/04", "")]
    );
    assert_eq!(result.requested_period_id.as_deref(), Some("202502"));
    assert!(result.pay_periods.is_none());

    let refreshed = result.refreshed_cookies.find_by_name(SESSION_COOKIE).unwrap();
    let old = stale.find_by_name(SESSION_COOKIE).unwrap();
    assert_ne!(refreshed.value, old.value);

    let period_url = fast_config().period_url("202502");
    let visits = harness
        .portal
        .navigations()
        .iter()
        .filter(|url| **url == period_url)
        .count();
    assert_eq!(visits, 2);
    assert_eq!(harness.portal.drivers_disposed(), 1);
}

#[tokio::test]
async fn scenario_e_header_only_table_is_schedule_not_found() {
    let header_only = r#"<html><body><table border="1"><tr><th>Mon</th><th>Tue</th></tr></table></body></html>"#;
    let harness = Harness::new(ScriptedPortal::new(fast_config()).with_default_view(header_only));
    let cookies = harness.portal.valid_cookies();

    let result = harness
        .retriever
        .retrieve(harness.request().with_cookies(cookies))
        .await;

    assert!(matches!(result, Err(RetrievalError::ScheduleNotFound)));
    assert_eq!(harness.portal.drivers_disposed(), 1);
}

#[tokio::test]
async fn access_forbidden_disposes_driver() {
    let harness = Harness::new(ScriptedPortal::new(fast_config()).with_login(
        LoginBehavior::Forbidden {
            code: Some("403".into()),
            title: Some("Access Forbidden".into()),
        },
    ));

    let result = harness.retriever.retrieve(harness.request()).await;

    assert!(matches!(result, Err(RetrievalError::AccessDenied { .. })));
    assert_eq!(harness.portal.drivers_created(), 1);
    assert_eq!(harness.portal.drivers_disposed(), 1);
}

#[tokio::test]
async fn wire_request_round_trip() {
    let harness = Harness::new(ScriptedPortal::new(fast_config()));
    let cookies = serde_json::to_value(harness.portal.valid_cookies()).unwrap();

    let request: ScheduleRequest = serde_json::from_value(serde_json::json!({
        "identifier": ACCOUNT,
        "secret": "correct-horse",
        "cookies": cookies,
    }))
    .unwrap();
    let result = harness.retriever.fetch(request).await.unwrap();

    let body = serde_json::to_value(&result).unwrap();
    let keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys.len(), 3);
    assert!(body.get("shifts").is_some());
    assert!(body.get("payPeriods").is_some());
    assert!(body.get("cookies").is_some());
    assert!(body.get("payPeriod").is_none());
}

#[tokio::test]
async fn concurrent_calls_use_separate_drivers() {
    let harness = Arc::new(Harness::new(ScriptedPortal::new(fast_config())));

    let mut handles = Vec::new();
    for i in 0..4 {
        let harness = Arc::clone(&harness);
        handles.push(tokio::spawn(async move {
            let credentials = Credentials::new(format!("user{}", i), "pw").unwrap();
            harness
                .retriever
                .retrieve(RetrievalRequest::new(credentials))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(harness.portal.drivers_created(), 4);
    assert_eq!(harness.portal.drivers_disposed(), 4);
    assert_eq!(harness.portal.logins(), 4);
    assert_eq!(harness.store.len(), 4);
}
