mod common;

use common::{at, pagarme_first_payment, pagarme_renewed, TestApp};
use serde_json::json;
use subscription_service::models::PlanType;
use subscription_service::services::SubscriptionStore;

#[tokio::test]
async fn downgrade_takes_effect_on_first_renewal_after_period_end() {
    let app = TestApp::spawn_at(at(2025, 9, 1)).await;
    app.post_pagarme(&pagarme_first_payment(
        "sub_1",
        "U1",
        "quarterly",
        19900,
        "2025-09-01T00:00:00Z",
        "2025-12-01T00:00:00Z",
    ))
    .await;
    let id = app.subscription_id("sub_1").await;

    app.clock.set(at(2025, 10, 15));
    let (status, record) = app
        .post_json(
            &format!("/subscriptions/{}/plan-change", id),
            &json!({ "plan_type": "monthly" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(record["plan_type"], "quarterly");
    assert_eq!(record["pending_change"]["plan_type"], "monthly");
    assert_eq!(
        record["pending_change"]["effective_at"],
        "2025-12-01T00:00:00Z"
    );

    // A redelivered snapshot before the boundary leaves the plan alone.
    app.clock.set(at(2025, 11, 20));
    app.post_pagarme(&pagarme_renewed(
        "sub_1",
        "2025-09-01T00:00:00Z",
        "2025-12-01T00:00:00Z",
    ))
    .await;
    let stored = app
        .store
        .find_by_provider_subscription_id("sub_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.plan_type, PlanType::Quarterly);
    assert!(stored.pending_change.is_some());

    app.clock.set(at(2025, 12, 2));
    let renewal = pagarme_renewed("sub_1", "2025-12-01T00:00:00Z", "2026-01-01T00:00:00Z");
    app.post_pagarme(&renewal).await;
    let switched = app
        .store
        .find_by_provider_subscription_id("sub_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(switched.plan_type, PlanType::Monthly);
    assert_eq!(switched.amount, PlanType::Monthly.default_amount());
    assert_eq!(switched.pending_change, None);
    assert_eq!(switched.current_period_end, Some(at(2026, 1, 1)));

    app.post_pagarme(&renewal).await;
    let again = app
        .store
        .find_by_provider_subscription_id("sub_1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again, switched);
}

#[tokio::test]
async fn plan_change_rejects_same_plan_and_unknown_plan() {
    let app = TestApp::spawn().await;
    app.post_pagarme(&pagarme_first_payment(
        "sub_1",
        "U1",
        "monthly",
        7900,
        "2025-11-01T00:00:00Z",
        "2025-12-01T00:00:00Z",
    ))
    .await;
    let id = app.subscription_id("sub_1").await;

    let (status, _) = app
        .post_json(
            &format!("/subscriptions/{}/plan-change", id),
            &json!({ "plan_type": "monthly" }),
        )
        .await;
    assert_eq!(status, 409);

    let (status, _) = app
        .post_json(
            &format!("/subscriptions/{}/plan-change", id),
            &json!({ "plan_type": "lifetime" }),
        )
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn pending_subscription_cannot_change_plan() {
    let app = TestApp::spawn().await;
    let (_, checkout) = app
        .post_json("/accounts/U1/checkout", &json!({ "plan_type": "monthly" }))
        .await;

    let (status, _) = app
        .post_json(
            &format!(
                "/subscriptions/{}/plan-change",
                checkout["id"].as_str().unwrap()
            ),
            &json!({ "plan_type": "annual" }),
        )
        .await;

    assert_eq!(status, 409);
}
