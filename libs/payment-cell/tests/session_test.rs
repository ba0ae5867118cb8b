// libs/payment-cell/tests/session_test.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;

use payment_cell::{
    AttemptDetails, AttemptStatus, CardEntryMode, CardReaderEvent, FailureCode, IntentStatus,
    PaymentError, PaymentIntent, PaymentMethod, PaymentPurpose, PaymentReceipt, PaymentSession,
    PaymentState, PaymentTimeouts, TransitionError, UpiGateway, UpiGatewayError, UpiPollStatus,
    UpiQr, UpiQrRequest,
};

mock! {
    pub Gateway {}

    #[async_trait]
    impl UpiGateway for Gateway {
        async fn create_qr(&self, request: &UpiQrRequest) -> Result<UpiQr, UpiGatewayError>;
        async fn poll_status(&self, reference: &str) -> Result<UpiPollStatus, UpiGatewayError>;
    }
}

fn intent(amount: i64) -> PaymentIntent {
    PaymentIntent::new(amount, PaymentPurpose::Settlement)
}

fn card_session() -> PaymentSession {
    PaymentSession::new(intent(50_000), PaymentTimeouts::default(), None)
}

fn qr_for(request: &UpiQrRequest) -> UpiQr {
    UpiQr {
        reference: format!("REF-{}", request.attempt_id),
        qr_payload: "upi://pay?pa=frontdesk@clinicbank".to_string(),
        deep_link: "upi://pay?pa=frontdesk@clinicbank&mode=04".to_string(),
        expires_at: Utc::now() + chrono::Duration::seconds(request.validity_seconds as i64),
    }
}

/// Gateway that issues QRs and answers polls from a fixed script; the last
/// entry repeats once the script runs out.
fn scripted_gateway(script: Vec<UpiPollStatus>) -> (Arc<MockGateway>, Arc<AtomicUsize>) {
    let polls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&polls);

    let mut gateway = MockGateway::new();
    gateway.expect_create_qr().returning(|request| Ok(qr_for(request)));
    gateway.expect_poll_status().returning(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(script[n.min(script.len() - 1)].clone())
    });
    (Arc::new(gateway), polls)
}

// ==============================================================================
// CARD
// ==============================================================================

#[tokio::test(start_paused = true)]
async fn test_card_payment_completes_from_reader_callbacks() {
    let session = card_session();

    let snapshot = session.start(PaymentMethod::Card).await.unwrap();
    assert_eq!(snapshot.state, PaymentState::Initializing);

    session.on_card_reader_event(CardReaderEvent::Connected).await.unwrap();
    session
        .on_card_reader_event(CardReaderEvent::CardDetected { entry_mode: CardEntryMode::Insert })
        .await
        .unwrap();
    let snapshot = session
        .on_card_reader_event(CardReaderEvent::Approved {
            last4: Some("4242".into()),
            auth_code: Some("A1B2C3".into()),
            rrn: Some("601234567890".into()),
        })
        .await
        .unwrap();

    assert_eq!(snapshot.state, PaymentState::Succeeded);
    assert_eq!(snapshot.intent.status, IntentStatus::Succeeded);
    let attempt = &snapshot.intent.attempts[0];
    assert_matches!(
        &attempt.details,
        Some(AttemptDetails::Card(card)) if card.entry_mode == Some(CardEntryMode::Insert)
            && card.last4.as_deref() == Some("4242")
    );

    // The cleared deadline must not fire into the finished payment.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(session.snapshot().state, PaymentState::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_card_read_deadline_times_out_the_attempt() {
    let session = card_session();
    session.start(PaymentMethod::Card).await.unwrap();
    session.on_card_reader_event(CardReaderEvent::Connected).await.unwrap();

    tokio::time::sleep(Duration::from_secs(44)).await;
    assert_eq!(session.snapshot().state, PaymentState::AwaitingInput);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, PaymentState::TimedOut);
    assert_eq!(snapshot.intent.attempts[0].status, AttemptStatus::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn test_retry_arms_a_fresh_deadline_and_keeps_history() {
    let session = card_session();
    session.start(PaymentMethod::Card).await.unwrap();
    session.on_card_reader_event(CardReaderEvent::Connected).await.unwrap();
    session
        .on_card_reader_event(CardReaderEvent::CardDetected { entry_mode: CardEntryMode::Tap })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    let failed = session
        .on_card_reader_event(CardReaderEvent::Declined {
            code: "bank_declined".into(),
            message: "05 - Do not honour".into(),
        })
        .await
        .unwrap();
    assert_eq!(failed.state, PaymentState::Failed);
    assert_eq!(failed.error.as_ref().map(|e| e.code.clone()), Some(FailureCode::BankDeclined));

    let retried = session.retry().await.unwrap();
    assert_eq!(retried.state, PaymentState::Initializing);
    assert_eq!(retried.intent.attempts.len(), 2);
    assert_eq!(retried.intent.attempts[0].status, AttemptStatus::Failed);
    assert!(retried.error.is_none());

    // First attempt's deadline (t=45s) must not land on the new attempt.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(session.snapshot().state, PaymentState::Initializing);

    // The new attempt's own deadline is t=30s+45s.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(session.snapshot().state, PaymentState::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn test_reader_reconnect_resumes_with_a_new_attempt() {
    let session = card_session();
    session.start(PaymentMethod::Card).await.unwrap();
    session.on_card_reader_event(CardReaderEvent::Connected).await.unwrap();

    let dropped = session.on_card_reader_event(CardReaderEvent::Disconnected).await.unwrap();
    assert_eq!(dropped.state, PaymentState::Failed);
    assert_eq!(dropped.error.as_ref().map(|e| e.code.clone()), Some(FailureCode::PosDisconnected));

    let resumed = session.on_card_reader_event(CardReaderEvent::Connected).await.unwrap();
    assert_eq!(resumed.state, PaymentState::AwaitingInput);
    assert_eq!(resumed.intent.attempts.len(), 2);
}

#[tokio::test]
async fn test_reader_timeout_before_start_is_rejected() {
    let session = card_session();
    let result = session.on_card_reader_event(CardReaderEvent::Timeout).await;
    assert_matches!(
        result,
        Err(PaymentError::Transition(TransitionError::Rejected { state: PaymentState::Idle, .. }))
    );
}

// ==============================================================================
// CASH
// ==============================================================================

#[tokio::test]
async fn test_cash_needs_enough_tender_and_records_change() {
    let session = PaymentSession::new(intent(45_000), PaymentTimeouts::default(), None);
    session.start(PaymentMethod::Cash).await.unwrap();

    let short = session.cash_received(40_000).await;
    assert_matches!(
        short,
        Err(PaymentError::Transition(TransitionError::InsufficientTender { tendered: 40_000, amount: 45_000 }))
    );
    assert_eq!(session.snapshot().state, PaymentState::Initializing);

    let paid = session.cash_received(50_000).await.unwrap();
    assert_eq!(paid.state, PaymentState::Succeeded);
    assert_matches!(
        &paid.intent.attempts[0].details,
        Some(AttemptDetails::Cash(cash)) if cash.change_due == 5_000
    );
}

// ==============================================================================
// UPI
// ==============================================================================

#[tokio::test]
async fn test_upi_requires_a_gateway() {
    let session = card_session();
    assert_matches!(session.start(PaymentMethod::Upi).await, Err(PaymentError::UpiUnavailable));
    assert_eq!(session.snapshot().state, PaymentState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_upi_polling_drives_the_payment_to_success() {
    let (gateway, polls) = scripted_gateway(vec![
        UpiPollStatus::Pending,
        UpiPollStatus::Scanned { payer_handle: Some("asha@okbank".into()) },
        UpiPollStatus::Success(PaymentReceipt::Upi {
            payer_handle: None,
            utr: Some("412345678901".into()),
            rrn: None,
        }),
    ]);
    let session = PaymentSession::new(intent(30_000), PaymentTimeouts::default(), Some(gateway));

    let started = session.start(PaymentMethod::Upi).await.unwrap();
    assert_eq!(started.state, PaymentState::AwaitingInput);
    assert!(started.qr.is_some());

    let settled = session.settled().await;
    assert_eq!(settled.state, PaymentState::Succeeded);
    assert_eq!(polls.load(Ordering::SeqCst), 3);
    assert_matches!(
        &settled.intent.attempts[0].details,
        Some(AttemptDetails::Upi(upi))
            if upi.payer_handle.as_deref() == Some("asha@okbank")
                && upi.utr.as_deref() == Some("412345678901")
    );

    // Poller is gone once the payment is settled.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_unpaid_qr_expires_and_stops_polling() {
    let (gateway, polls) = scripted_gateway(vec![UpiPollStatus::Pending]);
    let session = PaymentSession::new(intent(30_000), PaymentTimeouts::default(), Some(gateway));
    session.start(PaymentMethod::Upi).await.unwrap();

    let settled = session.settled().await;
    assert_eq!(settled.state, PaymentState::TimedOut);
    assert!(settled.qr.is_none());

    let polled = polls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(polls.load(Ordering::SeqCst), polled);
}

#[tokio::test(start_paused = true)]
async fn test_upi_gateway_failure_is_surfaced_with_fixed_message() {
    let (gateway, _) = scripted_gateway(vec![UpiPollStatus::Failed {
        code: FailureCode::PayerCancelled,
        message: "U30".into(),
    }]);
    let session = PaymentSession::new(intent(30_000), PaymentTimeouts::default(), Some(gateway));
    session.start(PaymentMethod::Upi).await.unwrap();

    let settled = session.settled().await;
    assert_eq!(settled.state, PaymentState::Failed);
    let error = settled.error.unwrap();
    assert_eq!(error.code, FailureCode::PayerCancelled);
    assert_eq!(error.message, "Payment was cancelled by the payer.");
}

#[tokio::test(start_paused = true)]
async fn test_cancelling_a_upi_payment_stops_the_poller() {
    let (gateway, polls) = scripted_gateway(vec![UpiPollStatus::Pending]);
    let session = PaymentSession::new(intent(30_000), PaymentTimeouts::default(), Some(gateway));
    session.start(PaymentMethod::Upi).await.unwrap();

    tokio::time::sleep(Duration::from_secs(9)).await;
    let cancelled = session.cancel().await.unwrap();
    assert_eq!(cancelled.state, PaymentState::Cancelled);

    let polled = polls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(polls.load(Ordering::SeqCst), polled);
    assert_eq!(session.snapshot().state, PaymentState::Cancelled);
}
