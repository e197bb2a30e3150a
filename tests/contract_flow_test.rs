//! Contract drafting, signature tokens, cancellation and OTP termination.

mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::{token_from, TestMarket};
use decor_marketplace::{
    config::BookingPolicy,
    entities::{
        booking::BookingStatus, contract::ContractStatus, payment_transaction::TransactionType,
        quotation::QuotationStatus,
    },
    services::contracts::TERMINATED_REASON,
    ErrorCode, ServiceError,
};
use rust_decimal_macros::dec;

#[tokio::test]
async fn contract_freezes_quotation_and_sets_commit_deposit() {
    let market = TestMarket::new().await;
    let planned = market.planning_booking(dec!(1250000)).await;
    let quoted = market.quote(&planned.booking_code, dec!(20)).await;

    let drafted = market
        .contracts
        .create_contract_by_quotation_code(&quoted.quotation_code, "Standard decor terms")
        .await
        .unwrap();
    assert!(drafted.contract_code.starts_with("CTR"));
    assert_eq!(drafted.contract_code.len(), 13);
    assert_eq!(drafted.status, ContractStatus::Pending);
    assert!(!drafted.is_signed);

    let booked = market.reload_booking(planned.id).await;
    assert_eq!(booked.status, BookingStatus::Contracting);
    assert_eq!(booked.commit_deposit_amount, dec!(250000));

    let details = market
        .quotations
        .get_active_quotation(&planned.booking_code)
        .await
        .unwrap();
    assert_eq!(details.quotation.status, QuotationStatus::Confirmed);

    let err = market
        .contracts
        .create_contract_by_quotation_code(&quoted.quotation_code, "Second draft")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);

    // Once a contract exists the quotation can no longer be withdrawn.
    assert_matches!(
        market
            .quotations
            .cancel_quotation(&quoted.quotation_code, market.cancel_type_id, "Too pricey")
            .await,
        Err(ServiceError::InvalidState(_))
    );
}

#[tokio::test]
async fn canceled_quotation_cannot_become_a_contract() {
    let market = TestMarket::new().await;
    let planned = market.planning_booking(dec!(500000)).await;
    let quoted = market.quote(&planned.booking_code, dec!(20)).await;
    market
        .quotations
        .cancel_quotation(&quoted.quotation_code, market.cancel_type_id, "Revised")
        .await
        .unwrap();

    assert_matches!(
        market
            .contracts
            .create_contract_by_quotation_code(&quoted.quotation_code, "Terms")
            .await,
        Err(ServiceError::InvalidState(_))
    );
    assert_matches!(
        market
            .contracts
            .create_contract_by_quotation_code("QUO-DOESNOTEXIST", "Terms")
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn signing_link_is_sent_to_the_customer() {
    let mut policy = BookingPolicy::default();
    policy.signing_base_url = "https://decor.example.com/portal/".to_string();
    let market = TestMarket::with_policy(policy).await;
    let (_, drafted) = market
        .contracting_booking(dec!(800000), dec!(25))
        .await;

    let request = market
        .contracts
        .request_signature(&drafted.contract_code)
        .await
        .unwrap();
    let token = token_from(&request.signing_url);

    assert!(request.signing_url.starts_with(&format!(
        "https://decor.example.com/portal/contracts/{}/sign?token=",
        drafted.contract_code
    )));
    assert_eq!(token.len(), 32);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(request.expires_at, market.clock_now() + Duration::days(2));

    let sent = market.notifier.sent();
    let link = sent
        .iter()
        .find(|n| n.account_id == market.customer_id && n.title == "Sign your contract")
        .expect("signing notification");
    assert_eq!(link.url.as_deref(), Some(request.signing_url.as_str()));
}

#[tokio::test]
async fn signature_token_valid_up_to_ttl() {
    let market = TestMarket::new().await;
    let (booked, drafted) = market
        .contracting_booking(dec!(600000), dec!(20))
        .await;
    let request = market
        .contracts
        .request_signature(&drafted.contract_code)
        .await
        .unwrap();

    market.advance(Duration::days(2));
    let signed = market
        .contracts
        .verify_contract_signature(&token_from(&request.signing_url))
        .await
        .unwrap();

    assert_eq!(signed.status, ContractStatus::Signed);
    assert!(signed.is_terminatable);
    assert_eq!(signed.signed_date, Some(market.clock_now()));
    assert_eq!(signed.signature_token, None);
    assert_eq!(
        market.reload_booking(booked.id).await.status,
        BookingStatus::Confirm
    );
}

#[tokio::test]
async fn signature_token_rejected_one_second_late() {
    let market = TestMarket::new().await;
    let (booked, drafted) = market
        .contracting_booking(dec!(600000), dec!(20))
        .await;
    let request = market
        .contracts
        .request_signature(&drafted.contract_code)
        .await
        .unwrap();

    market.advance(Duration::days(2) + Duration::seconds(1));
    let err = market
        .contracts
        .verify_contract_signature(&token_from(&request.signing_url))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ExpiredToken);
    assert!(!market.reload_contract(drafted.id).await.is_signed);
    assert_eq!(
        market.reload_booking(booked.id).await.status,
        BookingStatus::Contracting
    );
}

#[tokio::test]
async fn reissued_token_replaces_the_old_one() {
    let market = TestMarket::new().await;
    let (_, drafted) = market
        .contracting_booking(dec!(600000), dec!(20))
        .await;

    let first = market
        .contracts
        .request_signature(&drafted.contract_code)
        .await
        .unwrap();
    let second = market
        .contracts
        .request_signature(&drafted.contract_code)
        .await
        .unwrap();

    assert_matches!(
        market
            .contracts
            .verify_contract_signature(&token_from(&first.signing_url))
            .await,
        Err(ServiceError::InvalidToken(_))
    );
    assert_matches!(
        market
            .contracts
            .verify_contract_signature("not-a-real-token")
            .await,
        Err(ServiceError::InvalidToken(_))
    );
    market
        .contracts
        .verify_contract_signature(&token_from(&second.signing_url))
        .await
        .unwrap();

    // Signed contracts issue no more tokens.
    assert_matches!(
        market
            .contracts
            .request_signature(&drafted.contract_code)
            .await,
        Err(ServiceError::InvalidState(_))
    );
}

#[tokio::test]
async fn signing_blocked_while_booking_cancellation_pending() {
    let market = TestMarket::new().await;
    let (booked, drafted) = market
        .contracting_booking(dec!(600000), dec!(20))
        .await;
    let request = market
        .contracts
        .request_signature(&drafted.contract_code)
        .await
        .unwrap();
    market
        .bookings
        .request_cancellation(&booked.booking_code, market.cancel_type_id, "Second thoughts")
        .await
        .unwrap();

    let err = market
        .contracts
        .verify_contract_signature(&token_from(&request.signing_url))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert!(!market.reload_contract(drafted.id).await.is_signed);
}

#[tokio::test]
async fn contract_cancellation_request_can_be_revoked_or_approved() {
    let market = TestMarket::new().await;
    market.top_up(market.customer_id, dec!(1000000)).await;
    let (booked, drafted) = market
        .contracting_booking(dec!(1000000), dec!(20))
        .await;
    market
        .bookings
        .process_commit_deposit(&booked.booking_code)
        .await
        .unwrap();
    let code = drafted.contract_code.as_str();

    let pending = market
        .contracts
        .request_cancellation(code, "Found another provider")
        .await
        .unwrap();
    assert_eq!(pending.status, ContractStatus::PendingCancel);
    let revoked = market.contracts.revoke_cancellation(code).await.unwrap();
    assert_eq!(revoked.status, ContractStatus::Pending);
    assert_matches!(
        market.contracts.approve_cancellation(code).await,
        Err(ServiceError::InvalidState(_))
    );

    market
        .contracts
        .request_cancellation(code, "Found another provider")
        .await
        .unwrap();
    let canceled = market.contracts.approve_cancellation(code).await.unwrap();
    assert_eq!(canceled.status, ContractStatus::Canceled);

    let closed = market.reload_booking(booked.id).await;
    assert_eq!(closed.status, BookingStatus::Canceled);
    assert_eq!(market.balance(market.customer_id).await, dec!(1000000));
}

#[tokio::test]
async fn rejected_contract_cancels_booking() {
    let market = TestMarket::new().await;
    let (booked, drafted) = market
        .contracting_booking(dec!(700000), dec!(20))
        .await;

    assert_matches!(
        market.contracts.reject_contract(&drafted.contract_code, "").await,
        Err(ServiceError::ValidationError(_))
    );
    let rejected = market
        .contracts
        .reject_contract(&drafted.contract_code, "Terms unacceptable")
        .await
        .unwrap();
    assert_eq!(rejected.status, ContractStatus::Rejected);
    assert_eq!(rejected.reason.as_deref(), Some("Terms unacceptable"));
    assert_eq!(
        market.reload_booking(booked.id).await.status,
        BookingStatus::Canceled
    );
    // Nothing was held, so nothing is refunded.
    assert!(market.payments_of_type(TransactionType::Refund).await.is_empty());
}

// ==================== Termination ====================

#[tokio::test]
async fn termination_with_valid_otp_refunds_deposit() {
    let market = TestMarket::new().await;
    market.top_up(market.customer_id, dec!(1000000)).await;
    let (booked, signed) = market
        .deposit_paid_booking(dec!(1000000), dec!(20))
        .await;

    let issued = market
        .contracts
        .request_termination_otp(&signed.contract_code)
        .await
        .unwrap();
    assert_eq!(issued.otp.len(), 6);
    assert!(issued.otp.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(issued.expires_at, market.clock_now() + Duration::minutes(10));

    let wrong = if issued.otp == "000000" { "111111" } else { "000000" };
    assert_matches!(
        market
            .contracts
            .terminate_contract(&signed.contract_code, wrong)
            .await,
        Err(ServiceError::InvalidToken(_))
    );

    market.advance(Duration::minutes(10));
    let terminated = market
        .contracts
        .terminate_contract(&signed.contract_code, &issued.otp)
        .await
        .unwrap();
    assert_eq!(terminated.status, ContractStatus::Canceled);
    assert!(!terminated.is_terminatable);
    assert_eq!(terminated.reason.as_deref(), Some(TERMINATED_REASON));
    // The refund is its own ledger entry; the deposit flag stays set.
    assert!(terminated.is_deposited);

    let canceled = market.reload_booking(booked.id).await;
    assert_eq!(canceled.status, BookingStatus::Canceled);
    assert!(canceled.has_terminated);
    assert_eq!(market.balance(market.customer_id).await, dec!(1000000));
    assert_eq!(market.payments_of_type(TransactionType::Refund).await.len(), 1);
}

#[tokio::test]
async fn expired_otp_is_rejected() {
    let market = TestMarket::new().await;
    market.top_up(market.customer_id, dec!(1000000)).await;
    let (booked, signed) = market
        .deposit_paid_booking(dec!(1000000), dec!(20))
        .await;

    let issued = market
        .contracts
        .request_termination_otp(&signed.contract_code)
        .await
        .unwrap();
    market.advance(Duration::minutes(10) + Duration::seconds(1));

    let err = market
        .contracts
        .terminate_contract(&signed.contract_code, &issued.otp)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExpiredToken);
    assert_eq!(
        market.reload_booking(booked.id).await.status,
        BookingStatus::DepositPaid
    );
    assert_eq!(market.balance(market.customer_id).await, dec!(800000));
}

#[tokio::test]
async fn termination_closed_after_window() {
    let market = TestMarket::new().await;
    market.top_up(market.customer_id, dec!(1000000)).await;
    let (_, signed) = market
        .deposit_paid_booking(dec!(1000000), dec!(20))
        .await;

    market.advance(Duration::days(3) + Duration::seconds(1));
    assert_matches!(
        market
            .contracts
            .request_termination_otp(&signed.contract_code)
            .await,
        Err(ServiceError::InvalidState(_))
    );
}

#[tokio::test]
async fn unsigned_contract_cannot_be_terminated() {
    let market = TestMarket::new().await;
    let (_, drafted) = market
        .contracting_booking(dec!(400000), dec!(20))
        .await;

    assert_matches!(
        market
            .contracts
            .request_termination_otp(&drafted.contract_code)
            .await,
        Err(ServiceError::InvalidState(_))
    );
    assert_matches!(
        market
            .contracts
            .terminate_contract(&drafted.contract_code, "123456")
            .await,
        Err(ServiceError::InvalidState(_))
    );
}
