#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

use decor_marketplace::{
    clock::ManualClock,
    config::BookingPolicy,
    db::{self, DbConfig},
    entities::{
        account::{self, AccountRole},
        address, booking, cancel_type, contract,
        decor_service::{self, DecorServiceStatus},
        meeting::{self, MeetingStatus},
        payment_transaction::{self, TransactionType},
        quotation, setting,
    },
    jobs::{JobRegistry, JobScheduler},
    notifications::{NotificationError, Notifier},
    services::{
        bookings::{BookingService, CreateBookingRequest},
        contracts::ContractService,
        quotations::{CreateQuotationRequest, LaborLine, MaterialLine, QuotationService},
        wallet::WalletService,
        ServiceFactory,
    },
};

pub const COMMISSION: Decimal = dec!(0.4);

/// Notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub account_id: i32,
    pub title: String,
    pub url: Option<String>,
}

/// Keeps every notification in memory; can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn titles_for(&self, account_id: i32) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|n| n.account_id == account_id)
            .map(|n| n.title)
            .collect()
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification(
        &self,
        account_id: i32,
        title: &str,
        _content: &str,
        url: Option<&str>,
    ) -> Result<(), NotificationError> {
        if *self.failing.lock().unwrap() {
            return Err(NotificationError::Delivery("push gateway down".to_string()));
        }
        self.sent.lock().unwrap().push(Sent {
            account_id,
            title: title.to_string(),
            url: url.map(str::to_string),
        });
        Ok(())
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

/// A marketplace over a fresh in-memory database, seeded with one customer,
/// one provider, the admin, a published service and the commission setting.
pub struct TestMarket {
    pub db: Arc<DatabaseConnection>,
    pub clock: ManualClock,
    pub notifier: Arc<RecordingNotifier>,
    pub factory: ServiceFactory,
    pub wallets: WalletService,
    pub bookings: BookingService,
    pub quotations: QuotationService,
    pub contracts: ContractService,
    pub customer_id: i32,
    pub provider_id: i32,
    pub admin_id: i32,
    pub service_id: i32,
    pub address_id: i32,
    pub cancel_type_id: i32,
}

impl TestMarket {
    pub async fn new() -> Self {
        Self::with_policy(BookingPolicy::default()).await
    }

    pub async fn with_policy(policy: BookingPolicy) -> Self {
        let pool = db::establish_connection(&DbConfig::in_memory())
            .await
            .expect("in-memory database");
        db::create_schema(&pool).await.expect("schema");
        let db = Arc::new(pool);

        let clock = ManualClock::new(start_time());
        let notifier = Arc::new(RecordingNotifier::default());
        let factory = ServiceFactory::new(
            db.clone(),
            Arc::new(clock.clone()),
            notifier.clone(),
            None,
            policy,
        );

        let admin_id = insert_account(&db, "admin@decor.test", AccountRole::Admin, 0).await;
        let customer_id =
            insert_account(&db, "customer@decor.test", AccountRole::Customer, 0).await;
        let provider_id =
            insert_account(&db, "provider@decor.test", AccountRole::Provider, 100).await;

        let wallets = factory.wallet_service();
        for id in [admin_id, customer_id, provider_id] {
            wallets.open_wallet(id).await.expect("wallet");
        }

        setting::ActiveModel {
            commission: Set(COMMISSION),
            ..Default::default()
        }
        .insert(&*db)
        .await
        .expect("setting");

        let cancel_type_id = cancel_type::ActiveModel {
            type_name: Set("Changed my mind".to_string()),
            ..Default::default()
        }
        .insert(&*db)
        .await
        .expect("cancel type")
        .id;

        let service_id = insert_service(
            &db,
            provider_id,
            DecorServiceStatus::Available,
            start_time().date_naive(),
        )
        .await;

        let address_id = address::ActiveModel {
            account_id: Set(customer_id),
            detail: Set("12 Lotus Street".to_string()),
            ..Default::default()
        }
        .insert(&*db)
        .await
        .expect("address")
        .id;

        Self {
            bookings: factory.booking_service(),
            quotations: factory.quotation_service(),
            contracts: factory.contract_service(),
            wallets,
            factory,
            db,
            clock,
            notifier,
            customer_id,
            provider_id,
            admin_id,
            service_id,
            address_id,
            cancel_type_id,
        }
    }

    pub fn scheduler(&self) -> JobScheduler {
        JobScheduler::with_standard_jobs(
            &self.factory,
            &Default::default(),
            JobRegistry::new(),
        )
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub async fn top_up(&self, account_id: i32, amount: Decimal) {
        self.wallets
            .top_up(account_id, amount)
            .await
            .expect("top up");
    }

    pub async fn balance(&self, account_id: i32) -> Decimal {
        self.wallets.balance(account_id).await.expect("balance")
    }

    pub async fn create_booking(&self, total_price: Decimal) -> booking::Model {
        self.bookings
            .create_booking(CreateBookingRequest {
                account_id: self.customer_id,
                decor_service_id: self.service_id,
                address_id: self.address_id,
                survey_date: self.clock_now() + Duration::days(1),
                total_price: Some(total_price),
            })
            .await
            .expect("booking")
    }

    /// A booking confirmed for survey, ready to be quoted.
    pub async fn planning_booking(&self, total_price: Decimal) -> booking::Model {
        let created = self.create_booking(total_price).await;
        self.bookings
            .confirm_survey(&created.booking_code)
            .await
            .expect("confirm survey")
    }

    pub async fn quote(&self, booking_code: &str, deposit_percentage: Decimal) -> quotation::Model {
        self.quotations
            .create_quotation(booking_code, quotation_request(deposit_percentage))
            .await
            .expect("quotation")
    }

    /// A booking in `Contracting` with a pending contract.
    pub async fn contracting_booking(
        &self,
        total_price: Decimal,
        deposit_percentage: Decimal,
    ) -> (booking::Model, contract::Model) {
        let planned = self.planning_booking(total_price).await;
        let quoted = self.quote(&planned.booking_code, deposit_percentage).await;
        let drafted = self
            .contracts
            .create_contract_by_quotation_code(&quoted.quotation_code, "Standard decor terms")
            .await
            .expect("contract");
        (self.reload_booking(planned.id).await, drafted)
    }

    /// A booking with a signed contract and a held commit deposit.
    /// A booking whose contract the customer signed, still awaiting the deposit.
    pub async fn signed_booking(
        &self,
        total_price: Decimal,
        deposit_percentage: Decimal,
    ) -> (booking::Model, contract::Model) {
        let (booked, drafted) = self
            .contracting_booking(total_price, deposit_percentage)
            .await;
        let request = self
            .contracts
            .request_signature(&drafted.contract_code)
            .await
            .expect("signature request");
        let token = token_from(&request.signing_url);
        self.contracts
            .verify_contract_signature(&token)
            .await
            .expect("signature");
        (
            self.reload_booking(booked.id).await,
            self.reload_contract(drafted.id).await,
        )
    }

    pub async fn deposit_paid_booking(
        &self,
        total_price: Decimal,
        deposit_percentage: Decimal,
    ) -> (booking::Model, contract::Model) {
        let (booked, signed) = self.signed_booking(total_price, deposit_percentage).await;
        self.bookings
            .process_commit_deposit(&booked.booking_code)
            .await
            .expect("commit deposit");
        (
            self.reload_booking(booked.id).await,
            self.reload_contract(signed.id).await,
        )
    }

    pub async fn reload_booking(&self, id: i32) -> booking::Model {
        booking::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query")
            .expect("booking exists")
    }

    pub async fn reload_contract(&self, id: i32) -> contract::Model {
        contract::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("query")
            .expect("contract exists")
    }

    pub async fn reputation(&self, account_id: i32) -> i32 {
        account::Entity::find_by_id(account_id)
            .one(&*self.db)
            .await
            .expect("query")
            .expect("account exists")
            .reputation
    }

    pub async fn set_reputation(&self, account_id: i32, reputation: i32) {
        account::ActiveModel {
            id: Set(account_id),
            reputation: Set(reputation),
            ..Default::default()
        }
        .update(&*self.db)
        .await
        .expect("reputation");
    }

    pub async fn payments_of_type(
        &self,
        transaction_type: TransactionType,
    ) -> Vec<payment_transaction::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        payment_transaction::Entity::find()
            .filter(payment_transaction::Column::TransactionType.eq(transaction_type))
            .all(&*self.db)
            .await
            .expect("payments")
    }

    pub async fn insert_meeting(
        &self,
        booking_id: i32,
        start: DateTime<Utc>,
        duration_minutes: i32,
    ) -> meeting::Model {
        meeting::ActiveModel {
            booking_id: Set(booking_id),
            start_time: Set(start),
            duration_minutes: Set(duration_minutes),
            status: Set(MeetingStatus::Scheduled),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("meeting")
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        use decor_marketplace::clock::Clock;
        self.clock.now()
    }
}

pub async fn insert_account(
    db: &DatabaseConnection,
    email: &str,
    role: AccountRole,
    reputation: i32,
) -> i32 {
    account::ActiveModel {
        email: Set(email.to_string()),
        role: Set(role),
        reputation: Set(reputation),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("account")
    .id
}

pub async fn insert_service(
    db: &DatabaseConnection,
    provider_id: i32,
    status: DecorServiceStatus,
    start_date: NaiveDate,
) -> i32 {
    decor_service::ActiveModel {
        account_id: Set(provider_id),
        style: Set("Scandinavian".to_string()),
        base_price: Set(dec!(750000)),
        status: Set(status),
        start_date: Set(start_date),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("decor service")
    .id
}

pub fn quotation_request(deposit_percentage: Decimal) -> CreateQuotationRequest {
    CreateQuotationRequest {
        deposit_percentage,
        materials: vec![MaterialLine {
            name: "Oak panels".to_string(),
            quantity: 4,
            cost: dec!(100000),
        }],
        labors: vec![LaborLine {
            task_name: "Installation".to_string(),
            cost: dec!(200000),
            area: Some(dec!(35.5)),
        }],
        products: vec![],
    }
}

/// Pulls the `token` query parameter out of a signing link.
pub fn token_from(signing_url: &str) -> String {
    url::Url::parse(signing_url)
        .expect("signing url")
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .expect("token parameter")
}
