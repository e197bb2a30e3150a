// Parties and catalog
pub mod account;
pub mod address;
pub mod decor_service;
pub mod setting;
pub mod cancel_type;

// Booking aggregate
pub mod booking;
pub mod time_slot;
pub mod meeting;

// Quotation and contract
pub mod quotation;
pub mod material_detail;
pub mod labor_detail;
pub mod product_detail;
pub mod contract;

// Wallet ledger
pub mod wallet;
pub mod payment_transaction;
pub mod wallet_transaction;

pub use account::AccountRole;
pub use booking::BookingStatus;
pub use contract::ContractStatus;
pub use decor_service::DecorServiceStatus;
pub use meeting::MeetingStatus;
pub use payment_transaction::{PaymentStatus, TransactionType};
pub use quotation::QuotationStatus;
