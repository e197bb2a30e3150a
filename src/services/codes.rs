//! Random identifiers handed out to people: booking and quotation codes,
//! contract codes that appear in links, signature tokens and OTPs.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

const CODE_LENGTH: usize = 10;
const SIGNATURE_TOKEN_LENGTH: usize = 32;
pub const OTP_LENGTH: usize = 6;

fn alphanumeric(length: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

pub fn booking_code() -> String {
    format!("BKG-{}", alphanumeric(CODE_LENGTH).to_uppercase())
}

pub fn quotation_code() -> String {
    format!("QUO-{}", alphanumeric(CODE_LENGTH).to_uppercase())
}

/// Letters and digits only, so the code can be placed in a URL unescaped.
pub fn contract_code() -> String {
    format!("CTR{}", alphanumeric(CODE_LENGTH).to_uppercase())
}

pub fn signature_token() -> String {
    alphanumeric(SIGNATURE_TOKEN_LENGTH)
}

pub fn numeric_otp() -> String {
    let mut rng = thread_rng();
    (0..OTP_LENGTH)
        .map(|_| rng.gen_range(0..10).to_string())
        .collect()
}
