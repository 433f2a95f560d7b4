pub mod auth;
pub mod email;
pub mod password_reset;
pub mod quota_ledger;
pub mod token_issuer;

pub use email::{LogMailer, Mailer, build_mailer};
pub use password_reset::PasswordResetService;
pub use quota_ledger::QuotaLedger;
pub use token_issuer::{IssuedToken, TokenDigest, TokenIssuer, digest};
