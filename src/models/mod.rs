pub mod account;
pub mod quota;
pub mod reset_token;

pub use account::Account;
pub use quota::{
    QuotaCost, QuotaRecord, QuotaStatus, SubscriptionTier, TierLimitTable, TierLimits,
    UnknownTier, WindowState,
};
pub use reset_token::ResetToken;
