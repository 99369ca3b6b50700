// Models module - Database entity representations

pub mod package;
pub mod subscription;
pub mod transaction;
pub mod user;
pub mod zip_code;

pub use package::Package;
pub use subscription::{Subscription, SubscriptionStatus};
pub use transaction::{PaymentMethod, PaymentStatus, Transaction};
pub use user::User;
pub use zip_code::ZipCode;
