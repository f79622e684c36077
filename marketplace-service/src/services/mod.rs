pub mod coordinator;
pub mod metrics;
pub mod store;
pub mod stripe;

pub use coordinator::{PurchaseError, TransactionCoordinator};
pub use metrics::{get_metrics, init_metrics};
pub use store::{MarketStore, MongoStore, StoreError, TransactionRole};
pub use stripe::{PaymentGateway, StripeClient};
