pub mod coach;
pub mod database;
pub mod garmin;
pub mod gmail;
pub mod google;
pub mod jwt;
pub mod metrics;
pub mod providers;
pub mod state_store;
pub mod storage;

pub use coach::CoachService;
pub use database::Database;
pub use garmin::GarminClient;
pub use gmail::GmailClient;
pub use google::GoogleOAuthClient;
pub use jwt::{Claims, JwtService, TokenKind, TokenResponse};
pub use metrics::{get_metrics, init_metrics};
pub use state_store::{MemoryStateStore, RedisStateStore, StateStore};
pub use storage::{create_storage, Storage};
