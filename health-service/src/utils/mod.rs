pub mod codes;
pub mod names;
pub mod password;
pub mod pkce;
pub mod validation;

pub use codes::generate_order_code;
pub use names::clean_name;
pub use password::{hash_password, verify_password, Password, PasswordHashString};
pub use validation::ValidatedJson;
