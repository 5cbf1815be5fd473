pub mod credentials;
pub mod ott;
pub mod sanitize;
pub mod session;

pub use credentials::{load_credential, store_credential};
pub use ott::{MemoryTokenStore, TokenStore};
pub use sanitize::sanitize_wb_token;
pub use session::SessionBinder;
