/// Authentication system
///
/// The auth state machine and the stores it drives: session registry, OTP
/// and attempt ledgers, password hashing, reset tokens, and the axum
/// extractors that resolve a request to a session.

pub mod extract;
pub mod forms;
pub mod otp;
pub mod password;
pub mod reset;
pub mod service;
pub mod session;

pub use extract::{AdminSession, AuthSession, ClientInfo};
pub use otp::OtpLedger;
pub use service::{AuthService, LoginSuccess};
pub use session::{Session, SessionRegistry};
