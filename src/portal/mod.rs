//! Gateway client, session registry and the login state machine.

pub mod gateway;
pub mod http;
pub mod reconciler;
pub mod session;

pub use gateway::{GatewayClient, LoginResponse, PortalGateway, SessionListResponse};
pub use reconciler::{LoginReconciler, LoginState};
pub use session::{Session, SessionRegistry};
