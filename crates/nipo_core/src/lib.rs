pub mod attendance;
pub mod domain;
pub mod error;
pub mod ports;
pub mod redirect;
pub mod session;
pub mod token;

pub use attendance::{AttendancePolicy, AttendanceTokenService, PresenceEvent, ScanOutcome};
pub use domain::{
    ClassSession, ClassStatus, Enrollment, Identity, NewPresence, PresenceRecord, Profile,
    ProfileSeed, ProfileUpdate, Registration, Role, TokenRecord,
};
pub use error::{AttendanceError, AttendanceResult, AuthError};
pub use ports::{AttendanceStore, AuthProvider, PortError, PortResult, ProfileStore, ProviderError};
pub use redirect::{RedirectDecision, RedirectRoutes};
pub use session::{AuthEvent, PendingIdentity, Session, SessionConfig, SessionManager, SessionState};
pub use token::{AttendanceToken, TokenFormatError};
