//! Core attendance workflow components
//!
//! Each component is a struct holding the pool plus whatever collaborators it
//! needs; all of them are cheap to clone.

pub mod checkin;
pub mod geofence;
pub mod review;
pub mod roles;
pub mod sessions;
pub mod stats;

pub use checkin::{CheckInEngine, CheckInError, CheckInOutcome, CheckInRequest};
pub use geofence::{distance_meters, within_fence, Containment, GeoPoint};
pub use review::{AttachOutcome, Adjudication, Decision, ReviewCoordinator, ReviewError};
pub use roles::{Access, AccessDenied, Action, RoleAuthority, RoleError};
pub use sessions::{SessionError, SessionManager};
pub use stats::{LectureStats, StatsError, StatsReporter};
