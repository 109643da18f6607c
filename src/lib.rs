//! viewsync — keep in-memory views synchronized with an externally-owned
//! realtime store.
//!
//! Two primitives, independent and composable:
//!   - [`projector::ChangeFeedProjector`] — subscribes to a filtered stream
//!     of row-change events and projects each event into a local view.
//!   - [`optimistic::MutationCoordinator`] — applies a view mutation
//!     immediately, issues the matching remote request, and rolls the local
//!     mutation back if the request fails.
//!
//! Two concrete components built from them:
//!   - [`moderation::ModerationQueue`] — id-keyed pending-items view with
//!     approve/reject optimistic mutations.
//!   - [`chat::ChatRoom`] — append-ordered message feed with a
//!     scroll-to-latest effect.
//!
//! The store itself (persistence, auth, conflict resolution, transport) is
//! reached through the [`client::RealtimeClient`] trait and never owned here.

pub mod error;
pub mod types;

pub mod chat;
pub mod client;
pub mod moderation;
pub mod optimistic;
pub mod projector;
pub mod view;

pub use error::{Result, ViewSyncError};
