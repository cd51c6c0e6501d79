//! help-relay Discord infrastructure adapter.
//!
//! Implements [`relay::Deliverer`] against Discord's HTTP API with a bot token:
//!
//! - readiness: `GET /users/@me` (confirms the token) then
//!   `GET /channels/{id}` (confirms the channel resolves and is visible);
//! - delivery: `POST /channels/{id}/messages`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Authentication, rate-limit hints and status-code
//! classification live here. The `poller` crate sees only
//! [`relay::Deliverer`] and [`relay::DeliveryError`].
//!
//! ## Error Mapping
//!
//! | Response | [`relay::DeliveryError`] | Transient |
//! |----------|--------------------------|-----------|
//! | 429 | `RateLimited` | yes |
//! | 5xx, connect/timeout | `Unavailable` | yes |
//! | 401, 403, 404 | `InvalidDestination` | no |
//! | other 4xx | `Rejected` | no |

mod client;

pub use client::{DiscordConfig, DiscordDeliverer, DEFAULT_API_URL};
