//! Session lifecycle for the mobile client.
//!
//! [`TokenStore`] keeps the access/refresh pair and a cached user snapshot on
//! disk; [`SessionClient`] wraps every outbound call, attaching the bearer
//! token and coordinating a single refresh-and-retry on authorization
//! failure.

pub mod client;
pub mod store;

pub use client::{SessionClient, SessionError};
pub use store::TokenStore;
