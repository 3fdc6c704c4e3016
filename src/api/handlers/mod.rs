//! API handlers for Manzil.
//!
//! Route handlers live here; the auth submodule owns the account lifecycle
//! (signup, OTP verification, passwords, sessions) and its storage.

pub mod auth;
pub mod health;
pub mod me;
pub mod root;
