//! Turnstile - Request Admission Control
//!
//! This crate guards a public HTTP API against abuse. Each route family is
//! bound to a named policy that caps how many requests a caller may make per
//! fixed window and, optionally, slows callers down progressively once they
//! pass a softer threshold. Faults inside the limiter never block traffic.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
