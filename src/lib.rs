//! # instruct-engine
//!
//! Reliability layer between callers that need structured course content
//! (learning objectives, quiz questions) and an unreliable text-generation
//! backend.
//!
//! Raw generator text is repaired into JSON ([`parser`]), checked against the
//! request and a closed Bloom's taxonomy vocabulary ([`validator`]), retried
//! with escalating prompt strictness ([`engine::retry`]) behind a shared
//! circuit breaker ([`breaker`]), and cached by normalized request
//! ([`cache`]). [`engine::Coordinator`] ties it together.

pub mod breaker;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod llm;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod taxonomy;
pub mod telemetry;
pub mod validator;
