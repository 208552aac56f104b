//! Scenario tests for the lifecycle engine, driven through the fixture
//! language.

mod invalidation;
mod locking;
mod support;
