//! Checkpointed migration of open GitHub issues to Discourse topics.
//!
//! Each open issue is driven through a fixed sequence of side-effecting
//! steps (create Discourse topic, comment, close, lock). Progress is
//! appended to a flat checkpoint log after every completed step, so an
//! interrupted run can be resumed without re-issuing completed side
//! effects. The architecture enforces a strict separation:
//!
//! - **[`checkpoint`], [`issue`]**: Pure data and classification logic.
//!   No I/O beyond the append-only log, fully testable in isolation.
//! - **[`github`], [`discourse`], [`steplib`]**: External collaborators
//!   behind traits. Isolated to enable scripted fakes in tests.
//!
//! Orchestration modules ([`sequencer`], [`run`], [`resume`]) coordinate
//! the state machine with the collaborators to implement CLI commands.

pub mod checkpoint;
pub mod config;
pub mod discourse;
pub mod github;
pub mod issue;
pub mod logging;
pub mod resume;
pub mod run;
pub mod sequencer;
pub mod steplib;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
