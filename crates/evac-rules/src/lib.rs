//! Evac Rules - hazard classification
//!
//! Maps a hazard-event type to the set of nodes it makes unsafe. Rules come
//! from a YAML [`RuleBook`]; [`SafetyRuleEngine`] applies them to a
//! [`evac_graph::GraphStore`] and keeps the shared [`EventState`] current.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod engine;
pub mod error;
pub mod event_state;
pub mod rules;

pub use engine::{AlertOutcome, SafetyRuleEngine};
pub use error::{RulesError, RulesResult};
pub use event_state::{Clock, EventState, ManualClock, SystemClock};
pub use rules::{DangerRule, DangerZone, RuleBook, RuleEntry, RuleScope};
