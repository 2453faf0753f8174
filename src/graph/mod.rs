//! Unit dependency graph.
//!
//! Units form a DAG through `depends_on`. The graph answers the scheduling
//! questions the workflow engine and driver ask:
//!
//! 1. **Builder** - validates ids, references and acyclicity at parse time
//! 2. **Summary** - counts per status, stuck units, `all_complete`
//! 3. **Files** - unit documents on disk and lock-protected claiming
//!
//! ## Example
//!
//! ```
//! use hatrack::graph::{Unit, UnitGraph, UnitStatus};
//!
//! let graph = UnitGraph::parse(vec![
//!     Unit::new("u1", UnitStatus::Completed, vec![]),
//!     Unit::new("u2", UnitStatus::Pending, vec!["u1".to_string()]),
//! ])
//! .unwrap();
//!
//! let ready: Vec<&str> = graph.ready_units().iter().map(|u| u.id.as_str()).collect();
//! assert_eq!(ready, vec!["u2"]);
//! ```

mod builder;
mod files;
mod summary;
mod unit;

pub use builder::{UnitGraph, UnitIndex};
pub use files::{UnitFiles, parse_unit, rewrite_status};
pub use summary::{BlockedUnit, GraphSummary};
pub use unit::{Unit, UnitStatus};
