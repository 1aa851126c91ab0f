//! Memory planner that rewrites virtual SMPC bytecode into a paged
//! physical schedule.
//!
//! The planner runs in two single-threaded passes over a program file.
//! The *reverse annotator* walks the instruction stream backwards and
//! stamps every instruction with the next use of each page it touches.
//! The *placer* then walks forwards, keeps a bounded set of pages resident
//! in physical slots, emits explicit `SwapIn`/`SwapOut` records, and
//! rewrites every operand to a physical address. Eviction follows Belady's
//! rule over the annotations, which is optimal for the offline reference
//! trace the bytecode is.
//!
//! The resulting physical program's memory references always hit the
//! fixed-size resident region, no matter how far the program's working
//! set exceeds it.

#![warn(missing_docs)]

mod annotate;
mod annotation;
mod error;
mod pipeline;
mod place;
mod priority;

pub use annotate::{live_output_pages, reverse_annotate, unreverse_annotations};
pub use annotation::{Annotation, AnnotationReader};
pub use error::PlanError;
pub use pipeline::{plan, PlanPaths, PlanReport};
pub use place::{Placement, Placer};
pub use priority::{IndexEntry, NextUseIndex};
