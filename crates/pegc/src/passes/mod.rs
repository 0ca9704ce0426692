//! Compiler passes. Each pass is a function over the grammar which either
//! fully succeeds, leaving the AST valid for the next pass, or raises a
//! fatal [`GrammarError`](crate::error::GrammarError) aborting the whole
//! pipeline.

mod analyze_always_match;
mod analyze_first;
mod analyze_params;
mod inline_simple_rules;
mod mark_pure;
mod optimize_character_class;
mod optimize_failure_reporting;
mod remove_proxy_rules;
mod report_infinite_loops;
mod report_left_recursion;
mod report_missing_rules;
mod report_unknown_attributes;
mod transform_common_lang;

pub use analyze_always_match::analyze_always_match;
pub use analyze_first::analyze_first;
pub use analyze_params::analyze_params;
pub use inline_simple_rules::inline_simple_rules;
pub use mark_pure::mark_pure;
pub use optimize_character_class::optimize_character_class;
pub use optimize_failure_reporting::optimize_failure_reporting;
pub use remove_proxy_rules::remove_proxy_rules;
pub use report_infinite_loops::report_infinite_loops;
pub use report_left_recursion::report_left_recursion;
pub use report_missing_rules::report_missing_rules;
pub use report_unknown_attributes::report_unknown_attributes;
pub use transform_common_lang::transform_common_lang;
