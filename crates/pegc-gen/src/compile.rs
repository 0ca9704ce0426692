//! The compile pipeline: named pass lists for the check, transform and
//! generate stages, a plugin hook that may add, replace or remove
//! individual passes, and the `compile` entry point.

use pegc::error::{GrammarError, Result};
use pegc::grammar::Grammar;
use pegc::options::{CompileOptions, Output};
use pegc::passes;

use crate::generate::generate;

pub type PassFn = fn(&mut Grammar, &CompileOptions) -> Result<()>;

#[derive(Clone, Copy)]
pub struct NamedPass {
    pub name: &'static str,
    pub run: PassFn,
}

impl NamedPass {
    pub const fn new(name: &'static str, run: PassFn) -> NamedPass {
        NamedPass { name, run }
    }
}

/// The three pass stages, run in order. Plugins may edit the lists before
/// compilation starts.
pub struct Stages {
    pub check: Vec<NamedPass>,
    pub transform: Vec<NamedPass>,
    pub generate: Vec<NamedPass>,
}

impl Stages {
    pub fn defaults(options: &CompileOptions) -> Stages {
        let mut check = vec![
            NamedPass::new("report_missing_rules", passes::report_missing_rules),
            NamedPass::new("report_unknown_attributes", passes::report_unknown_attributes),
            NamedPass::new("report_left_recursion", passes::report_left_recursion),
            NamedPass::new("report_infinite_loops", passes::report_infinite_loops),
        ];
        if options.allow_loops {
            check.retain(|pass| pass.name != "report_infinite_loops");
        }
        Stages {
            check,
            transform: vec![
                NamedPass::new("remove_proxy_rules", passes::remove_proxy_rules),
                NamedPass::new("inline_simple_rules", passes::inline_simple_rules),
                NamedPass::new(
                    "optimize_character_class",
                    passes::optimize_character_class,
                ),
                NamedPass::new("analyze_always_match", passes::analyze_always_match),
                NamedPass::new("analyze_first", passes::analyze_first),
                NamedPass::new("analyze_params", passes::analyze_params),
                NamedPass::new("mark_pure", passes::mark_pure),
                NamedPass::new(
                    "optimize_failure_reporting",
                    passes::optimize_failure_reporting,
                ),
                NamedPass::new("transform_common_lang", passes::transform_common_lang),
            ],
            generate: vec![NamedPass::new("generate", generate)],
        }
    }

    fn stage_mut(&mut self, name: &str) -> Option<&mut Vec<NamedPass>> {
        for stage in [&mut self.check, &mut self.transform, &mut self.generate] {
            if stage.iter().any(|pass| pass.name == name) {
                return Some(stage);
            }
        }
        None
    }

    /// Drop a pass by name from whichever stage holds it.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.stage_mut(name) {
            Some(stage) => {
                stage.retain(|pass| pass.name != name);
                true
            }
            None => false,
        }
    }

    /// Swap in a different implementation of a named pass.
    pub fn replace(&mut self, name: &'static str, run: PassFn) -> bool {
        for stage in [&mut self.check, &mut self.transform, &mut self.generate] {
            for pass in stage.iter_mut() {
                if pass.name == name {
                    pass.run = run;
                    return true;
                }
            }
        }
        false
    }
}

/// The sole externally-programmable extension point: plugins run before
/// compilation and may edit the stage lists and the options.
pub trait Plugin {
    fn apply(&self, stages: &mut Stages, options: &mut CompileOptions);
}

pub fn compile(grammar: &mut Grammar, options: CompileOptions) -> Result<String> {
    compile_with_plugins(grammar, options, &[])
}

/// Run every stage in order over the grammar. A pass either fully
/// succeeds, leaving the AST valid for the next pass, or aborts the whole
/// pipeline with the first fatal error. Returns the generated source.
pub fn compile_with_plugins(
    grammar: &mut Grammar,
    mut options: CompileOptions,
    plugins: &[&dyn Plugin],
) -> Result<String> {
    if options.output == Output::Parser {
        return Err(GrammarError::spanless(
            "output \"parser\" needs a host runtime for the generated language; use \"source\"",
        ));
    }
    if options.allowed_start_rules.is_empty() {
        let (_, first) = grammar
            .iter_live()
            .next()
            .ok_or_else(|| GrammarError::spanless("Grammar has no rules"))?;
        options.allowed_start_rules.push(first.name.clone());
    }

    let mut stages = Stages::defaults(&options);
    for plugin in plugins {
        plugin.apply(&mut stages, &mut options);
    }

    for pass in stages
        .check
        .iter()
        .chain(stages.transform.iter())
        .chain(stages.generate.iter())
    {
        log::debug!("running pass {}", pass.name);
        (pass.run)(grammar, &options)?;
    }

    grammar
        .code
        .take()
        .ok_or_else(|| GrammarError::spanless("the generate stage produced no code"))
}
