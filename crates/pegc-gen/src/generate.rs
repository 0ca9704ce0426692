//! The code generator: walks the annotated grammar and emits one target
//! language function per (rule, discard-mode) pair, using virtual register
//! allocation and the [`Outcome`] structured-control-flow builder.

use std::collections::{HashMap, HashSet, VecDeque};

use pegc::charset::{ClassNode, ClassOps};
use pegc::error::{GrammarError, Result};
use pegc::grammar::{
    AssignedValue, Assignment, ExprHandle, ExprKind, Grammar, ParamType, RuleHandle,
};
use pegc::options::{CompileOptions, Language};
use pegc::span::Span;

use crate::context::{Binding, Context, LabelEnv, Silence};
use crate::javascript::JavaScript;
use crate::outcome::{Cond, Outcome};
use crate::php::Php;
use crate::regalloc::{Reg, RegAlloc};
use crate::target::{
    CacheOpts, Expectation, ExpectationKind, SourcePieces, StartRule, Target,
};

/// The generate pass: renders the grammar into `grammar.code`.
pub fn generate(grammar: &mut Grammar, options: &CompileOptions) -> Result<()> {
    let target: Box<dyn Target> = match options.language {
        Language::Javascript => Box::new(JavaScript),
        Language::Php => Box::new(Php::new(
            options.optimize,
            ClassOps::new(options.caseless_restrict),
        )),
    };
    let code = Generator::new(grammar, options, target.as_ref()).run()?;
    grammar.code = Some(code);
    Ok(())
}

enum RuleArg {
    Silence,
    BoolParams,
    Param(String),
}

struct Generator<'a> {
    grammar: &'a Grammar,
    options: &'a CompileOptions,
    target: &'a dyn Target,

    // per-rule state, reset when a new rule function starts
    regs: RegAlloc,
    seq_label: u32,
    choice_label: u32,
    current: Option<RuleHandle>,

    // lazy (rule, discard) scheduling
    queue: VecDeque<(RuleHandle, bool)>,
    scheduled: HashSet<(RuleHandle, bool)>,

    // deduplicated constant tables
    consts: Vec<String>,
    const_index: HashMap<String, usize>,
    actions: Vec<String>,
    action_index: HashMap<String, usize>,
}

impl<'a> Generator<'a> {
    fn new(
        grammar: &'a Grammar,
        options: &'a CompileOptions,
        target: &'a dyn Target,
    ) -> Generator<'a> {
        Generator {
            grammar,
            options,
            target,
            regs: RegAlloc::new(),
            seq_label: 0,
            choice_label: 0,
            current: None,
            queue: VecDeque::new(),
            scheduled: HashSet::new(),
            consts: Vec::new(),
            const_index: HashMap::new(),
            actions: Vec::new(),
            action_index: HashMap::new(),
        }
    }

    fn run(mut self) -> Result<String> {
        let mut start_names: Vec<String> = self.options.allowed_start_rules.clone();
        if start_names.is_empty() {
            let (_, first) = self
                .grammar
                .iter_live()
                .next()
                .ok_or_else(|| GrammarError::spanless("Grammar has no rules"))?;
            start_names.push(first.name.clone());
        }

        let mut start_rules = Vec::new();
        for name in &start_names {
            let handle = self.grammar.expect_rule(name, Span::empty())?;
            let func = self.schedule(handle, false);
            start_rules.push(StartRule {
                name: name.clone(),
                func,
                args: self.start_args(handle),
            });
        }

        let mut functions = Vec::new();
        let mut stream_rules = Vec::new();
        for name in &self.options.allowed_stream_rules.clone() {
            let handle = self.grammar.expect_rule(name, Span::empty())?;
            functions.push(self.generate_rule(handle, false, true)?);
            stream_rules.push(StartRule {
                name: name.clone(),
                func: self.target.rule_func_name(name, false, true),
                args: self.start_args(handle),
            });
        }

        while let Some((handle, discard)) = self.queue.pop_front() {
            functions.push(self.generate_rule(handle, discard, false)?);
        }

        let pieces = SourcePieces {
            initializer: self.grammar.initializer.clone(),
            consts: self.consts,
            actions: self.actions,
            functions,
            start_rules,
            stream_rules,
            cache: self.options.cache,
            trace: self.options.trace,
        };
        Ok(self.target.assemble(&pieces))
    }

    /// Queue a (rule, discard) variant for generation unless it already
    /// was, and return its function name. Variants are generated lazily,
    /// on demand, exactly once.
    fn schedule(&mut self, handle: RuleHandle, discard: bool) -> String {
        if self.scheduled.insert((handle, discard)) {
            self.queue.push_back((handle, discard));
        }
        self.target
            .rule_func_name(&self.grammar.rules[handle].name, discard, false)
    }

    fn generate_rule(
        &mut self,
        handle: RuleHandle,
        discard: bool,
        iterable: bool,
    ) -> Result<String> {
        self.regs.reset();
        self.seq_label = 0;
        self.choice_label = 0;
        self.current = Some(handle);

        let rule = &self.grammar.rules[handle];
        let rule_name = rule.name.clone();
        let silence = match rule.reports_failure {
            true => Silence::Runtime,
            false => Silence::Silent,
        };
        let func_name = self.target.rule_func_name(&rule_name, discard, iterable);
        let mut env = LabelEnv::new();

        let mut lines: Vec<String> = Vec::new();
        if iterable {
            let inner = match self.grammar.kind(rule.expr) {
                ExprKind::ZeroOrMore { expr } => *expr,
                _ => {
                    return Err(GrammarError::new(
                        "Iterable rules must be a single starred subexpression",
                        rule.span,
                    ))
                }
            };
            let mut ctx = Context::new(silence);
            let mut out = self.recurse(inner, &mut ctx, &mut env);
            let value = out.expression.clone();
            out.on_success(vec![self.target.stream_emit(&value)]);
            let end = self.add_expectation(Expectation {
                kind: ExpectationKind::End,
                value: None,
                description: "end of input".to_owned(),
            });
            let mut fail_lines = vec![format!(
                "if ({} < {}) {{",
                self.target.curr_pos(),
                self.target.input_length()
            )];
            fail_lines.push(format!("  {};", self.target.library_call("fail", &[end])));
            for line in self.target.throw_syntax_error().split('\n') {
                fail_lines.push(format!("  {line}"));
            }
            fail_lines.push("}".to_owned());
            fail_lines.push(self.target.stream_end().to_owned());
            out.on_failure(fail_lines);

            let names: Vec<String> = self
                .regs
                .allocated()
                .iter()
                .map(|&reg| self.target.reg_name(reg))
                .collect();
            if let Some(decl) = self.target.var_declaration(&names) {
                lines.push(decl);
            }
            lines.push("while (true) {".to_owned());
            for line in out.resolve(self.target) {
                for part in line.split('\n') {
                    lines.push(format!("  {part}"));
                }
            }
            lines.push("}".to_owned());

            let args = self.arg_declarators(handle);
            return Ok(self
                .target
                .stream_func_declaration(&func_name, &args, &lines.join("\n")));
        }

        let mut ctx = Context::new(silence).with_discard(discard);
        let mut out = self.recurse(rule.expr, &mut ctx, &mut env);
        out.resolve(self.target);

        let names: Vec<String> = self
            .regs
            .allocated()
            .iter()
            .map(|&reg| self.target.reg_name(reg))
            .collect();
        if let Some(decl) = self.target.var_declaration(&names) {
            lines.push(decl);
        }

        let use_cache = self
            .grammar
            .rules[handle]
            .attribute_bool("cache", self.options.cache);
        let cache_opts = use_cache.then(|| self.cache_opts(handle, discard, &out.expression));
        if let Some(opts) = &cache_opts {
            lines.extend(self.target.cache_lookup(opts));
        }
        lines.extend(std::mem::take(&mut out.block));
        if let Some(opts) = &cache_opts {
            lines.extend(self.target.cache_store(opts));
        }
        lines.push(format!("return {};", out.expression));

        let args = self.arg_declarators(handle);
        let body = lines.join("\n");
        if self.options.trace {
            Ok(self
                .target
                .trace_wrap(&func_name, &rule_name, &args, &body))
        } else {
            Ok(self.target.rule_func_declaration(&func_name, &args, &body))
        }
    }

    fn cache_opts(&self, handle: RuleHandle, discard: bool, result: &str) -> CacheOpts {
        let rule = &self.grammar.rules[handle];
        let rule_count = self.grammar.rules.len() as u32;
        let bucket = (discard as u32) + 2 * (handle.as_u32() + rule_count);

        let mut bool_mask = 0u32;
        let mut params = Vec::new();
        let mut ref_params = Vec::new();
        for name in &rule.passed_params {
            let info = self.grammar.params.expect(name);
            match info.ty {
                Some(ParamType::Boolean) => {
                    bool_mask |= 1 << info.bool_index.expect("boolean parameter has a bit");
                }
                Some(ParamType::Reference) => {
                    params.push(self.target.ref_param_value(name));
                    ref_params.push(name.clone());
                }
                _ => params.push(self.target.param_arg(name)),
            }
        }
        if bool_mask != 0 {
            params.insert(
                0,
                format!("{} & 0x{bool_mask:x}", self.target.bool_params_arg()),
            );
        }
        CacheOpts {
            bucket,
            params,
            ref_params,
            result: result.to_owned(),
        }
    }

    fn rule_args(&self, handle: RuleHandle) -> Vec<RuleArg> {
        let rule = &self.grammar.rules[handle];
        let mut args = Vec::new();
        if rule.reports_failure {
            args.push(RuleArg::Silence);
        }
        if rule.has_bool_params {
            args.push(RuleArg::BoolParams);
        }
        for name in &rule.passed_params {
            let info = self.grammar.params.expect(name);
            if info.ty == Some(ParamType::Boolean) {
                continue;
            }
            args.push(RuleArg::Param(name.clone()));
        }
        args
    }

    fn arg_declarators(&self, handle: RuleHandle) -> Vec<String> {
        self.rule_args(handle)
            .iter()
            .map(|arg| match arg {
                RuleArg::Silence => self.target.silence_arg().to_owned(),
                RuleArg::BoolParams => self.target.bool_params_arg().to_owned(),
                RuleArg::Param(name) => {
                    let is_ref =
                        self.grammar.params.expect(name).ty == Some(ParamType::Reference);
                    self.target.param_arg_declarator(name, is_ref)
                }
            })
            .collect()
    }

    /// Argument values for invoking a rule as a parse entry point: every
    /// parameter gets its initial value.
    fn start_args(&self, handle: RuleHandle) -> Vec<String> {
        self.rule_args(handle)
            .iter()
            .map(|arg| match arg {
                RuleArg::Silence => "false".to_owned(),
                RuleArg::BoolParams => "0".to_owned(),
                RuleArg::Param(name) => self.initial_param_value(name),
            })
            .collect()
    }

    // ---- shared helpers ----------------------------------------------

    fn current_rule(&self) -> RuleHandle {
        self.current.expect("not generating a rule")
    }

    /// Get the register the caller asked for, or allocate one owned by
    /// this outcome, and point the outcome's expression at it.
    fn result_reg(&mut self, ctx: &mut Context, out: &mut Outcome) -> Reg {
        let reg = match ctx.result_reg {
            Some(reg) => reg,
            None => {
                let reg = self.regs.value(&mut out.free);
                ctx.result_reg = Some(reg);
                reg
            }
        };
        out.expression = self.target.reg_name(reg);
        reg
    }

    fn recurse(&mut self, expr: ExprHandle, ctx: &mut Context, env: &mut LabelEnv) -> Outcome {
        let mut out = self.gen_expr(expr, ctx, env);
        self.fix_result(ctx, &mut out);
        out
    }

    /// If the context demands a particular register and the outcome's
    /// expression is something else, emit the copy and release whatever
    /// the expression depended on.
    fn fix_result(&mut self, ctx: &Context, out: &mut Outcome) {
        let Some(reg) = ctx.result_reg else {
            return;
        };
        let name = self.target.reg_name(reg);
        if out.expression == name {
            return;
        }
        let statically = match out.condition {
            Cond::Always => Some(Cond::Always),
            Cond::Never => Some(Cond::Never),
            _ => None,
        };
        out.resolve(self.target);
        out.block.push(format!("{name} = {};", out.expression));
        out.expression = name;
        let free = std::mem::take(&mut out.free);
        self.release(free, out);
        if let Some(cond) = statically {
            out.condition = cond;
        }
    }

    fn release(&mut self, regs: Vec<Reg>, out: &mut Outcome) {
        if regs.is_empty() {
            return;
        }
        let names: Vec<String> = regs.iter().map(|&reg| self.target.reg_name(reg)).collect();
        out.epilogue.push(format!("// free {}", names.join(",")));
        self.regs.release(regs);
    }

    fn silence_expr(&self, ctx: &Context) -> String {
        match ctx.silence {
            Silence::Runtime => self.target.silence_arg().to_owned(),
            Silence::Silent => "true".to_owned(),
            Silence::Loud => "false".to_owned(),
        }
    }

    fn add_expectation(&mut self, e: Expectation) -> String {
        let rendered = self.target.expectation_literal(&e);
        let index = match self.const_index.get(&rendered) {
            Some(&index) => index,
            None => {
                let index = self.consts.len();
                self.const_index.insert(rendered, index);
                self.consts
                    .push(self.target.expectation_declaration(index, &e));
                index
            }
        };
        self.target.expectation_name(index)
    }

    /// A statement calling `fail()`, guarded by the silence state; None
    /// when silence is known at compile time.
    fn fail_call(&mut self, e: Expectation, ctx: &Context) -> Option<String> {
        let name = self.add_expectation(e);
        let call = self.target.library_call("fail", &[name]);
        match ctx.silence {
            Silence::Silent => None,
            Silence::Loud => Some(format!("{call};")),
            Silence::Runtime => Some(format!(
                "if (!{}) {{ {call}; }}",
                self.target.silence_arg()
            )),
        }
    }

    /// Register or deduplicate a user-code function over the current label
    /// environment, returning the call expression.
    fn make_action(&mut self, code: &str, env: &LabelEnv) -> String {
        let arg_decls: Vec<String> = env
            .iter()
            .map(|(label, binding)| self.target.action_arg_declarator(label, binding.is_ref))
            .collect();
        let key = format!("({}) {code}", arg_decls.join(", "));
        let index = match self.action_index.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.actions.len();
                self.action_index.insert(key, index);
                self.actions
                    .push(self.target.action_declaration(index, &arg_decls, code));
                index
            }
        };
        let args: Vec<String> = env.values().map(|binding| binding.expr.clone()).collect();
        self.target.action_call(index, &args)
    }

    /// Expression giving a parameter's current value inside the current
    /// rule. Parameters not physically passed are compile-time constants.
    fn param_expression(&mut self, name: &str) -> String {
        let current = &self.grammar.rules[self.current_rule()];
        if !current.passed_params.contains(name) {
            return self.initial_param_value(name);
        }
        let info = self.grammar.params.expect(name);
        match info.ty {
            Some(ParamType::Boolean) => {
                let mask = 1u32 << info.bool_index.expect("boolean parameter has a bit");
                self.target.bool_param_test(name, mask)
            }
            Some(ParamType::Reference) => self.target.ref_param_value(name),
            Some(_) => self.target.param_arg(name),
            None => panic!("Undefined parameter type for {name}"),
        }
    }

    fn initial_param_value(&self, name: &str) -> String {
        let info = self.grammar.params.expect(name);
        match info.ty {
            Some(ParamType::Boolean) => "false".to_owned(),
            Some(ParamType::Integer) => "0".to_owned(),
            Some(ParamType::Str) => self.target.string_literal(""),
            Some(ParamType::Reference) => self.target.new_ref(self.target.null_value()),
            None => panic!("Unknown parameter type for {name}"),
        }
    }

    // ---- per node kind ------------------------------------------------

    fn gen_expr(&mut self, expr: ExprHandle, ctx: &mut Context, env: &mut LabelEnv) -> Outcome {
        match self.grammar.kind(expr).clone() {
            ExprKind::Literal { value, ignore_case } => {
                self.gen_literal(ctx, &value, ignore_case)
            }
            ExprKind::Class { class, raw } => self.gen_class(ctx, &class, &raw),
            ExprKind::Any => self.gen_any(ctx),
            ExprKind::RuleRef { name, assignments } => {
                self.gen_rule_ref(ctx, &name, &assignments)
            }
            ExprKind::Named { name, expr } => self.gen_named(ctx, env, &name, expr),
            ExprKind::Choice { alternatives } => self.gen_choice(ctx, env, &alternatives),
            ExprKind::Sequence { elements, picked } => {
                self.gen_sequence(ctx, env, expr, &elements, picked)
            }
            ExprKind::Labeled { label, expr } => self.gen_labeled(ctx, env, &label, expr),
            ExprKind::LabeledParam {
                label,
                parameter,
                is_ref,
            } => self.gen_labeled_param(ctx, env, &label, &parameter, is_ref),
            ExprKind::Text { expr } => self.gen_text(ctx, env, expr),
            ExprKind::SimpleAnd { expr, .. } => self.gen_simple_predicate(ctx, env, expr, false),
            ExprKind::SimpleNot { expr } => self.gen_simple_predicate(ctx, env, expr, true),
            ExprKind::Optional { expr } => self.gen_optional(ctx, env, expr),
            ExprKind::ZeroOrMore { expr } => self.gen_zero_or_more(ctx, env, expr),
            ExprKind::OneOrMore { expr } => self.gen_one_or_more(ctx, env, expr),
            ExprKind::SemanticAnd { code } => self.gen_semantic_predicate(ctx, env, &code, false),
            ExprKind::SemanticNot { code } => self.gen_semantic_predicate(ctx, env, &code, true),
            ExprKind::ParameterAnd { parameter } => {
                self.gen_parameter_predicate(ctx, &parameter, false)
            }
            ExprKind::ParameterNot { parameter } => {
                self.gen_parameter_predicate(ctx, &parameter, true)
            }
            ExprKind::Action { expr, code, .. } => self.gen_action(ctx, env, expr, &code),
        }
    }

    fn gen_literal(&mut self, ctx: &mut Context, value: &str, ignore_case: bool) -> Outcome {
        let mut out = Outcome::new();
        // the empty string statically succeeds without consuming input
        if value.is_empty() {
            out.expression = self.target.string_literal("");
            out.condition = Cond::Always;
            return out;
        }

        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        let len = self.target.string_length(value);
        if len == 1 && !ignore_case {
            // direct comparison, no substring allocation
            let c = value.chars().next().unwrap();
            out.condition = Cond::Test(self.target.single_char_condition(c));
            out.on_success(vec![format!(
                "{rn} = {};",
                self.target.string_literal(value)
            )]);
        } else {
            if len == 1 {
                out.block
                    .push(format!("{rn} = {};", self.target.char_at_current()));
            } else {
                out.block
                    .push(format!("{rn} = {};", self.target.current_substring(len)));
            }
            if ignore_case {
                out.condition = Cond::Test(format!(
                    "{} === {}",
                    self.target.to_lower(&rn),
                    self.target.string_literal(&value.to_lowercase())
                ));
            } else {
                out.condition = Cond::Test(format!(
                    "{rn} === {}",
                    self.target.string_literal(value)
                ));
            }
        }
        out.on_success(vec![self.target.advance_by(len)]);
        if let Some(fail) = self.fail_call(
            Expectation {
                kind: ExpectationKind::Literal,
                value: Some(value.to_owned()),
                description: self.target.string_literal(value),
            },
            ctx,
        ) {
            out.on_failure(vec![fail]);
        }
        out.on_failure(vec![format!("{rn} = {};", self.target.failed())]);
        out
    }

    fn gen_class(&mut self, ctx: &mut Context, class: &ClassNode, raw: &str) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        if class.is_empty() {
            // can never match
            out.condition = Cond::Never;
        } else if class.is_any() {
            // matches any one character; same as `.`
            out.condition = Cond::Test(format!(
                "{} < {}",
                self.target.curr_pos(),
                self.target.input_length()
            ));
            out.on_success(vec![format!("{rn} = {};", self.target.consume_char())]);
        } else {
            out.block
                .push(format!("{rn} = {};", self.target.char_at_current()));
            out.condition = Cond::Test(self.target.class_test(class, &rn));
            out.on_success(vec![self.target.advance()]);
        }
        out.on_failure(vec![format!("{rn} = {};", self.target.failed())]);
        if let Some(fail) = self.fail_call(
            Expectation {
                kind: ExpectationKind::Class,
                value: Some(raw.to_owned()),
                description: raw.to_owned(),
            },
            ctx,
        ) {
            out.on_failure(vec![fail]);
        }
        out
    }

    fn gen_any(&mut self, ctx: &mut Context) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        out.condition = Cond::Test(format!(
            "{} < {}",
            self.target.curr_pos(),
            self.target.input_length()
        ));
        out.on_success(vec![format!("{rn} = {};", self.target.consume_char())]);
        out.on_failure(vec![format!("{rn} = {};", self.target.failed())]);
        if let Some(fail) = self.fail_call(
            Expectation {
                kind: ExpectationKind::Any,
                value: None,
                description: "any character".to_owned(),
            },
            ctx,
        ) {
            out.on_failure(vec![fail]);
        }
        out
    }

    fn gen_rule_ref(
        &mut self,
        ctx: &mut Context,
        name: &str,
        assignments: &[Assignment],
    ) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        let callee = self
            .grammar
            .find_rule(name)
            .unwrap_or_else(|| panic!("unresolved reference to {name} survived the checks"));

        let mut new_values: HashMap<String, String> = HashMap::new();
        let mut set_mask = 0u32;
        let mut clear_mask = 0u32;
        for assignment in assignments {
            if assignment.is_ref {
                let inner = match &assignment.value {
                    AssignedValue::Increment(n) => {
                        format!("{} + {n}", self.param_expression(&assignment.name))
                    }
                    AssignedValue::Boolean(b) => b.to_string(),
                    AssignedValue::Integer(i) => i.to_string(),
                    AssignedValue::Str(s) => self.target.string_literal(s),
                };
                new_values.insert(assignment.name.clone(), self.target.new_ref(&inner));
                continue;
            }
            match &assignment.value {
                AssignedValue::Boolean(b) => {
                    let info = self.grammar.params.expect(&assignment.name);
                    let mask = 1u32 << info.bool_index.expect("boolean parameter has a bit");
                    if *b {
                        set_mask |= mask;
                    } else {
                        clear_mask |= mask;
                    }
                }
                AssignedValue::Increment(n) => {
                    let value = format!("{} + {n}", self.param_expression(&assignment.name));
                    new_values.insert(assignment.name.clone(), value);
                }
                AssignedValue::Integer(i) => {
                    new_values.insert(assignment.name.clone(), i.to_string());
                }
                AssignedValue::Str(s) => {
                    new_values.insert(assignment.name.clone(), self.target.string_literal(s));
                }
            }
        }

        let mut args = Vec::new();
        for arg in self.rule_args(callee) {
            match arg {
                RuleArg::Silence => args.push(self.silence_expr(ctx)),
                RuleArg::BoolParams => {
                    if !self.grammar.rules[self.current_rule()].has_bool_params {
                        args.push(format!("0x{set_mask:x}"));
                    } else {
                        let mut value = self.target.bool_params_arg().to_owned();
                        if clear_mask != 0 {
                            value = format!("{value} & ~0x{clear_mask:x}");
                        }
                        if set_mask != 0 {
                            if clear_mask != 0 {
                                value = format!("({value})");
                            }
                            value = format!("{value} | 0x{set_mask:x}");
                        }
                        args.push(value);
                    }
                }
                RuleArg::Param(param) => {
                    if let Some(value) = new_values.get(&param) {
                        args.push(value.clone());
                    } else if self.grammar.rules[self.current_rule()]
                        .passed_params
                        .contains(&param)
                    {
                        args.push(self.target.param_arg(&param));
                    } else {
                        args.push(self.initial_param_value(&param));
                    }
                }
            }
        }

        let func = self.schedule(callee, ctx.discard);
        out.block.push(format!(
            "{rn} = {};",
            self.target.rule_func_call(&func, &args)
        ));
        out
    }

    fn gen_named(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        name: &str,
        child: ExprHandle,
    ) -> Outcome {
        let mut out = Outcome::new();
        let mut sub_ctx = ctx.silenced();
        let sub = self.recurse(child, &mut sub_ctx, env);
        out.append(sub, self.target);
        if ctx.silence != Silence::Silent {
            if let Some(fail) = self.fail_call(
                Expectation {
                    kind: ExpectationKind::Other,
                    value: None,
                    description: name.to_owned(),
                },
                ctx,
            ) {
                out.on_failure(vec![fail]);
            }
        }
        out
    }

    fn gen_choice(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        alternatives: &[ExprHandle],
    ) -> Outcome {
        if alternatives.len() == 1 {
            return self.recurse(alternatives[0], ctx, env);
        }
        let mut out = Outcome::new();
        self.choice_label += 1;
        let label = format!("choice_{}", self.choice_label);
        out.block.push(self.target.block_start(&label));
        let reg = self.result_reg(ctx, &mut out);
        // alternatives are tried in order; the first success wins
        for (i, &alt) in alternatives.iter().enumerate() {
            let mut alt_ctx = ctx.with_result(reg);
            let mut alt_env = env.clone();
            let sub = self.recurse(alt, &mut alt_ctx, &mut alt_env);
            out.append(sub, self.target);
            if i != alternatives.len() - 1 {
                out.on_success(vec![self.target.goto_block_end(&label)]);
            }
        }
        out.resolve(self.target);
        out.block.push(self.target.block_end(&label));
        out
    }

    fn gen_sequence(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        _seq: ExprHandle,
        elements: &[ExprHandle],
        picked: Option<u32>,
    ) -> Outcome {
        if elements.len() == 1 {
            return self.recurse(elements[0], ctx, env);
        }
        let mut out = Outcome::new();
        let result_reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(result_reg);

        let element_always =
            |gen: &Self, el: ExprHandle| gen.grammar.always_match[el] == Some(true);
        // no element after the first can fail, so nothing ever needs to
        // backtrack to the start of the sequence
        let needs_restore = elements[1..]
            .iter()
            .any(|&el| !element_always(self, el));
        self.seq_label += 1;
        let label = format!("seq_{}", self.seq_label);
        out.block.push(self.target.block_start(&label));
        let pos_reg = if needs_restore {
            let pos = self.regs.position();
            out.block.push(format!(
                "{} = {};",
                self.target.reg_name(pos),
                self.target.curr_pos()
            ));
            Some(pos)
        } else {
            None
        };

        let mut parts = Vec::new();
        let mut element_regs: Vec<Reg> = Vec::new();
        for (i, &el) in elements.iter().enumerate() {
            let mut el_ctx = ctx.without_result();
            let mut sub = self.recurse(el, &mut el_ctx, env);
            // element values stay live until the final result is built
            element_regs.append(&mut sub.free);
            out.append(sub, self.target);
            parts.push(out.expression.clone());

            if element_always(self, el) {
                out.condition = Cond::Always;
            } else if !matches!(out.condition, Cond::Always) {
                // Failure backtracks to the start of the sequence. The
                // first element needs no restore: failing subexpressions
                // do not advance the position.
                if i > 0 {
                    if let Some(pos) = pos_reg {
                        out.on_failure(vec![format!(
                            "{} = {};",
                            self.target.curr_pos(),
                            self.target.reg_name(pos)
                        )]);
                    }
                }
                out.on_failure(vec![
                    format!("{rn} = {};", self.target.failed()),
                    self.target.goto_block_end(&label),
                ]);
            }
            out.resolve(self.target);
        }

        let value = if ctx.discard {
            "true".to_owned()
        } else if let Some(p) = picked {
            parts[p as usize].clone()
        } else {
            self.target.array_literal(&parts)
        };
        out.block.push(format!("{rn} = {value};"));
        out.block.push(self.target.block_end(&label));
        out.expression = rn;

        if let Some(pos) = pos_reg {
            element_regs.push(pos);
        }
        self.release(element_regs, &mut out);
        out
    }

    fn gen_labeled(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        label: &str,
        child: ExprHandle,
    ) -> Outcome {
        // label registers live until the end of the rule
        let reg = self.regs.value(&mut Vec::new());
        let rn = self.target.reg_name(reg);
        env.insert(label.to_owned(), Binding::value(rn.clone()));
        let mut sub_env = env.clone();
        let mut sub_ctx = ctx.with_result(reg).with_discard(false);
        let mut sub = self.recurse(child, &mut sub_ctx, &mut sub_env);
        sub.block.push(format!("// {label} <- {rn}"));
        sub
    }

    fn gen_labeled_param(
        &mut self,
        _ctx: &mut Context,
        env: &mut LabelEnv,
        label: &str,
        parameter: &str,
        is_ref: bool,
    ) -> Outcome {
        let mut out = Outcome::new();
        if is_ref {
            let info = self.grammar.params.expect(parameter);
            assert!(
                info.ty == Some(ParamType::Reference),
                "cannot capture non-reference parameter {parameter} by reference"
            );
            let passed = self.grammar.rules[self.current_rule()]
                .passed_params
                .contains(parameter);
            let expr = if passed {
                self.target.param_arg(parameter)
            } else {
                self.target.new_ref(self.target.null_value())
            };
            env.insert(label.to_owned(), Binding { expr, is_ref: true });
        } else {
            let expr = self.param_expression(parameter);
            env.insert(label.to_owned(), Binding::value(expr));
        }
        out.condition = Cond::Always;
        out.expression = format!("({})", self.target.assertion_success());
        out
    }

    fn gen_text(&mut self, ctx: &mut Context, env: &mut LabelEnv, child: ExprHandle) -> Outcome {
        // the caller only wants success/failure, the substring would be
        // thrown away
        if ctx.discard {
            return self.recurse(child, ctx, env);
        }
        let start = self.regs.position();
        let sn = self.target.reg_name(start);
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        out.block.push(format!("{sn} = {};", self.target.curr_pos()));
        let mut sub_env = env.clone();
        let mut sub_ctx = ctx.with_discard(true);
        let sub = self.recurse(child, &mut sub_ctx, &mut sub_env);
        out.append(sub, self.target);
        out.on_success(vec![format!(
            "{rn} = {};",
            self.target.substring(&sn, self.target.curr_pos())
        )]);
        out.on_failure(vec![format!("{rn} = {};", self.target.failed())]);
        self.release(vec![start], &mut out);
        out
    }

    fn gen_simple_predicate(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        child: ExprHandle,
        negate: bool,
    ) -> Outcome {
        let mut out = Outcome::new();
        let pos = self.regs.position();
        let pn = self.target.reg_name(pos);
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        out.block.push(format!("{pn} = {};", self.target.curr_pos()));
        // assertions run silenced and discarded; they consume no input on
        // either branch
        let mut sub_env = env.clone();
        let mut sub_ctx = ctx.silenced().with_discard(true);
        let sub = self.recurse(child, &mut sub_ctx, &mut sub_env);
        out.append(sub, self.target);
        if negate {
            out.resolve(self.target);
            out.condition = Cond::Test(self.target.is_failed(&rn));
            out.on_failure(vec![format!("{rn} = {};", self.target.failed())]);
        }
        out.on_success(vec![format!(
            "{rn} = {};",
            self.target.assertion_success()
        )]);
        let restore = format!("{} = {pn};", self.target.curr_pos());
        if negate {
            out.on_failure(vec![restore]);
        } else {
            out.on_success(vec![restore]);
        }
        self.release(vec![pos], &mut out);
        out
    }

    fn gen_semantic_predicate(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        code: &str,
        negate: bool,
    ) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        let call = self.make_action(code, env);
        out.block.push(format!(
            "{} = {};",
            self.target.saved_pos(),
            self.target.curr_pos()
        ));
        out.block.push(format!("{rn} = {call};"));
        out.condition = if negate {
            Cond::Test(format!("!{rn}"))
        } else {
            Cond::Test(rn.clone())
        };
        out.on_success(vec![format!(
            "{rn} = {};",
            self.target.assertion_success()
        )]);
        out.on_failure(vec![format!("{rn} = {};", self.target.failed())]);
        out
    }

    fn gen_parameter_predicate(
        &mut self,
        ctx: &mut Context,
        parameter: &str,
        negate: bool,
    ) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        let value = self.param_expression(parameter);
        let ty = self.grammar.params.expect(parameter).ty;
        out.condition = if negate {
            Cond::Test(format!("!({value})"))
        } else {
            match ty {
                None | Some(ParamType::Boolean) => Cond::Test(value),
                Some(_) => Cond::Test(self.target.to_bool(&value)),
            }
        };
        out.on_success(vec![format!(
            "{rn} = {};",
            self.target.assertion_success()
        )]);
        out.on_failure(vec![format!("{rn} = {};", self.target.failed())]);
        out
    }

    fn gen_optional(&mut self, ctx: &mut Context, env: &mut LabelEnv, child: ExprHandle) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        let mut sub_env = env.clone();
        let mut sub_ctx = ctx.clone();
        let sub = self.recurse(child, &mut sub_ctx, &mut sub_env);
        out.append(sub, self.target);
        // substitute the no-value sentinel instead of propagating failure
        out.on_failure(vec![format!("{rn} = {};", self.target.null_value())]);
        out.resolve(self.target);
        out.condition = Cond::Always;
        out
    }

    /// Repeated character class matches scan a run in one tight loop
    /// instead of re-entering the generic match once per character.
    fn class_run_scan(&mut self, child: ExprHandle) -> Option<Vec<String>> {
        match self.grammar.kind(child) {
            ExprKind::Class { class, .. } if !class.is_empty() => {
                let test = self
                    .target
                    .class_test(class, &self.target.char_at_current());
                Some(vec![
                    format!("while ({test}) {{"),
                    format!("  {}", self.target.advance()),
                    "}".to_owned(),
                ])
            }
            _ => None,
        }
    }

    fn gen_zero_or_more(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        child: ExprHandle,
    ) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);

        if ctx.discard {
            if let Some(scan) = self.class_run_scan(child) {
                out.block.extend(scan);
                out.condition = Cond::Always;
                out.expression = "true".to_owned();
                return out;
            }
        }

        let mut part_owner = Vec::new();
        let part = self.regs.value(&mut part_owner);
        let pn = self.target.reg_name(part);
        let mut sub_ctx = ctx.with_result(part);

        if !ctx.discard {
            out.block.push(format!("{rn} = {};", self.target.empty_array()));
        }
        let mut first_env = env.clone();
        let mut first = self.recurse(child, &mut sub_ctx, &mut first_env);
        first.resolve(self.target);
        out.block.append(&mut first.block);

        // the loop body matches the subexpression again after consuming
        // the previous iteration's value
        let mut loop_env = env.clone();
        let mut repeat = self.recurse(child, &mut sub_ctx, &mut loop_env);
        out.block
            .push(format!("while ({}) {{", self.target.not_failed(&pn)));
        if !ctx.discard {
            out.block
                .push(format!("  {}", self.target.push(&rn, &pn)));
        }
        for line in repeat.resolve(self.target) {
            for piece in line.split('\n') {
                out.block.push(format!("  {piece}"));
            }
        }
        out.block.push("}".to_owned());

        let mut to_free = part_owner;
        to_free.append(&mut repeat.free);
        self.release(to_free, &mut out);
        // a greedy loop always succeeds; the iteration that ends it is
        // never an error
        out.condition = Cond::Always;
        if ctx.discard {
            out.expression = "true".to_owned();
        }
        out
    }

    fn gen_one_or_more(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        child: ExprHandle,
    ) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        let initial_free = std::mem::take(&mut out.free);

        let mut part_owner = Vec::new();
        let part = self.regs.value(&mut part_owner);
        let pn = self.target.reg_name(part);
        let mut sub_ctx = ctx.with_result(part);

        let mut first_env = env.clone();
        let first = self.recurse(child, &mut sub_ctx, &mut first_env);
        out.append(first, self.target);
        out.on_failure(vec![format!("{rn} = {};", self.target.failed())]);

        let mut success = Vec::new();
        if ctx.discard {
            success.push(format!("{rn} = true;"));
        } else {
            success.push(format!("{rn} = {};", self.target.empty_array()));
        }
        let scan = if ctx.discard {
            self.class_run_scan(child)
        } else {
            None
        };
        match scan {
            Some(lines) => success.extend(lines),
            None => {
                let mut loop_env = env.clone();
                let mut repeat = self.recurse(child, &mut sub_ctx, &mut loop_env);
                success.push(format!("while ({}) {{", self.target.not_failed(&pn)));
                if !ctx.discard {
                    success.push(format!("  {}", self.target.push(&rn, &pn)));
                }
                for line in repeat.resolve(self.target) {
                    for piece in line.split('\n') {
                        success.push(format!("  {piece}"));
                    }
                }
                success.push("}".to_owned());
                out.free.append(&mut repeat.free);
            }
        }
        out.on_success(success);

        // prevent the last subexpression's condition and expression from
        // leaking through
        out.resolve(self.target);
        out.expression = rn;

        let mut to_free = std::mem::take(&mut out.free);
        to_free.extend(part_owner);
        self.release(to_free, &mut out);
        out.free = initial_free;
        out
    }

    fn gen_action(
        &mut self,
        ctx: &mut Context,
        env: &mut LabelEnv,
        child: ExprHandle,
        code: &str,
    ) -> Outcome {
        let mut out = Outcome::new();
        let reg = self.result_reg(ctx, &mut out);
        let rn = self.target.reg_name(reg);
        let saved = self.regs.position();
        let sn = self.target.reg_name(saved);

        let mut sub_env = env.clone();
        let mut sub_ctx = ctx.with_discard(true);
        let sub = self.recurse(child, &mut sub_ctx, &mut sub_env);
        let call = self.make_action(code, &sub_env);

        out.block.push(format!("{sn} = {};", self.target.curr_pos()));
        out.append(sub, self.target);
        // expose the span of the match to text()/location() in user code
        out.on_success(vec![
            format!("{} = {sn};", self.target.saved_pos()),
            format!("{rn} = {call};"),
        ]);
        out
    }
}
