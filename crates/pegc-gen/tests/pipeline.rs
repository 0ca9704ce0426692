//! End-to-end tests: build grammars programmatically, run the whole
//! pipeline, and check structural properties of the generated source.

use pegc::charset::{ClassNode, ClassPart};
use pegc::grammar::{AssignedValue, Assignment, ExprHandle, ExprKind, Grammar};
use pegc::options::{CompileOptions, Language, Output};
use pegc::span::Span;
use pegc_gen::compile;

fn lit(g: &mut Grammar, s: &str) -> ExprHandle {
    g.node(ExprKind::literal(s))
}

fn rref(g: &mut Grammar, name: &str) -> ExprHandle {
    g.node(ExprKind::rule_ref(name))
}

fn seq(g: &mut Grammar, elements: Vec<ExprHandle>) -> ExprHandle {
    g.node(ExprKind::sequence(elements))
}

fn choice(g: &mut Grammar, alternatives: Vec<ExprHandle>) -> ExprHandle {
    g.node(ExprKind::choice(alternatives))
}

fn class(g: &mut Grammar, start: char, end: char, raw: &str) -> ExprHandle {
    g.node(ExprKind::Class {
        class: ClassNode {
            parts: vec![ClassPart::range(start, end)],
            inverted: false,
            ignore_case: false,
            sorted: true,
        },
        raw: raw.into(),
    })
}

fn options(start: &str) -> CompileOptions {
    CompileOptions {
        allowed_start_rules: vec![start.into()],
        ..Default::default()
    }
}

fn compile_js(grammar: &mut Grammar, options: CompileOptions) -> String {
    compile(grammar, options).expect("grammar compiles")
}

/// The a^n b^n c^n grammar: S = &(A "c") "a"+ B !("a"/"b"/"c");
/// A = "a" A? "b"; B = "b" B? "c".
fn anbncn() -> Grammar {
    let mut g = Grammar::new();

    let guard = {
        let a = rref(&mut g, "A");
        let c = lit(&mut g, "c");
        let inner = seq(&mut g, vec![a, c]);
        g.node(ExprKind::simple_and(inner))
    };
    let a_plus = {
        let a = lit(&mut g, "a");
        let rep = g.node(ExprKind::OneOrMore { expr: a });
        g.node(ExprKind::Labeled {
            label: "a".into(),
            expr: rep,
        })
    };
    let b_ref = {
        let b = rref(&mut g, "B");
        g.node(ExprKind::Labeled {
            label: "B".into(),
            expr: b,
        })
    };
    let not_tail = {
        let a = lit(&mut g, "a");
        let b = lit(&mut g, "b");
        let c = lit(&mut g, "c");
        let any_of = choice(&mut g, vec![a, b, c]);
        g.node(ExprKind::SimpleNot { expr: any_of })
    };
    let body = seq(&mut g, vec![guard, a_plus, b_ref, not_tail]);
    g.add_rule("S", body, Span::empty()).unwrap();

    // A = "a" A? "b"
    let a_body = {
        let a = lit(&mut g, "a");
        let rec = rref(&mut g, "A");
        let opt = g.node(ExprKind::Optional { expr: rec });
        let b = lit(&mut g, "b");
        seq(&mut g, vec![a, opt, b])
    };
    g.add_rule("A", a_body, Span::empty()).unwrap();

    // B = "b" B? "c"
    let b_body = {
        let b = lit(&mut g, "b");
        let rec = rref(&mut g, "B");
        let opt = g.node(ExprKind::Optional { expr: rec });
        let c = lit(&mut g, "c");
        seq(&mut g, vec![b, opt, c])
    };
    g.add_rule("B", b_body, Span::empty()).unwrap();

    g
}

#[test]
fn minimal_literal_grammar() {
    let mut g = Grammar::new();
    let a = lit(&mut g, "a");
    g.add_rule("start", a, Span::empty()).unwrap();

    let source = compile_js(&mut g, options("start"));
    assert!(source.contains("function peg$parsestart(silence)"));
    assert!(source.contains(
        "{ type: \"literal\", value: \"a\", description: \"\\\"a\\\"\" }"
    ));
    assert!(source.contains("peg$startRuleFunction"));
    assert!(source.contains("exports.parse"));
}

#[test]
fn ordered_choice_tries_alternatives_in_order() {
    // start = "ab" / "a" — the first alternative is tried first, the
    // match for "a" must come later in the function body
    let mut g = Grammar::new();
    let ab = lit(&mut g, "ab");
    let a = lit(&mut g, "a");
    let c = choice(&mut g, vec![ab, a]);
    g.add_rule("start", c, Span::empty()).unwrap();

    let source = compile_js(&mut g, options("start"));
    assert!(source.contains("choice_1: {"));
    assert!(source.contains("break choice_1;"));
    let first = source.find("input.substr(peg$currPos, 2)").unwrap();
    let second = source.find("input.charCodeAt(peg$currPos) === 97").unwrap();
    assert!(first < second, "\"ab\" must be tried before \"a\"");
}

#[test]
fn named_rule_reports_itself_not_its_children() {
    // start = abc; abc "a bc thing" = "a" "b" "c"
    let mut g = Grammar::new();
    let r = rref(&mut g, "abc");
    g.add_rule("start", r, Span::empty()).unwrap();
    let body = {
        let a = lit(&mut g, "a");
        let b = lit(&mut g, "b");
        let c = lit(&mut g, "c");
        seq(&mut g, vec![a, b, c])
    };
    let named = g.node(ExprKind::Named {
        name: "a bc thing".into(),
        expr: body,
    });
    g.add_rule("abc", named, Span::empty()).unwrap();

    let source = compile_js(&mut g, options("start"));
    assert!(source.contains("{ type: \"other\", description: \"a bc thing\" }"));
    // the literals inside the named boundary never report
    assert!(!source.contains("{ type: \"literal\", value: \"b\""));
}

#[test]
fn predicates_schedule_discard_variants() {
    // start = &b "x"; b = "b" "c" — b is not a simple rule, so it stays a
    // function and the assertion calls its discard variant
    let mut g = Grammar::new();
    let b_ref = rref(&mut g, "b");
    let guard = g.node(ExprKind::simple_and(b_ref));
    let x = lit(&mut g, "x");
    let body = seq(&mut g, vec![guard, x]);
    g.add_rule("start", body, Span::empty()).unwrap();
    let b = {
        let b1 = lit(&mut g, "b");
        let c1 = lit(&mut g, "c");
        seq(&mut g, vec![b1, c1])
    };
    g.add_rule("b", b, Span::empty()).unwrap();

    let source = compile_js(&mut g, options("start"));
    // the reference inside the assertion uses the discard variant, and b
    // never reports failure so it takes no silence argument
    assert!(source.contains("peg$discardb()"));
    assert!(source.contains("function peg$discardb()"));
    assert!(!source.contains("function peg$parseb("));
}

#[test]
fn lookahead_saves_and_restores_position() {
    let mut g = Grammar::new();
    let b = lit(&mut g, "b");
    let guard = g.node(ExprKind::SimpleNot { expr: b });
    let any = g.node(ExprKind::Any);
    let body = seq(&mut g, vec![guard, any]);
    g.add_rule("start", body, Span::empty()).unwrap();

    let mut opts = options("start");
    // keep the !"b" . sequence intact for this test
    opts.no_optimize_character_class = true;
    let source = compile_js(&mut g, opts);
    assert!(source.contains(" = peg$currPos;"));
    assert!(source.contains("peg$currPos = p"));
}

#[test]
fn cache_option_wraps_rules() {
    let mut g = Grammar::new();
    let a = lit(&mut g, "a");
    g.add_rule("start", a, Span::empty()).unwrap();

    let mut opts = options("start");
    opts.cache = true;
    let source = compile_js(&mut g, opts);
    assert!(source.contains("var peg$resultsCache = {};"));
    assert!(source.contains(".join(\":\")"));
    assert!(source.contains("peg$currPos = cached.nextPos;"));
    assert!(source.contains("peg$resultsCache[key] = cached;"));
}

#[test]
fn trace_option_decorates_rules() {
    let mut g = Grammar::new();
    let a = lit(&mut g, "a");
    g.add_rule("start", a, Span::empty()).unwrap();

    let mut opts = options("start");
    opts.trace = true;
    let source = compile_js(&mut g, opts);
    assert!(source.contains("peg$traceDecorator("));
    assert!(source.contains("var peg$parsestart = peg$traceDecorator"));
}

#[test]
fn stream_rules_generate_iterators() {
    let mut g = Grammar::new();
    let a = lit(&mut g, "a");
    let star = g.node(ExprKind::ZeroOrMore { expr: a });
    g.add_rule("start", star, Span::empty()).unwrap();

    let mut opts = options("start");
    opts.allowed_stream_rules = vec!["start".into()];
    let source = compile_js(&mut g, opts);
    assert!(source.contains("function* peg$streamstart("));
    assert!(source.contains("yield "));
    assert!(source.contains("peg$streamRuleFunctions"));
}

#[test]
fn boolean_parameters_pack_into_a_mask() {
    // start = callee<flag=true>; callee = &{flag} "x"
    let mut g = Grammar::new();
    let call = g.node(ExprKind::RuleRef {
        name: "callee".into(),
        assignments: vec![Assignment {
            name: "flag".into(),
            value: AssignedValue::Boolean(true),
            is_ref: false,
            span: Span::empty(),
        }],
    });
    g.add_rule("start", call, Span::empty()).unwrap();
    let test = g.node(ExprKind::ParameterAnd {
        parameter: "flag".into(),
    });
    let x = lit(&mut g, "x");
    let body = seq(&mut g, vec![test, x]);
    g.add_rule("callee", body, Span::empty()).unwrap();

    let source = compile_js(&mut g, options("start"));
    assert!(source.contains("function peg$parsecallee(silence, boolParams)"));
    assert!(source.contains("peg$parsecallee(silence, 0x1)"));
    assert!(source.contains("/*flag*/ (boolParams & 0x1) !== 0"));
}

#[test]
fn text_nodes_substring_the_consumed_input() {
    let mut g = Grammar::new();
    let digit = class(&mut g, '0', '9', "[0-9]");
    let rep = g.node(ExprKind::OneOrMore { expr: digit });
    let text = g.node(ExprKind::Text { expr: rep });
    g.add_rule("start", text, Span::empty()).unwrap();

    let source = compile_js(&mut g, options("start"));
    assert!(source.contains("input.substring(p1, peg$currPos)"));
}

#[test]
fn discarded_class_repetition_scans_a_run() {
    // start = &([0-9]* "x") "y" — the repetition inside the predicate is
    // discarded, so it compiles to a run scan instead of a list loop
    let mut g = Grammar::new();
    let digit = class(&mut g, '0', '9', "[0-9]");
    let star = g.node(ExprKind::ZeroOrMore { expr: digit });
    let x = lit(&mut g, "x");
    let inner = seq(&mut g, vec![star, x]);
    let guard = g.node(ExprKind::simple_and(inner));
    let y = lit(&mut g, "y");
    let body = seq(&mut g, vec![guard, y]);
    g.add_rule("start", body, Span::empty()).unwrap();

    let source = compile_js(&mut g, options("start"));
    assert!(source.contains("while (/^[0-9]/.test(input.charAt(peg$currPos))) {"));
}

#[test]
fn anbncn_pipeline_is_deterministic() {
    let source1 = compile_js(&mut anbncn(), options("S"));
    let source2 = compile_js(&mut anbncn(), options("S"));
    assert_eq!(source1, source2);
    // the lookahead scheduled discard variants of A lazily
    assert!(source1.contains("function peg$discardA("));
}

#[test]
fn performance_transforms_can_be_disabled() {
    let mut opts = options("S");
    opts.no_inlining = true;
    opts.no_optimize_character_class = true;
    opts.optimize_first_set = pegc::options::FirstSetMode::None;
    opts.no_always_match = true;
    let source = compile_js(&mut anbncn(), opts);
    assert!(source.contains("function peg$parseS("));
}

#[test]
fn php_target_smoke() {
    let mut g = Grammar::new();
    let ab = lit(&mut g, "ab");
    let a = lit(&mut g, "a");
    let c = choice(&mut g, vec![ab, a]);
    g.add_rule("start", c, Span::empty()).unwrap();

    let mut opts = options("start");
    opts.language = Language::Php;
    let source = compile_js(&mut g, opts);
    assert!(source.contains("<?php"));
    assert!(source.contains("class Parser extends ParserBase"));
    assert!(source.contains("private function parsestart($silence)"));
    assert!(source.contains("goto choice_1;"));
    assert!(source.contains("choice_1:"));
    assert!(source.contains("self::$FAILED"));
}

#[test]
fn parser_output_mode_is_rejected() {
    let mut g = Grammar::new();
    let a = lit(&mut g, "a");
    g.add_rule("start", a, Span::empty()).unwrap();

    let mut opts = options("start");
    opts.output = Output::Parser;
    assert!(compile(&mut g, opts).is_err());
}

#[test]
fn unknown_start_rule_is_fatal() {
    let mut g = Grammar::new();
    let a = lit(&mut g, "a");
    g.add_rule("start", a, Span::empty()).unwrap();

    assert!(compile(&mut g, options("nope")).is_err());
}

#[test]
fn nested_constructs_compile() {
    // comment = "(*" (comment / !"*)" .)* "*)"
    let mut g = Grammar::new();
    let open = lit(&mut g, "(*");
    let inner = {
        let rec = rref(&mut g, "comment");
        let close = lit(&mut g, "*)");
        let not_close = g.node(ExprKind::SimpleNot { expr: close });
        let any = g.node(ExprKind::Any);
        let skip = seq(&mut g, vec![not_close, any]);
        let alt = choice(&mut g, vec![rec, skip]);
        g.node(ExprKind::ZeroOrMore { expr: alt })
    };
    let close = lit(&mut g, "*)");
    let body = seq(&mut g, vec![open, inner, close]);
    g.add_rule("comment", body, Span::empty()).unwrap();

    let source = compile_js(&mut g, options("comment"));
    assert!(source.contains("function peg$parsecomment("));
}
