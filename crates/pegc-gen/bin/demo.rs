//! Compiles a small arithmetic grammar built programmatically and prints
//! the generated parser source. Useful for eyeballing generator output:
//!
//!   demo [--php] [--cache] [--trace] [-v]

use anyhow::Result;
use pegc::grammar::{ExprKind, Grammar};
use pegc::options::{CompileOptions, Language};
use pegc::span::Span;
use pegc_gen::compile;

fn build_grammar() -> Result<Grammar> {
    let mut g = Grammar::new();

    // start = additive
    let additive_ref = g.node(ExprKind::rule_ref("additive"));
    g.add_rule("start", additive_ref, Span::empty())?;

    // additive = left:multiplicative "+" right:additive { return left + right; }
    //          / multiplicative
    let left = {
        let m = g.node(ExprKind::rule_ref("multiplicative"));
        g.node(ExprKind::Labeled {
            label: "left".into(),
            expr: m,
        })
    };
    let plus = g.node(ExprKind::literal("+"));
    let right = {
        let a = g.node(ExprKind::rule_ref("additive"));
        g.node(ExprKind::Labeled {
            label: "right".into(),
            expr: a,
        })
    };
    let seq = g.node(ExprKind::sequence(vec![left, plus, right]));
    let action = g.node(ExprKind::Action {
        expr: seq,
        code: "return left + right;".into(),
        pure: false,
    });
    let fallback = g.node(ExprKind::rule_ref("multiplicative"));
    let additive = g.node(ExprKind::choice(vec![action, fallback]));
    g.add_rule("additive", additive, Span::empty())?;

    // multiplicative = digits:$[0-9]+ { return parseInt(digits, 10); }
    let digit = g.node(ExprKind::Class {
        class: pegc::charset::ClassNode {
            parts: vec![pegc::charset::ClassPart::range('0', '9')],
            inverted: false,
            ignore_case: false,
            sorted: true,
        },
        raw: "[0-9]".into(),
    });
    let plus_rep = g.node(ExprKind::OneOrMore { expr: digit });
    let text = g.node(ExprKind::Text { expr: plus_rep });
    let labeled = g.node(ExprKind::Labeled {
        label: "digits".into(),
        expr: text,
    });
    let action = g.node(ExprKind::Action {
        expr: labeled,
        code: "return parseInt(digits, 10);".into(),
        pure: false,
    });
    g.add_rule("multiplicative", action, Span::empty())?;

    Ok(g)
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let flag = |name: &str| args.iter().any(|arg| arg == name);

    let level = if flag("-v") {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    simplelog::SimpleLogger::init(level, simplelog::Config::default())?;

    let options = CompileOptions {
        allowed_start_rules: vec!["start".into()],
        language: if flag("--php") {
            Language::Php
        } else {
            Language::Javascript
        },
        cache: flag("--cache"),
        trace: flag("--trace"),
        ..Default::default()
    };

    let mut grammar = build_grammar()?;
    let source = compile(&mut grammar, options)?;
    println!("{source}");
    Ok(())
}
