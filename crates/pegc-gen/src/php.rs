//! PHP emission primitives. Generated code is a set of private methods on
//! a parser class whose base provides the runtime helpers (`fail`,
//! `charAt`, `advanceChar`, `newRef`, the expectation table lookup, ...).
//! Positions count codepoints; structured control flow uses `goto` labels
//! because PHP has no labelled breaks.

use pegc::charset::{ClassNode, ClassOps, ClassPart};
use pegc::options::{Language, Optimize};

use crate::regalloc::{Reg, RegKind};
use crate::target::{CacheOpts, Expectation, SourcePieces, Target};

pub struct Php {
    pub optimize: Optimize,
    pub classes: ClassOps,
}

fn indent2(text: &str, out: &mut String) {
    for line in text.split('\n') {
        if line.is_empty() {
            out.push('\n');
        } else {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
}

fn escape_string_char(cp: u32, out: &mut String) {
    match cp {
        0x22 => out.push_str("\\\""),
        0x5C => out.push_str("\\\\"),
        0x24 => out.push_str("\\$"),
        0x00..=0x0F => out.push_str(&format!("\\x0{cp:x}")),
        0x10..=0x1F | 0x7F => out.push_str(&format!("\\x{cp:x}")),
        0x80.. => out.push_str(&format!("\\u{{{cp:x}}}")),
        _ => out.push(char::from_u32(cp).unwrap()),
    }
}

fn escape_class_char(cp: u32, out: &mut String) {
    match cp {
        // the pattern lives inside a double-quoted PHP string
        0x22 => out.push_str("\\\""),
        0x24 => out.push_str("\\$"),
        0x5C => out.push_str("\\\\\\\\"),
        0x2F => out.push_str("\\/"),
        0x5D => out.push_str("\\]"),
        0x5E => out.push_str("\\^"),
        0x2D => out.push_str("\\-"),
        0x00..=0x1F | 0x7F => out.push_str(&format!("\\x{{{cp:x}}}")),
        0x80.. => out.push_str(&format!("\\x{{{cp:x}}}")),
        _ => out.push(char::from_u32(cp).unwrap()),
    }
}

impl Php {
    pub fn new(optimize: Optimize, classes: ClassOps) -> Php {
        Php { optimize, classes }
    }

    fn class_pattern(&self, class: &ClassNode) -> String {
        let mut out = String::from("\"/^[");
        if class.inverted {
            out.push('^');
        }
        for part in &class.parts {
            match *part {
                ClassPart::Single(cp) => escape_class_char(cp, &mut out),
                ClassPart::Range(start, end) => {
                    escape_class_char(start, &mut out);
                    out.push('-');
                    escape_class_char(end, &mut out);
                }
            }
        }
        out.push_str("]/u");
        if class.ignore_case {
            out.push('i');
        }
        out.push('"');
        out
    }

    /// Few enough plain characters for an equality chain to beat the
    /// regexp engine.
    fn prefers_compare_chain(&self, class: &ClassNode) -> bool {
        self.optimize == Optimize::Speed
            && !class.inverted
            && !class.ignore_case
            && class.parts.len() <= 4
            && class
                .parts
                .iter()
                .all(|part| matches!(part, ClassPart::Single(_)))
    }
}

impl Target for Php {
    fn language(&self) -> Language {
        Language::Php
    }

    fn reg_name(&self, reg: Reg) -> String {
        match reg.kind {
            RegKind::Value => format!("$r{}", reg.index),
            RegKind::Pos => format!("$p{}", reg.index),
        }
    }

    fn rule_func_name(&self, rule: &str, discard: bool, iterable: bool) -> String {
        if iterable {
            format!("stream{rule}")
        } else if discard {
            format!("discard{rule}")
        } else {
            format!("parse{rule}")
        }
    }

    fn silence_arg(&self) -> &'static str {
        "$silence"
    }

    fn bool_params_arg(&self) -> &'static str {
        "$boolParams"
    }

    fn param_arg(&self, name: &str) -> String {
        format!("$param_{name}")
    }

    fn param_arg_declarator(&self, name: &str, is_ref: bool) -> String {
        if is_ref {
            format!("&$param_{name}")
        } else {
            format!("$param_{name}")
        }
    }

    fn action_arg_declarator(&self, name: &str, is_ref: bool) -> String {
        if is_ref {
            format!("&${name}")
        } else {
            format!("${name}")
        }
    }

    fn string_literal(&self, value: &str) -> String {
        let mut out = String::from("\"");
        for c in value.chars() {
            escape_string_char(c as u32, &mut out);
        }
        out.push('"');
        out
    }

    fn string_length(&self, value: &str) -> usize {
        // positions count codepoints
        value.chars().count()
    }

    fn expectation_literal(&self, e: &Expectation) -> String {
        let mut out = format!("[\"type\" => {}", self.string_literal(e.kind.name()));
        if let Some(value) = &e.value {
            out.push_str(&format!(", \"value\" => {}", self.string_literal(value)));
        }
        out.push_str(&format!(
            ", \"description\" => {}]",
            self.string_literal(&e.description)
        ));
        out
    }

    fn failed(&self) -> &'static str {
        "self::$FAILED"
    }

    fn curr_pos(&self) -> &'static str {
        "$this->currPos"
    }

    fn saved_pos(&self) -> &'static str {
        "$this->savedPos"
    }

    fn input_length(&self) -> &'static str {
        "$this->inputLength"
    }

    fn null_value(&self) -> &'static str {
        "null"
    }

    fn assertion_success(&self) -> &'static str {
        "false"
    }

    fn is_failed(&self, expr: &str) -> String {
        format!("{expr} === self::$FAILED")
    }

    fn not_failed(&self, expr: &str) -> String {
        format!("{expr} !== self::$FAILED")
    }

    fn to_bool(&self, expr: &str) -> String {
        format!("(bool)({expr})")
    }

    fn char_at_current(&self) -> String {
        "self::charAt($this->input, $this->currPos)".to_owned()
    }

    fn consume_char(&self) -> String {
        "self::consumeChar($this->input, $this->currPos)".to_owned()
    }

    fn advance(&self) -> String {
        "self::advanceChar($this->input, $this->currPos);".to_owned()
    }

    fn advance_by(&self, n: usize) -> String {
        format!("$this->currPos += {n};")
    }

    fn current_substring(&self, len: usize) -> String {
        format!("self::charsAt($this->input, $this->currPos, {len})")
    }

    fn substring(&self, start: &str, end: &str) -> String {
        format!("substr($this->input, {start}, {end} - {start})")
    }

    fn single_char_condition(&self, c: char) -> String {
        format!(
            "self::charAt($this->input, $this->currPos) === {}",
            self.string_literal(&c.to_string())
        )
    }

    fn to_lower(&self, expr: &str) -> String {
        format!("mb_strtolower({expr}, \"UTF-8\")")
    }

    fn class_test(&self, class: &ClassNode, subject: &str) -> String {
        if self.prefers_compare_chain(class) {
            let parts: Vec<String> = class
                .parts
                .iter()
                .map(|part| match *part {
                    ClassPart::Single(cp) => {
                        let c = char::from_u32(cp).expect("scalar codepoint");
                        format!("{subject} === {}", self.string_literal(&c.to_string()))
                    }
                    ClassPart::Range(..) => unreachable!(),
                })
                .collect();
            return format!("({})", parts.join(" || "));
        }
        // expand case-insensitivity ourselves when the restrict mode would
        // disagree with the regexp engine's folding
        if class.ignore_case && self.classes.caseless_restrict {
            let expanded = self.classes.case_sensitive(class.clone());
            return format!(
                "preg_match({}, {subject}) === 1",
                self.class_pattern(&expanded)
            );
        }
        format!("preg_match({}, {subject}) === 1", self.class_pattern(class))
    }

    fn block_start(&self, label: &str) -> String {
        format!("// start {label}")
    }

    fn block_end(&self, label: &str) -> String {
        format!("{label}:")
    }

    fn goto_block_end(&self, label: &str) -> String {
        format!("goto {label};")
    }

    fn var_declaration(&self, _names: &[String]) -> Option<String> {
        None
    }

    fn empty_array(&self) -> &'static str {
        "[]"
    }

    fn array_literal(&self, parts: &[String]) -> String {
        format!("[{}]", parts.join(","))
    }

    fn push(&self, array: &str, value: &str) -> String {
        format!("{array}[] = {value};")
    }

    fn rule_func_declaration(&self, name: &str, args: &[String], body: &str) -> String {
        let mut out = format!("private function {name}({}) {{\n", args.join(", "));
        indent2(body, &mut out);
        out.push('}');
        out
    }

    fn stream_func_declaration(&self, name: &str, args: &[String], body: &str) -> String {
        self.rule_func_declaration(name, args, body)
    }

    fn rule_func_call(&self, name: &str, args: &[String]) -> String {
        format!("$this->{name}({})", args.join(", "))
    }

    fn library_call(&self, name: &str, args: &[String]) -> String {
        format!("$this->{name}({})", args.join(", "))
    }

    fn expectation_name(&self, index: usize) -> String {
        index.to_string()
    }

    fn expectation_declaration(&self, index: usize, e: &Expectation) -> String {
        format!("{index} => {},", self.expectation_literal(e))
    }

    fn action_name(&self, index: usize) -> String {
        format!("a{index}")
    }

    fn action_declaration(&self, index: usize, args: &[String], code: &str) -> String {
        format!("private function a{index}({}) {{\n{code}\n}}", args.join(", "))
    }

    fn action_call(&self, index: usize, args: &[String]) -> String {
        format!("$this->a{index}({})", args.join(","))
    }

    fn bool_param_test(&self, name: &str, mask: u32) -> String {
        format!("/*{name}*/ ($boolParams & 0x{mask:x}) !== 0")
    }

    fn ref_param_value(&self, name: &str) -> String {
        // PHP reference parameters are native by-reference arguments
        format!("$param_{name}")
    }

    fn new_ref(&self, value: &str) -> String {
        format!("self::newRef({value})")
    }

    fn stream_emit(&self, expr: &str) -> String {
        format!("yield {expr};")
    }

    fn stream_end(&self) -> &'static str {
        "return;"
    }

    fn throw_syntax_error(&self) -> String {
        "throw $this->buildException();".to_owned()
    }

    fn trace_wrap(&self, func: &str, rule: &str, args: &[String], body: &str) -> String {
        // tracing hooks are emitted inline since PHP methods cannot be
        // decorated; the runtime consults $this->tracer
        let mut traced = format!(
            "$this->tracer->trace(\"rule.enter\", {}, $this->currPos);\n",
            self.string_literal(rule)
        );
        traced.push_str(body);
        self.rule_func_declaration(func, args, &traced)
    }

    fn cache_lookup(&self, opts: &CacheOpts) -> Vec<String> {
        let mut key_parts = vec![opts.bucket.to_string(), "$this->currPos".to_owned()];
        key_parts.extend(opts.params.iter().cloned());
        let mut out = vec![
            format!("$key = implode(\":\", [{}]);", key_parts.join(", ")),
            "$cached = $this->cache[$key] ?? null;".to_owned(),
        ];
        for name in &opts.ref_params {
            out.push(format!("$saved_{name} = $param_{name};"));
        }
        out.push("if ($cached !== null) {".to_owned());
        out.push("  $this->currPos = $cached[\"nextPos\"];".to_owned());
        for name in &opts.ref_params {
            out.push(format!(
                "  if (array_key_exists({}, $cached[\"refs\"])) {{ $param_{name} = $cached[\"refs\"][{}]; }}",
                self.string_literal(name),
                self.string_literal(name)
            ));
        }
        out.push("  return $cached[\"result\"];".to_owned());
        out.push("}".to_owned());
        out
    }

    fn cache_store(&self, opts: &CacheOpts) -> Vec<String> {
        let mut out = vec![format!(
            "$cached = [\"nextPos\" => $this->currPos, \"result\" => {}, \"refs\" => []];",
            opts.result
        )];
        for name in &opts.ref_params {
            out.push(format!(
                "if ($saved_{name} !== $param_{name}) {{ $cached[\"refs\"][{}] = $param_{name}; }}",
                self.string_literal(name)
            ));
        }
        out.push("$this->cache[$key] = $cached;".to_owned());
        out
    }

    fn assemble(&self, pieces: &SourcePieces) -> String {
        let mut out = String::new();
        out.push_str("<?php\n");
        out.push_str("// Generated parser. The base class provides the runtime helpers.\n");
        out.push_str("class Parser extends ParserBase {\n");

        let mut body = String::new();
        body.push_str("protected static $expectations = [\n");
        for decl in &pieces.consts {
            body.push_str("  ");
            body.push_str(decl);
            body.push('\n');
        }
        body.push_str("];\n\n");

        if let Some(init) = &pieces.initializer {
            body.push_str(init);
            body.push_str("\n\n");
        }
        for decl in &pieces.actions {
            body.push_str(decl);
            body.push_str("\n\n");
        }
        for func in &pieces.functions {
            body.push_str(func);
            body.push_str("\n\n");
        }

        body.push_str("public function parse($input, $options = []) {\n");
        body.push_str("  $this->initInternal($input, $options);\n");
        let mut dispatch = String::new();
        for rule in &pieces.start_rules {
            dispatch.push_str(&format!(
                "if ($startRule === {}) {{\n  $result = $this->{}({});\n}} else",
                self.string_literal(&rule.name),
                rule.func,
                rule.args.join(", ")
            ));
            dispatch.push(' ');
        }
        body.push_str(&format!(
            "  $startRule = $options[\"startRule\"] ?? {};\n",
            self.string_literal(&pieces.start_rules[0].name)
        ));
        indent2(&dispatch, &mut body);
        body.push_str("{\n    throw new \\Exception(\"Can't start parsing from rule \\\"{$startRule}\\\".\");\n  }\n");
        body.push_str(
            "  if ($result !== self::$FAILED && $this->currPos === $this->inputLength) {\n\
             \x20   return $result;\n\
             \x20 }\n\
             \x20 if ($result !== self::$FAILED && $this->currPos < $this->inputLength) {\n\
             \x20   $this->fail($this->endExpectation());\n\
             \x20 }\n",
        );
        body.push_str("  ");
        body.push_str(&self.throw_syntax_error());
        body.push_str("\n}\n");

        indent2(&body, &mut out);
        out.push_str("}\n");
        out
    }
}
