//! JavaScript emission primitives. Generated parsers expect the runtime
//! support library (`peg$fail`, `peg$buildException`, `peg$computeLocation`,
//! `peg$Reference`, `peg$traceDecorator`, `peg$DefaultTracer`) to be linked
//! in by the surrounding wrapper.

use pegc::charset::{ClassNode, ClassPart};
use pegc::options::Language;

use crate::regalloc::{Reg, RegKind};
use crate::target::{CacheOpts, Expectation, SourcePieces, Target};

pub struct JavaScript;

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

/// Escape one codepoint for a double-quoted string literal.
fn escape_string_char(cp: u32, out: &mut String) {
    match cp {
        0x22 => out.push_str("\\\""),
        0x5C => out.push_str("\\\\"),
        0x08 => out.push_str("\\b"),
        0x09 => out.push_str("\\t"),
        0x0A => out.push_str("\\n"),
        0x0B => out.push_str("\\v"),
        0x0C => out.push_str("\\f"),
        0x0D => out.push_str("\\r"),
        0x20..=0x7E => out.push(char::from_u32(cp).unwrap()),
        _ => push_hex(cp, out),
    }
}

/// Escape one codepoint inside a regexp character class. For portability
/// all control and non-ASCII characters are escaped too.
fn escape_class_char(cp: u32, out: &mut String) {
    match cp {
        0x5C => out.push_str("\\\\"),
        0x2F => out.push_str("\\/"),
        0x5D => out.push_str("\\]"),
        0x5E => out.push_str("\\^"),
        0x2D => out.push_str("\\-"),
        0x00 => out.push_str("\\0"),
        0x09 => out.push_str("\\t"),
        0x0A => out.push_str("\\n"),
        0x0B => out.push_str("\\x0B"),
        0x0C => out.push_str("\\f"),
        0x0D => out.push_str("\\r"),
        0x20..=0x7E => out.push(char::from_u32(cp).unwrap()),
        _ => push_hex(cp, out),
    }
}

/// UTF-16-oriented escapes; astral codepoints become a surrogate pair.
fn push_hex(cp: u32, out: &mut String) {
    if cp <= 0xFF {
        out.push_str(&format!("\\x{cp:02X}"));
    } else if cp <= 0xFFFF {
        out.push_str(&format!("\\u{cp:04X}"));
    } else {
        let v = cp - 0x10000;
        let high = 0xD800 + (v >> 10);
        let low = 0xDC00 + (v & 0x3FF);
        out.push_str(&format!("\\u{high:04X}\\u{low:04X}"));
    }
}

impl JavaScript {
    fn class_regexp(&self, class: &ClassNode) -> String {
        if class.parts.is_empty() {
            // [] and [^] are not portable regexps, use equivalents
            return if class.inverted {
                "/^[\\S\\s]/".to_owned()
            } else {
                "/^(?!)/".to_owned()
            };
        }
        let mut out = String::from("/^[");
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
        out.push_str("]/");
        if class.ignore_case {
            out.push('i');
        }
        out
    }
}

impl Target for JavaScript {
    fn language(&self) -> Language {
        Language::Javascript
    }

    fn reg_name(&self, reg: Reg) -> String {
        match reg.kind {
            RegKind::Value => format!("r{}", reg.index),
            RegKind::Pos => format!("p{}", reg.index),
        }
    }

    fn rule_func_name(&self, rule: &str, discard: bool, iterable: bool) -> String {
        if iterable {
            format!("peg$stream{rule}")
        } else if discard {
            format!("peg$discard{rule}")
        } else {
            format!("peg$parse{rule}")
        }
    }

    fn silence_arg(&self) -> &'static str {
        "silence"
    }

    fn bool_params_arg(&self) -> &'static str {
        "boolParams"
    }

    fn param_arg(&self, name: &str) -> String {
        format!("param_{name}")
    }

    fn param_arg_declarator(&self, name: &str, _is_ref: bool) -> String {
        format!("param_{name}")
    }

    fn action_arg_declarator(&self, name: &str, _is_ref: bool) -> String {
        name.to_owned()
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
        // positions count UTF-16 code units
        value.encode_utf16().count()
    }

    fn expectation_literal(&self, e: &Expectation) -> String {
        let mut out = format!("{{ type: {}", self.string_literal(e.kind.name()));
        if let Some(value) = &e.value {
            out.push_str(&format!(", value: {}", self.string_literal(value)));
        }
        out.push_str(&format!(
            ", description: {} }}",
            self.string_literal(&e.description)
        ));
        out
    }

    fn failed(&self) -> &'static str {
        "peg$FAILED"
    }

    fn curr_pos(&self) -> &'static str {
        "peg$currPos"
    }

    fn saved_pos(&self) -> &'static str {
        "peg$savedPos"
    }

    fn input_length(&self) -> &'static str {
        "input.length"
    }

    fn null_value(&self) -> &'static str {
        "null"
    }

    fn assertion_success(&self) -> &'static str {
        "void 0"
    }

    fn is_failed(&self, expr: &str) -> String {
        format!("{expr} === peg$FAILED")
    }

    fn not_failed(&self, expr: &str) -> String {
        format!("{expr} !== peg$FAILED")
    }

    fn to_bool(&self, expr: &str) -> String {
        format!("!!({expr})")
    }

    fn char_at_current(&self) -> String {
        "input.charAt(peg$currPos)".to_owned()
    }

    fn consume_char(&self) -> String {
        "input.charAt(peg$currPos++)".to_owned()
    }

    fn advance(&self) -> String {
        "peg$currPos++;".to_owned()
    }

    fn advance_by(&self, n: usize) -> String {
        format!("peg$currPos += {n};")
    }

    fn current_substring(&self, len: usize) -> String {
        format!("input.substr(peg$currPos, {len})")
    }

    fn substring(&self, start: &str, end: &str) -> String {
        format!("input.substring({start}, {end})")
    }

    fn single_char_condition(&self, c: char) -> String {
        let unit = c.encode_utf16(&mut [0u16; 2])[0];
        format!("input.charCodeAt(peg$currPos) === {unit}")
    }

    fn to_lower(&self, expr: &str) -> String {
        format!("{expr}.toLowerCase()")
    }

    fn class_test(&self, class: &ClassNode, subject: &str) -> String {
        format!("{}.test({subject})", self.class_regexp(class))
    }

    fn block_start(&self, label: &str) -> String {
        format!("{label}: {{")
    }

    fn block_end(&self, label: &str) -> String {
        format!("}} // {label}")
    }

    fn goto_block_end(&self, label: &str) -> String {
        format!("break {label};")
    }

    fn var_declaration(&self, names: &[String]) -> Option<String> {
        if names.is_empty() {
            None
        } else {
            Some(format!("var {};", names.join(",")))
        }
    }

    fn empty_array(&self) -> &'static str {
        "[]"
    }

    fn array_literal(&self, parts: &[String]) -> String {
        format!("[{}]", parts.join(","))
    }

    fn push(&self, array: &str, value: &str) -> String {
        format!("{array}.push({value});")
    }

    fn rule_func_declaration(&self, name: &str, args: &[String], body: &str) -> String {
        let mut out = format!("function {name}({}) {{\n", args.join(", "));
        indent2(body, &mut out);
        out.push('}');
        out
    }

    fn stream_func_declaration(&self, name: &str, args: &[String], body: &str) -> String {
        let mut out = format!("function* {name}({}) {{\n", args.join(", "));
        indent2(body, &mut out);
        out.push('}');
        out
    }

    fn rule_func_call(&self, name: &str, args: &[String]) -> String {
        format!("{name}({})", args.join(", "))
    }

    fn library_call(&self, name: &str, args: &[String]) -> String {
        format!("peg${name}({})", args.join(", "))
    }

    fn expectation_name(&self, index: usize) -> String {
        format!("peg$c{index}")
    }

    fn expectation_declaration(&self, index: usize, e: &Expectation) -> String {
        format!("var peg$c{index} = {};", self.expectation_literal(e))
    }

    fn action_name(&self, index: usize) -> String {
        format!("peg$a{index}")
    }

    fn action_declaration(&self, index: usize, args: &[String], code: &str) -> String {
        format!("function peg$a{index}({}) {{\n{code}\n}}", args.join(", "))
    }

    fn action_call(&self, index: usize, args: &[String]) -> String {
        format!("peg$a{index}({})", args.join(","))
    }

    fn bool_param_test(&self, name: &str, mask: u32) -> String {
        format!("/*{name}*/ (boolParams & 0x{mask:x}) !== 0")
    }

    fn ref_param_value(&self, name: &str) -> String {
        format!("param_{name}.value")
    }

    fn new_ref(&self, value: &str) -> String {
        format!("new peg$Reference({value})")
    }

    fn stream_emit(&self, expr: &str) -> String {
        format!("yield {expr};")
    }

    fn stream_end(&self) -> &'static str {
        "return;"
    }

    fn throw_syntax_error(&self) -> String {
        [
            "throw peg$buildException(",
            "  null,",
            "  peg$maxFailExpected,",
            "  peg$maxFailPos < input.length ? input.charAt(peg$maxFailPos) : null,",
            "  peg$maxFailPos < input.length",
            "    ? peg$computeLocation(peg$maxFailPos, peg$maxFailPos + 1)",
            "    : peg$computeLocation(peg$maxFailPos, peg$maxFailPos)",
            ");",
        ]
        .join("\n")
    }

    fn trace_wrap(&self, func: &str, rule: &str, args: &[String], body: &str) -> String {
        let mut closure = format!("function({}) {{\n", args.join(", "));
        indent2(body, &mut closure);
        closure.push('}');
        let arg_names: Vec<String> = args.iter().map(|a| self.string_literal(a)).collect();
        format!(
            "var {func} = peg$traceDecorator({closure}, {}, [{}]);",
            self.string_literal(rule),
            arg_names.join(", ")
        )
    }

    fn cache_lookup(&self, opts: &CacheOpts) -> Vec<String> {
        let mut key_parts = vec![opts.bucket.to_string(), "peg$currPos".to_owned()];
        key_parts.extend(opts.params.iter().cloned());
        let mut out = vec![
            format!("var key = [{}].join(\":\");", key_parts.join(", ")),
            "var cached = peg$resultsCache[key];".to_owned(),
        ];
        for name in &opts.ref_params {
            out.push(format!("var saved_{name} = param_{name}.value;"));
        }
        out.push("if (cached) {".to_owned());
        out.push("  peg$currPos = cached.nextPos;".to_owned());
        for name in &opts.ref_params {
            out.push(format!(
                "  if (cached.refs.{name} !== undefined) {{ param_{name}.value = cached.refs.{name}; }}"
            ));
        }
        out.push("  return cached.result;".to_owned());
        out.push("}".to_owned());
        out
    }

    fn cache_store(&self, opts: &CacheOpts) -> Vec<String> {
        let mut out = vec![format!(
            "cached = {{ nextPos: peg$currPos, result: {}, refs: {{}} }};",
            opts.result
        )];
        for name in &opts.ref_params {
            out.push(format!(
                "if (saved_{name} !== param_{name}.value) {{ cached.refs.{name} = param_{name}.value; }}"
            ));
        }
        out.push("peg$resultsCache[key] = cached;".to_owned());
        out
    }

    fn assemble(&self, pieces: &SourcePieces) -> String {
        let mut body = String::new();
        body.push_str("var options = arguments.length > 1 ? arguments[1] : {};\n");
        body.push_str("var peg$currPos = 0;\n");
        body.push_str("var peg$savedPos = 0;\n");
        body.push_str("var peg$FAILED = {};\n");
        body.push_str("var peg$maxFailPos = 0;\n");
        body.push_str("var peg$maxFailExpected = [];\n");
        if pieces.cache {
            body.push_str("var peg$resultsCache = {};\n");
        }
        if pieces.trace {
            body.push_str(
                "var peg$tracer = \"tracer\" in options ? options.tracer : new peg$DefaultTracer();\n",
            );
        }
        body.push('\n');

        body.push_str("// expectations\n");
        for decl in &pieces.consts {
            body.push_str(decl);
            body.push('\n');
        }
        if !pieces.actions.is_empty() {
            body.push_str("\n// actions\n");
            for decl in &pieces.actions {
                body.push_str(decl);
                body.push('\n');
            }
        }
        body.push_str("\n// generated rule functions\n");
        for func in &pieces.functions {
            body.push_str(func);
            body.push_str("\n\n");
        }

        let starts: Vec<String> = pieces
            .start_rules
            .iter()
            .map(|rule| {
                format!(
                    "{}: function() {{ return {}({}); }}",
                    rule.name,
                    rule.func,
                    rule.args.join(", ")
                )
            })
            .collect();
        body.push_str(&format!(
            "var peg$startRuleFunctions = {{ {} }};\n",
            starts.join(",\n    ")
        ));
        body.push_str(&format!(
            "var peg$startRuleFunction = peg$startRuleFunctions.{};\n",
            pieces.start_rules[0].name
        ));

        if !pieces.stream_rules.is_empty() {
            let streams: Vec<String> = pieces
                .stream_rules
                .iter()
                .map(|rule| {
                    format!(
                        "{}: function() {{ return {}({}); }}",
                        rule.name,
                        rule.func,
                        rule.args.join(", ")
                    )
                })
                .collect();
            body.push_str(&format!(
                "var peg$streamRuleFunctions = {{ {} }};\n",
                streams.join(",\n    ")
            ));
            body.push_str(&format!(
                "var peg$streamRuleFunction = peg$streamRuleFunctions.{};\n",
                pieces.stream_rules[0].name
            ));
            body.push_str(
                "if (options.stream) {\n\
                 \x20 if (\"startRule\" in options) {\n\
                 \x20   if (!(options.startRule in peg$streamRuleFunctions)) {\n\
                 \x20     throw new Error(\"Can't stream rule \\\"\" + options.startRule + \"\\\".\");\n\
                 \x20   }\n\
                 \x20   peg$streamRuleFunction = peg$streamRuleFunctions[options.startRule];\n\
                 \x20 }\n\
                 } else if (\"startRule\" in options) {\n",
            );
        } else {
            body.push_str("if (\"startRule\" in options) {\n");
        }
        body.push_str(
            "  if (!(options.startRule in peg$startRuleFunctions)) {\n\
             \x20   throw new Error(\"Can't start parsing from rule \\\"\" + options.startRule + \"\\\".\");\n\
             \x20 }\n\
             \x20 peg$startRuleFunction = peg$startRuleFunctions[options.startRule];\n\
             }\n",
        );

        if let Some(init) = &pieces.initializer {
            body.push('\n');
            body.push_str(init);
            body.push('\n');
        }

        body.push_str("\npeg$currPos = 0;\n");
        if !pieces.stream_rules.is_empty() {
            body.push_str("if (options.stream) {\n  return peg$streamRuleFunction();\n}\n");
        }
        body.push_str("var peg$result = peg$startRuleFunction();\n\n");
        body.push_str(
            "if (peg$result !== peg$FAILED && peg$currPos === input.length) {\n\
             \x20 return peg$result;\n\
             }\n\
             if (peg$result !== peg$FAILED && peg$currPos < input.length) {\n\
             \x20 peg$fail({ type: \"end\", description: \"end of input\" });\n\
             }\n",
        );
        body.push_str(&self.throw_syntax_error());
        body.push('\n');

        let mut out = String::new();
        out.push_str("// Generated parser. Runtime helpers are provided by the wrapper.\n");
        out.push_str("function peg$parse(input) {\n");
        indent2(&body, &mut out);
        out.push_str("}\n");
        out.push_str("exports.parse = peg$parse;\n");
        out
    }
}
