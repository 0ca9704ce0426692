//! Character set algebra over sorted lists of codepoint ranges.
//!
//! Classes are `{parts, inverted, ignore_case}`; `inverted` means complement
//! within the closed codepoint interval [0, 0x10FFFF]. Parts are raw
//! codepoints rather than `char` because complements routinely produce
//! ranges straddling the surrogate gap.

use crate::unicode;

pub const CHAR_MIN: u32 = 0;
pub const CHAR_MAX: u32 = 0x10FFFF;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClassPart {
    Single(u32),
    Range(u32, u32),
}

impl ClassPart {
    pub fn char(c: char) -> ClassPart {
        ClassPart::Single(c as u32)
    }
    pub fn range(start: char, end: char) -> ClassPart {
        ClassPart::Range(start as u32, end as u32)
    }
    pub fn start(self) -> u32 {
        match self {
            ClassPart::Single(cp) => cp,
            ClassPart::Range(start, _) => start,
        }
    }
    pub fn end(self) -> u32 {
        match self {
            ClassPart::Single(cp) => cp,
            ClassPart::Range(_, end) => end,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct ClassNode {
    pub parts: Vec<ClassPart>,
    pub inverted: bool,
    pub ignore_case: bool,
    /// When set, parts are in ascending codepoint order with overlapping
    /// and adjacent ranges merged. Every public operation returns a sorted
    /// class.
    pub sorted: bool,
}

impl ClassNode {
    pub fn new(parts: Vec<ClassPart>, inverted: bool, ignore_case: bool) -> ClassNode {
        ClassNode {
            parts,
            inverted,
            ignore_case,
            sorted: false,
        }
    }

    /// The `.` class, matching any single character.
    pub fn any() -> ClassNode {
        ClassNode {
            parts: vec![],
            inverted: true,
            ignore_case: false,
            sorted: true,
        }
    }

    pub fn is_any(&self) -> bool {
        self.parts.is_empty() && self.inverted
    }

    /// The empty class, matching no character at all.
    pub fn empty() -> ClassNode {
        ClassNode {
            parts: vec![],
            inverted: false,
            ignore_case: false,
            sorted: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty() && !self.inverted
    }

    pub fn single(c: char) -> ClassNode {
        ClassNode {
            parts: vec![ClassPart::char(c)],
            inverted: false,
            ignore_case: false,
            sorted: true,
        }
    }

    /// Membership test against the *uninverted* part list.
    fn parts_contain(&self, cp: u32) -> bool {
        self.parts
            .iter()
            .any(|part| part.start() <= cp && cp <= part.end())
    }

    /// Does this class match the given codepoint? Assumes a case-sensitive
    /// class; expand with [`ClassOps::case_sensitive`] first.
    pub fn contains(&self, cp: u32) -> bool {
        self.parts_contain(cp) != self.inverted
    }
}

// Operations on inclusive (start, end) codepoint ranges.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct CodeRange {
    start: u32,
    end: u32,
}

fn part_to_range(part: ClassPart) -> CodeRange {
    CodeRange {
        start: part.start(),
        end: part.end(),
    }
}

fn range_to_part(range: CodeRange) -> ClassPart {
    if range.start == range.end {
        ClassPart::Single(range.start)
    } else {
        ClassPart::Range(range.start, range.end)
    }
}

/// Complement of a sorted range list within [CHAR_MIN, CHAR_MAX].
fn invert_ranges(ranges: &[CodeRange]) -> Vec<CodeRange> {
    let mut start = CHAR_MIN;
    let mut result = Vec::new();
    for range in ranges {
        if range.start > start {
            result.push(CodeRange {
                start,
                end: range.start - 1,
            });
        }
        start = match range.end.checked_add(1) {
            Some(next) => next,
            None => return result,
        };
    }
    if start <= CHAR_MAX {
        result.push(CodeRange {
            start,
            end: CHAR_MAX,
        });
    }
    result
}

/// Union-merge two sorted range lists, coalescing overlapping and adjacent
/// ranges.
fn merge_ranges(left: &[CodeRange], right: &[CodeRange]) -> Vec<CodeRange> {
    let mut left_idx = 0;
    let mut right_idx = 0;
    let mut merged = Vec::new();
    while left_idx < left.len() || right_idx < right.len() {
        let mut range = if left_idx >= left.len()
            || (right_idx < right.len() && right[right_idx].start < left[left_idx].start)
        {
            let r = right[right_idx];
            right_idx += 1;
            r
        } else {
            let r = left[left_idx];
            left_idx += 1;
            r
        };
        loop {
            // end + 1 also swallows adjacent ranges
            if left_idx < left.len() && left[left_idx].start <= range.end.saturating_add(1) {
                range.end = range.end.max(left[left_idx].end);
                left_idx += 1;
            } else if right_idx < right.len()
                && right[right_idx].start <= range.end.saturating_add(1)
            {
                range.end = range.end.max(right[right_idx].end);
                right_idx += 1;
            } else {
                break;
            }
        }
        merged.push(range);
    }
    merged
}

/// The main union/intersection primitive: merge two sorted part lists,
/// optionally complementing either input and/or the output. All the public
/// set operations are de Morgan compositions of this.
fn merge_parts(
    left: &[ClassPart],
    left_invert: bool,
    right: &[ClassPart],
    right_invert: bool,
    invert_result: bool,
) -> Vec<ClassPart> {
    let mut left: Vec<CodeRange> = left.iter().copied().map(part_to_range).collect();
    let mut right: Vec<CodeRange> = right.iter().copied().map(part_to_range).collect();
    if left_invert {
        left = invert_ranges(&left);
    }
    if right_invert {
        right = invert_ranges(&right);
    }
    let mut merged = merge_ranges(&left, &right);
    if invert_result {
        merged = invert_ranges(&merged);
    }
    merged.into_iter().map(range_to_part).collect()
}

/// Class-level set operations. Holds the one knob that changes their
/// behaviour: whether case expansion suppresses ASCII/non-ASCII folding
/// pairs (some runtimes' native case-insensitive matching does, and the
/// generated code must agree with them).
#[derive(Clone, Copy, Default)]
pub struct ClassOps {
    pub caseless_restrict: bool,
}

impl ClassOps {
    pub fn new(caseless_restrict: bool) -> ClassOps {
        ClassOps { caseless_restrict }
    }

    /// Canonicalize to non-overlapping ascending ranges. A no-op when the
    /// class is already sorted.
    pub fn sort(&self, class: ClassNode) -> ClassNode {
        if class.sorted {
            return class;
        }
        let mut parts = class.parts;
        parts.sort_by_key(|part| part.start());
        let parts = merge_parts(&parts, false, &[], false, false);
        ClassNode {
            parts,
            inverted: class.inverted,
            ignore_case: class.ignore_case,
            sorted: true,
        }
    }

    /// Expand an ignore-case class into an explicit case-sensitive one: for
    /// every codepoint, include everything which simple-case-folds to the
    /// same canonical codepoint.
    pub fn case_sensitive(&self, class: ClassNode) -> ClassNode {
        if !class.ignore_case {
            return class;
        }
        let folding = unicode::case_folding();
        let mut new_parts = Vec::new();
        for part in &class.parts {
            let (start, end) = (part.start(), part.end());
            for cp in start..=end {
                let mapped = folding.fold(cp);
                let singleton = [mapped];
                let partners = match folding.unfold(mapped) {
                    [] => &singleton[..],
                    partners => partners,
                };
                for &expanded in partners {
                    if self.caseless_restrict && cp <= 0x7F && expanded > 0x7F {
                        // suppress non-ASCII matches when the original
                        // codepoint was ASCII
                        continue;
                    }
                    new_parts.push(ClassPart::Single(expanded));
                }
            }
        }
        self.sort(ClassNode::new(new_parts, class.inverted, false))
    }

    fn normalize(&self, class: ClassNode) -> ClassNode {
        self.case_sensitive(self.sort(class))
    }

    pub fn union(&self, left: &ClassNode, right: &ClassNode) -> ClassNode {
        if left.is_any() || right.is_empty() {
            return left.clone();
        }
        if right.is_any() || left.is_empty() {
            return right.clone();
        }
        let left = self.normalize(left.clone());
        let right = self.normalize(right.clone());
        if !left.inverted && right.inverted {
            return self.union(&right, &left);
        }
        // Either both are inverted, or right is not inverted.
        let inverted = left.inverted;
        let parts = merge_parts(
            &left.parts,
            left.inverted,
            &right.parts,
            right.inverted,
            inverted,
        );
        ClassNode {
            parts,
            inverted,
            ignore_case: false,
            sorted: true,
        }
    }

    pub fn intersection(&self, left: &ClassNode, right: &ClassNode) -> ClassNode {
        if right.is_any() || left.is_empty() {
            return left.clone();
        }
        if left.is_any() || right.is_empty() {
            return right.clone();
        }
        let left = self.normalize(left.clone());
        let right = self.normalize(right.clone());
        if !left.inverted && right.inverted {
            return self.intersection(&right, &left);
        }
        let inverted = right.inverted;
        let parts = merge_parts(
            &left.parts,
            !left.inverted,
            &right.parts,
            !right.inverted,
            !inverted,
        );
        ClassNode {
            parts,
            inverted,
            ignore_case: false,
            sorted: true,
        }
    }

    /// `left` but not `right`.
    pub fn subtract(&self, left: &ClassNode, right: &ClassNode) -> ClassNode {
        let complement = ClassNode {
            parts: right.parts.clone(),
            inverted: !right.inverted,
            ignore_case: right.ignore_case,
            sorted: right.sorted,
        };
        self.intersection(left, &complement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops() -> ClassOps {
        ClassOps::new(false)
    }

    fn class(parts: &[(u32, u32)], inverted: bool) -> ClassNode {
        ClassNode::new(
            parts
                .iter()
                .map(|&(a, b)| {
                    if a == b {
                        ClassPart::Single(a)
                    } else {
                        ClassPart::Range(a, b)
                    }
                })
                .collect(),
            inverted,
            false,
        )
    }

    fn assert_matches(node: &ClassNode, samples: &[(u32, bool)]) {
        for &(cp, expected) in samples {
            assert_eq!(node.contains(cp), expected, "codepoint {cp:#x}");
        }
    }

    #[test]
    fn sort_merges_overlaps() {
        let sorted = ops().sort(class(&[(0x30, 0x39), (0x20, 0x35), (0x3A, 0x3A)], false));
        assert!(sorted.sorted);
        assert_eq!(sorted.parts, vec![ClassPart::Range(0x20, 0x3A)]);
    }

    #[test]
    fn union_is_pointwise_or() {
        let a = class(&[(b'a' as u32, b'f' as u32)], false);
        let b = class(&[(b'0' as u32, b'9' as u32)], false);
        let u = ops().union(&a, &b);
        assert_matches(
            &u,
            &[
                (b'a' as u32, true),
                (b'5' as u32, true),
                (b'z' as u32, false),
                (CHAR_MIN, false),
                (CHAR_MAX, false),
            ],
        );
    }

    #[test]
    fn union_with_inverted_operand() {
        let not_a = class(&[(b'a' as u32, b'a' as u32)], true);
        let a_b = class(&[(b'a' as u32, b'b' as u32)], false);
        let u = ops().union(&not_a, &a_b);
        // ¬{a} ∪ {a,b} is everything
        assert_matches(&u, &[(b'a' as u32, true), (CHAR_MIN, true), (CHAR_MAX, true)]);
    }

    #[test]
    fn intersection_is_pointwise_and() {
        let a = class(&[(b'a' as u32, b'm' as u32)], false);
        let b = class(&[(b'g' as u32, b'z' as u32)], false);
        let i = ops().intersection(&a, &b);
        assert_eq!(i.parts, vec![ClassPart::Range(b'g' as u32, b'm' as u32)]);
        assert!(!i.inverted);
    }

    #[test]
    fn de_morgan() {
        // ¬(A ∪ B) == ¬A ∩ ¬B, checked pointwise on a sample grid
        let ops = ops();
        let a = class(&[(0x41, 0x5A)], false);
        let b = class(&[(0x4D, 0x80)], false);
        let lhs = ops.union(&a, &b);
        let not_a = class(&[(0x41, 0x5A)], true);
        let not_b = class(&[(0x4D, 0x80)], true);
        let rhs = ops.intersection(&not_a, &not_b);
        for cp in [0x0, 0x40, 0x41, 0x4D, 0x5A, 0x5B, 0x80, 0x81, CHAR_MAX] {
            assert_eq!(lhs.contains(cp), !rhs.contains(cp), "codepoint {cp:#x}");
        }
    }

    #[test]
    fn union_commutes_up_to_canonical_form() {
        let ops = ops();
        let a = class(&[(0x30, 0x39), (0x61, 0x66)], false);
        let b = class(&[(0x35, 0x62)], false);
        assert_eq!(ops.union(&a, &b), ops.union(&b, &a));
        assert_eq!(ops.intersection(&a, &b), ops.intersection(&b, &a));
    }

    #[test]
    fn any_and_empty_short_circuit() {
        let ops = ops();
        let a = class(&[(0x41, 0x5A)], false);
        assert!(ops.union(&a, &ClassNode::any()).is_any());
        assert_eq!(ops.union(&a, &ClassNode::empty()), a);
        assert!(ops.intersection(&a, &ClassNode::empty()).is_empty());
        assert_eq!(ops.intersection(&a, &ClassNode::any()), a);
    }

    #[test]
    fn boundary_codepoints_invert() {
        let everything = class(&[(CHAR_MIN, CHAR_MAX)], false);
        let nothing = ops().subtract(&ClassNode::any(), &everything);
        assert_matches(&nothing, &[(CHAR_MIN, false), (CHAR_MAX, false)]);
    }

    #[test]
    fn subtract_removes_right() {
        let letters = class(&[(b'a' as u32, b'z' as u32)], false);
        let vowel = class(&[(b'o' as u32, b'o' as u32)], false);
        let s = ops().subtract(&letters, &vowel);
        assert_matches(
            &s,
            &[
                (b'a' as u32, true),
                (b'o' as u32, false),
                (b'z' as u32, true),
            ],
        );
    }

    #[test]
    fn case_expansion_includes_folding_partners() {
        let k = ClassNode {
            ignore_case: true,
            ..ClassNode::single('k')
        };
        let expanded = ops().case_sensitive(k);
        // k, K and the Kelvin sign all simple-case-fold to 'k'
        assert_matches(
            &expanded,
            &[
                ('k' as u32, true),
                ('K' as u32, true),
                (0x212A, true),
                ('j' as u32, false),
            ],
        );
    }

    #[test]
    fn caseless_restrict_suppresses_cross_ascii_pairs() {
        let restricted = ClassOps::new(true);
        let k = ClassNode {
            ignore_case: true,
            ..ClassNode::single('k')
        };
        let expanded = restricted.case_sensitive(k);
        assert_matches(
            &expanded,
            &[('k' as u32, true), ('K' as u32, true), (0x212A, false)],
        );

        let s = ClassNode {
            ignore_case: true,
            ..ClassNode::single('s')
        };
        let expanded = restricted.case_sensitive(s);
        assert_matches(
            &expanded,
            &[('s' as u32, true), ('S' as u32, true), (0x17F, false)],
        );
    }
}
