//! Unicode simple case folding, shared by the whole compiler.
//!
//! The table is an immutable process-wide resource built once on first use:
//! a forward map codepoint -> canonical fold, and a reverse map canonical
//! fold -> every codepoint folding to it. Derived from the standard
//! library's locale-independent lowercase mapping plus the short list of
//! codepoints whose simple case folding merges equivalence classes that
//! lowercasing alone does not (the long s, final sigma, the Greek symbol
//! forms, ...).

use std::collections::HashMap;
use std::sync::OnceLock;

const CHAR_MAX: u32 = 0x10FFFF;

/// Simple case foldings which are not the character's own single-character
/// lowercase mapping.
const FOLD_EXCEPTIONS: &[(u32, u32)] = &[
    (0x00B5, 0x03BC), // micro sign -> greek mu
    (0x017F, 0x0073), // latin long s -> s
    (0x0345, 0x03B9), // combining ypogegrammeni -> iota
    (0x03C2, 0x03C3), // final sigma -> sigma
    (0x03D0, 0x03B2), // beta symbol -> beta
    (0x03D1, 0x03B8), // theta symbol -> theta
    (0x03D5, 0x03C6), // phi symbol -> phi
    (0x03D6, 0x03C0), // pi symbol -> pi
    (0x03F0, 0x03BA), // kappa symbol -> kappa
    (0x03F1, 0x03C1), // rho symbol -> rho
    (0x03F5, 0x03B5), // lunate epsilon -> epsilon
    (0x1E9B, 0x1E61), // long s with dot above -> s with dot above
    (0x1FBE, 0x03B9), // prosgegrammeni -> iota
];

pub struct CaseFolding {
    forward: HashMap<u32, u32>,
    reverse: HashMap<u32, Vec<u32>>,
}

impl CaseFolding {
    /// The canonical simple case folding of a codepoint; identity when the
    /// codepoint has no fold.
    pub fn fold(&self, cp: u32) -> u32 {
        self.forward.get(&cp).copied().unwrap_or(cp)
    }

    /// Every codepoint whose fold is `mapped`, including `mapped` itself.
    /// Empty when nothing other than `mapped` folds to it.
    pub fn unfold(&self, mapped: u32) -> &[u32] {
        self.reverse.get(&mapped).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn simple_fold(c: char) -> u32 {
    let cp = c as u32;
    for &(from, to) in FOLD_EXCEPTIONS {
        if from == cp {
            return to;
        }
    }
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        // Multi-character lowerings have no simple folding.
        (Some(l), None) => l as u32,
        _ => cp,
    }
}

fn build() -> CaseFolding {
    let mut forward = HashMap::new();
    let mut reverse: HashMap<u32, Vec<u32>> = HashMap::new();
    for cp in 0..=CHAR_MAX {
        let Some(c) = char::from_u32(cp) else {
            continue;
        };
        let mapped = simple_fold(c);
        if mapped != cp {
            forward.insert(cp, mapped);
            reverse
                .entry(mapped)
                .or_insert_with(|| vec![mapped])
                .push(cp);
        }
    }
    CaseFolding { forward, reverse }
}

pub fn case_folding() -> &'static CaseFolding {
    static TABLE: OnceLock<CaseFolding> = OnceLock::new();
    TABLE.get_or_init(build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_letters_fold_to_lowercase() {
        let t = case_folding();
        assert_eq!(t.fold('K' as u32), 'k' as u32);
        assert_eq!(t.fold('k' as u32), 'k' as u32);
        assert_eq!(t.fold('0' as u32), '0' as u32);
    }

    #[test]
    fn kelvin_sign_folds_to_k() {
        let t = case_folding();
        assert_eq!(t.fold(0x212A), 'k' as u32);
        let partners = t.unfold('k' as u32);
        assert!(partners.contains(&('k' as u32)));
        assert!(partners.contains(&('K' as u32)));
        assert!(partners.contains(&0x212A));
    }

    #[test]
    fn long_s_folds_to_s() {
        let t = case_folding();
        assert_eq!(t.fold(0x017F), 's' as u32);
        assert!(t.unfold('s' as u32).contains(&0x017F));
    }

    #[test]
    fn micro_sign_groups_with_mu() {
        let t = case_folding();
        assert_eq!(t.fold(0x00B5), 0x03BC);
        let partners = t.unfold(0x03BC);
        assert!(partners.contains(&0x00B5));
        assert!(partners.contains(&0x039C)); // capital mu
    }

    #[test]
    fn unfold_of_unmapped_codepoint_is_empty() {
        let t = case_folding();
        assert!(t.unfold('0' as u32).is_empty());
    }
}
