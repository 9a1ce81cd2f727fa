//! Similarity fallback: a heuristic, text-level equivalence check between a
//! submission and the reference source.
//!
//! This is NOT a semantic comparison. It is a known-weak approximation
//! (false positives and false negatives are both expected) kept as an
//! explicit last tier for when output comparison is unavailable or
//! inconclusive. The 0.8 threshold is part of the grading contract; do not
//! tune it without re-checking existing problem expectations.

/// Positional overlap above which two canonical sources are treated as equal
pub const SIMILARITY_THRESHOLD: f64 = 0.8;

/// Canonical form used for comparison: blank lines and full-line comments
/// dropped, all whitespace removed, lowercased.
pub fn canonicalize(source: &str, comment_prefix: &str) -> String {
    source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| comment_prefix.is_empty() || !line.starts_with(comment_prefix))
        .flat_map(|line| line.chars().filter(|c| !c.is_whitespace()))
        .collect::<String>()
        .to_lowercase()
}

/// Fraction of aligned positions holding the same character, over the
/// longer length.
pub fn positional_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longer = a.len().max(b.len());
    if longer == 0 {
        return 1.0;
    }
    let matches = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    matches as f64 / longer as f64
}

/// Heuristic verdict: containment in either direction, otherwise positional
/// similarity strictly above [`SIMILARITY_THRESHOLD`].
///
/// A submission that canonicalizes to nothing (only comments and blank
/// lines) is never equivalent, since it is trivially contained in any
/// reference.
pub fn looks_equivalent(submitted: &str, reference: &str, comment_prefix: &str) -> bool {
    let submitted = canonicalize(submitted, comment_prefix);
    let reference = canonicalize(reference, comment_prefix);

    if submitted.is_empty() || reference.is_empty() {
        return false;
    }
    if submitted.contains(&reference) || reference.contains(&submitted) {
        return true;
    }
    positional_similarity(&submitted, &reference) > SIMILARITY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_strips_comments_and_whitespace() {
        let source = "# header\n\n  Total = 2 +  2\n    # inner comment\nprint( Total )\n";
        assert_eq!(canonicalize(source, "#"), "total=2+2print(total)");
    }

    #[test]
    fn test_canonicalize_keeps_trailing_comments() {
        // Only full-line comments are dropped
        assert_eq!(canonicalize("x = 1  # one", "#"), "x=1#one");
    }

    #[test]
    fn test_whitespace_and_case_differences_match() {
        assert!(looks_equivalent("PRINT(2 + 2)", "print(2+2)\n", "#"));
    }

    #[test]
    fn test_containment_either_direction() {
        let reference = "def f():\n    return 4\nprint(f())";
        let submitted = "import sys\ndef f():\n    return 4\nprint(f())\nsys.exit(0)";
        assert!(looks_equivalent(submitted, reference, "#"));
        assert!(looks_equivalent("print(f())", reference, "#"));
    }

    #[test]
    fn test_positional_threshold() {
        // 9 of 10 positions agree
        assert!((positional_similarity("abcdefghij", "abcdefghiX") - 0.9).abs() < 1e-9);
        assert!(looks_equivalent("abcdefghij", "abcdefghiX", "#"));
        // 8 of 10 is not strictly above the threshold
        assert!(!looks_equivalent("abcdefghij", "abcdefghXY", "#"));
    }

    #[test]
    fn test_length_difference_counts_against_similarity() {
        assert!((positional_similarity("abcd", "abcdefgh") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_unrelated_code_is_rejected() {
        assert!(!looks_equivalent("print('hola')", "for i in range(3):\n    print(i)", "#"));
    }

    #[test]
    fn test_comment_only_submission_is_rejected() {
        assert!(!looks_equivalent("# TODO\n\n", "print(4)", "#"));
    }

    #[test]
    fn test_csharp_comment_prefix() {
        let reference = "// suma\nConsole.WriteLine(2 + 2);";
        assert!(looks_equivalent("Console.WriteLine(2+2);", reference, "//"));
    }
}
