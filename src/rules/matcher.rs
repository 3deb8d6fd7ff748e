//! Call-site matching against rule signatures.

use super::{is_wildcard, MethodSignature};

/// Does a concrete call site match a rule pattern?
///
/// The method name always compares exactly; wildcards never apply to it.
/// Owner comparison is *containment*: the seen internal name matching when it
/// merely contains the pattern's slash-form class. One rule then covers inner
/// and synthetic variants (`a/B`, `a/B$1`, `a/B$Companion`), but an unrelated
/// class whose internal name happens to contain the pattern will match. Callers
/// should write owner patterns as fully qualified as possible.
pub fn matches_call_site(
    pattern: &MethodSignature,
    owner: &str,
    name: &str,
    descriptor: &str,
) -> bool {
    if pattern.method_name != name {
        return false;
    }
    let ignore_owner = is_wildcard(&pattern.class_internal);
    let ignore_descriptor = is_wildcard(&pattern.descriptor);
    match (ignore_owner, ignore_descriptor) {
        (true, true) => true,
        (false, true) => owner_contains(owner, &pattern.class_internal),
        (true, false) => pattern.descriptor == descriptor,
        (false, false) => {
            pattern.descriptor == descriptor && owner_contains(owner, &pattern.class_internal)
        }
    }
}

fn owner_contains(seen: &str, pattern: &str) -> bool {
    seen == pattern || seen.contains(pattern)
}
