//! Naming policy: owned-field marking, case-insensitive keys and
//! deterministic collision suffixing (`NAME`, `NAME.1`, `NAME.2`, ...).
//!
//! All functions here are pure.

/// Prefix marking a field as owned by its node.
pub const OWNED_PREFIX: &str = "+ ";
/// Name of the base-context field at index 0 of every context node.
pub const BASE_CONTEXT_NAME: &str = "base_ctx";
/// Name of the trailing unbound slot.
pub const WILDCARD_NAME: &str = "+";

/// Removes a leading `+` and any whitespace after it.
pub fn strip_owned_prefix(name: &str) -> &str {
    match name.strip_prefix('+') {
        Some(rest) => rest.trim_start(),
        None => name,
    }
}

/// Returns `name` with exactly one owned prefix.
pub fn add_owned_prefix(name: &str) -> String {
    format!("{OWNED_PREFIX}{}", strip_owned_prefix(name))
}

pub fn is_owned_name(name: &str) -> bool {
    name.starts_with(OWNED_PREFIX)
}

/// Case-insensitive identity of a name, prefix stripped.
pub fn name_key(name: &str) -> String {
    strip_owned_prefix(name).to_uppercase()
}

/// Label of the output paired with a field named `name`.
pub fn output_label(name: &str) -> String {
    name_key(name)
}

/// Removes a trailing `.N` collision suffix, if any.
pub fn strip_numeric_suffix(name: &str) -> &str {
    if let Some(dot) = name.rfind('.') {
        let digits = &name[dot + 1..];
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            return &name[..dot];
        }
    }
    name
}

/// Picks `desired` (prefix stripped) or the first `desired.N` whose key is
/// not in `existing_keys`.
pub fn next_unique_name<S: AsRef<str>>(existing_keys: &[S], desired: &str) -> String {
    let base = strip_owned_prefix(desired);
    let taken = |candidate: &str| {
        let key = candidate.to_uppercase();
        existing_keys.iter().any(|k| k.as_ref() == key)
    };
    let mut name = base.to_string();
    let mut n = 0;
    while taken(&name) {
        n += 1;
        name = format!("{base}.{n}");
    }
    name
}

/// True for names like `MODEL`, `LATENT_IMAGE` or `+ VAE`.
pub fn is_bare_uppercase(name: &str) -> bool {
    let rest = strip_owned_prefix(name);
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}

/// Display name for a field created from a source output label. Bare
/// upper-case identifiers are lower-cased so the consuming side does not
/// render them doubled up.
pub fn source_display_name(name: &str) -> String {
    if is_bare_uppercase(name) {
        name.to_lowercase()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn strip_and_add_prefix() {
        assert_eq!(strip_owned_prefix("+ seed"), "seed");
        assert_eq!(strip_owned_prefix("+seed"), "seed");
        assert_eq!(strip_owned_prefix("seed"), "seed");
        assert_eq!(add_owned_prefix("seed"), "+ seed");
        assert_eq!(add_owned_prefix("+ seed"), "+ seed");
        assert!(is_owned_name("+ seed"));
        assert!(!is_owned_name("seed"));
    }

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(name_key("+ Seed"), name_key("SEED"));
        assert_eq!(output_label("+ vae"), "VAE");
    }

    #[test]
    fn numeric_suffix() {
        assert_eq!(strip_numeric_suffix("seed.2"), "seed");
        assert_eq!(strip_numeric_suffix("seed.x"), "seed.x");
        assert_eq!(strip_numeric_suffix("seed."), "seed.");
        assert_eq!(strip_numeric_suffix("v1.10"), "v1");
    }

    #[test]
    fn unique_name_suffixes_deterministically() {
        let keys = vec!["SEED".to_string(), "SEED.1".to_string()];
        assert_eq!(next_unique_name(&keys, "seed"), "seed.2");
        assert_eq!(next_unique_name(&keys, "+ Steps"), "Steps");
        let none: Vec<String> = Vec::new();
        assert_eq!(next_unique_name(&none, "seed"), "seed");
    }

    #[test]
    fn source_names_lower_cased_when_bare_upper() {
        assert_eq!(source_display_name("MODEL"), "model");
        assert_eq!(source_display_name("LATENT_IMAGE"), "latent_image");
        assert_eq!(source_display_name("Model"), "Model");
        assert_eq!(source_display_name("CLIP2"), "CLIP2");
    }

    proptest! {
        #[test]
        fn unique_name_never_collides(
            existing in proptest::collection::vec("[a-c]{1,2}(\\.[1-3])?", 0..8),
            desired in "[a-cA-C]{1,2}",
        ) {
            let keys: Vec<String> = existing.iter().map(|n| name_key(n)).collect();
            let picked = next_unique_name(&keys, &desired);
            prop_assert!(!keys.contains(&name_key(&picked)));
            prop_assert_eq!(strip_numeric_suffix(&picked).to_uppercase(), desired.to_uppercase());
        }
    }
}
