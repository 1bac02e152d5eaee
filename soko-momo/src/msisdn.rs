use soko_core::payment::Environment;

/// Provider-supplied MSISDN that always approves in the sandbox.
pub const SANDBOX_TEST_MSISDN: &str = "56733123450";

/// Canonicalize a payer number into the form the Collections API expects
/// for the target environment.
///
/// In the sandbox every recognizable Rwandan number is replaced by the
/// provider's shared test MSISDN, since real numbers are rejected there.
/// In production local shapes are rewritten to `250…` without the plus.
/// Unrecognized input passes through with a leading `+` stripped, so the
/// provider gets to produce the authoritative rejection.
pub fn normalize(environment: Environment, raw: &str) -> String {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix('+').unwrap_or(trimmed);

    match environment {
        Environment::Sandbox => {
            if bare.starts_with("07") || bare.starts_with("2507") || bare.starts_with("78") {
                SANDBOX_TEST_MSISDN.to_string()
            } else {
                bare.to_string()
            }
        }
        Environment::Production => {
            if bare.starts_with("07") || bare.starts_with("78") {
                format!("250{}", bare.trim_start_matches('0'))
            } else {
                bare.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_maps_local_numbers_to_the_test_msisdn() {
        for raw in ["0781234567", "+250781234567", "2507812345", "781234567"] {
            assert_eq!(normalize(Environment::Sandbox, raw), SANDBOX_TEST_MSISDN);
        }
    }

    #[test]
    fn sandbox_passes_unrecognized_numbers_through() {
        assert_eq!(normalize(Environment::Sandbox, "12345"), "12345");
    }

    #[test]
    fn production_rewrites_local_shapes_to_e164_without_plus() {
        assert_eq!(normalize(Environment::Production, "0781234567"), "250781234567");
        assert_eq!(normalize(Environment::Production, "781234567"), "250781234567");
        assert_eq!(
            normalize(Environment::Production, "+250781234567"),
            "250781234567"
        );
        assert_eq!(
            normalize(Environment::Production, "250781234567"),
            "250781234567"
        );
    }
}
