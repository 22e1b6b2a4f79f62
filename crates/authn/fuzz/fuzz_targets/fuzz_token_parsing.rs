//! Fuzz target for assertion parsing and header validation.
//!
//! Feeds arbitrary byte strings as compact tokens to the parser, the claim
//! decoder and the header validators. Every result must be either `Ok(...)`
//! or `Err(AuthError)`; any panic is a finding.

#![no_main]

use std::time::Duration;

use chrono::{TimeZone, Utc};
use iap_authn::{SignedToken, validate_algorithm, validate_kid};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Header values are always UTF-8 strings
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    let Ok(token) = SignedToken::parse(raw) else {
        return;
    };

    if let Some(ref alg) = token.algorithm {
        let _ = validate_algorithm(alg);
    }
    if let Some(ref kid) = token.key_id {
        let _ = validate_kid(kid);
    }

    if let Ok(claims) = token.claims() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default();
        let _ = claims.check_times(now, Duration::from_secs(30));
        let _ = claims.check_times(now, Duration::MAX);
        let _ = claims.check_issuer_and_audience(None);
        let _ = claims.check_issuer_and_audience(Some(&claims.aud));
    }
});
