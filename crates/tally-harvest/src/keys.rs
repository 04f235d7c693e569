//! Entity key enumeration
//!
//! Keys are a pure function of a [`KeySpec`]: the numeric range first, then every
//! letter/digit suffix pair, then explicit extras. Skip entries and repeats are
//! removed, so the sequence is duplicate-free and deterministic.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tally_common::{Result, TallyError};

use crate::types::EntityKey;

/// Inclusive numeric suffix range, zero-padded to `width`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericRange {
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    pub width: usize,
}

/// Key enumeration config
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    /// Shared prefix of every generated key
    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub numeric: Option<NumericRange>,

    /// Letter alphabet for `letter + digit` suffixes
    #[serde(default)]
    pub letters: String,

    /// Digit alphabet for `letter + digit` suffixes
    #[serde(default)]
    pub digits: String,

    /// Keys appended verbatim after the generated ones
    #[serde(default)]
    pub extra: Vec<String>,

    /// Full keys or bare suffixes to leave out
    #[serde(default)]
    pub skip: Vec<String>,
}

impl KeySpec {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref range) = self.numeric {
            if range.start > range.end {
                return Err(TallyError::invalid_key_spec(format!(
                    "numeric range start ({}) is greater than end ({})",
                    range.start, range.end
                )));
            }
        }

        if self.letters.is_empty() != self.digits.is_empty() {
            return Err(TallyError::invalid_key_spec(
                "letters and digits must be given together",
            ));
        }

        if self.numeric.is_none() && self.letters.is_empty() && self.extra.is_empty() {
            return Err(TallyError::invalid_key_spec("spec produces no keys"));
        }

        Ok(())
    }

    fn is_skipped(&self, suffix: &str, key: &str) -> bool {
        self.skip.iter().any(|s| s == suffix || s == key)
    }
}

/// Enumerate the run's keys in order
pub fn generate(spec: &KeySpec) -> Vec<EntityKey> {
    let mut suffixes: Vec<String> = Vec::new();

    if let Some(ref range) = spec.numeric {
        suffixes.extend((range.start..=range.end).map(|n| format!("{:0width$}", n, width = range.width)));
    }

    for letter in spec.letters.chars() {
        for digit in spec.digits.chars() {
            suffixes.push(format!("{}{}", letter, digit));
        }
    }

    let generated = suffixes.into_iter().map(|suffix| {
        let key = format!("{}{}", spec.prefix, suffix);
        (suffix, key)
    });

    // Extras are full keys; their "suffix" is whatever follows the prefix, if anything.
    let extras = spec.extra.iter().map(|key| {
        let suffix = key.strip_prefix(spec.prefix.as_str()).unwrap_or(key).to_string();
        (suffix, key.clone())
    });

    let mut seen = HashSet::new();
    generated
        .chain(extras)
        .filter(|(suffix, key)| !spec.is_skipped(suffix, key))
        .filter(|(_, key)| seen.insert(key.clone()))
        .map(|(_, key)| EntityKey::new(key))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roster_spec() -> KeySpec {
        KeySpec {
            prefix: "237Z1A05".to_string(),
            numeric: Some(NumericRange {
                start: 72,
                end: 99,
                width: 2,
            }),
            letters: "ABCD".to_string(),
            digits: "123456789".to_string(),
            extra: vec![],
            skip: vec!["80".to_string(), "88".to_string()],
        }
    }

    #[test]
    fn test_roster_enumeration() {
        let keys = generate(&roster_spec());

        assert_eq!(keys.len(), 26 + 36);
        assert_eq!(keys.first().unwrap().as_str(), "237Z1A0572");
        assert_eq!(keys[26].as_str(), "237Z1A05A1");
        assert_eq!(keys.last().unwrap().as_str(), "237Z1A05D9");
        assert!(!keys.iter().any(|k| k.as_str() == "237Z1A0580"));
        assert!(!keys.iter().any(|k| k.as_str() == "237Z1A0588"));
    }

    #[test]
    fn test_zero_padding() {
        let spec = KeySpec {
            prefix: "R".to_string(),
            numeric: Some(NumericRange {
                start: 1,
                end: 3,
                width: 3,
            }),
            ..Default::default()
        };
        let keys: Vec<String> = generate(&spec).iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["R001", "R002", "R003"]);
    }

    #[test]
    fn test_extras_deduplicated_and_skippable() {
        let mut spec = roster_spec();
        spec.extra = vec![
            "237Z1A0572".to_string(),
            "237Z1A05E1".to_string(),
            "237Z1A0588".to_string(),
        ];
        let keys = generate(&spec);

        assert_eq!(keys.iter().filter(|k| k.as_str() == "237Z1A0572").count(), 1);
        assert_eq!(keys.last().unwrap().as_str(), "237Z1A05E1");
        assert!(!keys.iter().any(|k| k.as_str() == "237Z1A0588"));
    }

    #[test]
    fn test_skip_by_full_key() {
        let mut spec = roster_spec();
        spec.skip = vec!["237Z1A05B3".to_string()];
        let keys = generate(&spec);
        assert_eq!(keys.len(), 28 + 35);
        assert!(!keys.iter().any(|k| k.as_str() == "237Z1A05B3"));
    }

    #[test]
    fn test_validate() {
        assert!(roster_spec().validate().is_ok());

        let mut spec = roster_spec();
        spec.digits.clear();
        assert!(spec.validate().is_err());

        let spec = KeySpec {
            numeric: Some(NumericRange {
                start: 9,
                end: 1,
                width: 0,
            }),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
        assert!(KeySpec::default().validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_keys_unique_and_skips_excluded(
            start in 0u32..50,
            len in 0u32..60,
            skips in proptest::collection::vec(0u32..120, 0..10),
            extra in proptest::collection::vec(0u32..120, 0..10),
        ) {
            let spec = KeySpec {
                prefix: "K".to_string(),
                numeric: Some(NumericRange { start, end: start + len, width: 3 }),
                letters: "XY".to_string(),
                digits: "01".to_string(),
                extra: extra.iter().map(|n| format!("K{:03}", n)).collect(),
                skip: skips.iter().map(|n| format!("{:03}", n)).collect(),
            };
            let keys = generate(&spec);

            let unique: HashSet<_> = keys.iter().collect();
            prop_assert_eq!(unique.len(), keys.len());

            for skip in &skips {
                let skipped = format!("K{:03}", skip);
                prop_assert!(!keys.iter().any(|k| k.as_str() == skipped));
            }

            // Deterministic
            prop_assert_eq!(keys, generate(&spec));
        }
    }
}
