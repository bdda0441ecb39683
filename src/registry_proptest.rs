//! Property-based tests for policy decoding and merging.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use std::collections::BTreeMap;

    use crate::entry::{Entry, Gpo, Strategy as MergeStrategy};
    use crate::merge::merge;
    use crate::registry::decode_policy;
    use crate::registry::testutil::{header, policy, string};
    use crate::release::resolve_releases;
    use proptest::prelude::*;

    const KEYS: [&str; 5] = ["k0", "k1", "k2", "k3", "k4"];

    // ============================================================================
    // decode_policy property tests
    // ============================================================================

    proptest! {
        /// Property: decoding arbitrary bytes never panics
        #[test]
        fn decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_policy(&data);
        }

        /// Property: anything after a valid header either decodes or is a format error
        #[test]
        fn decode_after_header_never_panics(body in prop::collection::vec(any::<u8>(), 0..256)) {
            let mut data = header();
            data.extend(body);
            let _ = decode_policy(&data);
        }

        /// Property: string records are decoded in order with their values
        #[test]
        fn decode_preserves_string_records(
            records in prop::collection::vec(("v[A-Za-z0-9]{0,7}", "[a-zA-Z0-9 ./-]{0,20}"), 0..10)
        ) {
            let data = policy(
                &records
                    .iter()
                    .map(|(k, v)| string(r"Software\Test", k, v))
                    .collect::<Vec<_>>(),
            );

            let entries = decode_policy(&data).unwrap();
            prop_assert_eq!(entries.len(), records.len());
            for (entry, (k, v)) in entries.iter().zip(&records) {
                let entry = entry.as_ref().unwrap();
                prop_assert_eq!(&entry.key, &format!("Software/Test/{}", k));
                prop_assert_eq!(&entry.value, v);
                prop_assert!(!entry.disabled);
            }
        }
    }

    // ============================================================================
    // resolve_releases property tests
    // ============================================================================

    proptest! {
        /// Property: without override, every baseline entry is kept unchanged
        #[test]
        fn baselines_are_kept_without_override(
            values in prop::collection::vec((0..KEYS.len(), "[a-z]{0,5}"), 0..20)
        ) {
            let prefix = "Software/Policies/Ubuntu/";
            let entries: Vec<Entry> = values
                .iter()
                .flat_map(|(k, v)| {
                    vec![
                        Entry::new(format!("{}dconf/{}/all", prefix, KEYS[*k]), v.clone()),
                        Entry::new(format!("{}dconf/{}/21.04", prefix, KEYS[*k]), "ignored"),
                    ]
                })
                .collect();

            let rules = resolve_releases(entries, prefix, "21.04");
            let expected: Vec<Entry> = values
                .iter()
                .map(|(k, v)| Entry::new(KEYS[*k], v.clone()))
                .collect();
            prop_assert_eq!(rules.get("dconf").cloned().unwrap_or_default(), expected);
        }
    }

    // ============================================================================
    // merge property tests
    // ============================================================================

    fn override_gpos() -> impl Strategy<Value = Vec<Vec<(usize, String, bool)>>> {
        prop::collection::vec(
            prop::collection::vec((0..KEYS.len(), "[a-z]{0,5}", any::<bool>()), 0..6),
            0..5,
        )
    }

    fn to_gpos(gpos: &[Vec<(usize, String, bool)>]) -> Vec<Gpo> {
        gpos.iter()
            .enumerate()
            .map(|(i, entries)| {
                let entries = entries
                    .iter()
                    .map(|(k, v, disabled)| {
                        let e = Entry::new(KEYS[*k], v.clone());
                        if *disabled {
                            e.disabled()
                        } else {
                            e
                        }
                    })
                    .collect();
                Gpo::new(format!("{{GPO{}}}", i), format!("gpo {}", i)).with_rules("dconf", entries)
            })
            .collect()
    }

    fn dconf(rules: &BTreeMap<String, Vec<Entry>>) -> Vec<Entry> {
        rules.get("dconf").cloned().unwrap_or_default()
    }

    proptest! {
        /// Property: merged keys are unique and sorted
        #[test]
        fn merge_keys_are_sorted_and_unique(gpos in override_gpos()) {
            let merged = dconf(&merge(&to_gpos(&gpos)));
            for pair in merged.windows(2) {
                prop_assert!(pair[0].key < pair[1].key);
            }
        }

        /// Property: with override entries, the first definition of a key wins
        #[test]
        fn merge_first_definition_wins(gpos in override_gpos()) {
            let merged = dconf(&merge(&to_gpos(&gpos)));

            let mut expected: BTreeMap<&str, Entry> = BTreeMap::new();
            for (k, v, disabled) in gpos.iter().flatten() {
                expected.entry(KEYS[*k]).or_insert_with(|| {
                    let e = Entry::new(KEYS[*k], v.clone());
                    if *disabled { e.disabled() } else { e }
                });
            }
            prop_assert_eq!(merged, expected.into_values().collect::<Vec<_>>());
        }

        /// Property: repeating the GPO list doesn't change the override result
        #[test]
        fn merge_is_idempotent_for_override(gpos in override_gpos()) {
            let once = merge(&to_gpos(&gpos));
            let mut twice = to_gpos(&gpos);
            twice.extend(to_gpos(&gpos));
            prop_assert_eq!(dconf(&merge(&twice)), dconf(&once));
        }

        /// Property: append values are concatenated highest priority first
        #[test]
        fn merge_appends_in_priority_order(values in prop::collection::vec("[a-z]{1,5}", 1..6)) {
            let gpos: Vec<Gpo> = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    Gpo::new(format!("{{GPO{}}}", i), "gpo").with_rules(
                        "scripts",
                        vec![Entry::new("startup", v.clone()).with_strategy(MergeStrategy::Append)],
                    )
                })
                .collect();

            let merged = merge(&gpos);
            prop_assert_eq!(merged["scripts"].len(), 1);
            prop_assert_eq!(&merged["scripts"][0].value, &values.join("\n"));
        }
    }
}
