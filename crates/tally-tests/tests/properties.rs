//! Property tests: era conversion, value arithmetic, mangled partition and
//! discovery convergence.

use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use num_bigint::BigInt;
use proptest::prelude::*;
use tally_core::address::{Address, ChainNetwork, Credential};
use tally_core::era::{EraConfig, EraTimeline, RelativeSlot};
use tally_core::multi_token::{DefaultToken, MultiToken, NetworkId, TokenEntry, TokenId};
use tally_core::types::{Chain, Hash28};
use tally_tests::helpers::*;
use tally_wallet::balance::classify_mangled;
use tally_wallet::capability::{DerivationScheme, HasUtxoChains};
use tally_wallet::model::{AddressBuilder, DeriverId};
use tally_wallet::scanner::{AddressUsage, GapLimitScanner};
use tally_wallet::store::UtxoRow;

// --- era conversion ---

fn timeline_strategy() -> impl Strategy<Value = EraTimeline> {
    let forks = prop::collection::vec((1u64..300, 1u64..500_000, 1u64..30), 0..4);
    (1u64..50_000, 1u64..30, forks).prop_map(|(spe, dur, forks)| {
        let genesis = Utc.timestamp_opt(1_500_000_000, 0).single().unwrap();
        let mut records = vec![EraConfig::genesis(spe, dur, genesis)];
        let mut start = 0;
        for (gap, spe, dur) in forks {
            start += gap;
            records.push(EraConfig::fork(start, spe, dur));
        }
        EraTimeline::new(&records).unwrap()
    })
}

proptest! {
    #[test]
    fn absolute_relative_roundtrip(timeline in timeline_strategy(), slot in 0u64..2_000_000_000) {
        let relative = timeline.to_relative_slot(slot).unwrap();
        prop_assert_eq!(timeline.to_absolute_slot(relative).unwrap(), slot);
    }

    #[test]
    fn relative_absolute_roundtrip(
        timeline in timeline_strategy(),
        epoch in 0u64..2_000,
        frac in 0.0f64..1.0,
    ) {
        let (_, era) = timeline.era_for_epoch(epoch);
        let slot = ((era.slots_per_epoch as f64) * frac) as u64 % era.slots_per_epoch;
        let relative = RelativeSlot { epoch, slot };
        let absolute = timeline.to_absolute_slot(relative).unwrap();
        prop_assert_eq!(timeline.to_relative_slot(absolute).unwrap(), relative);
    }

    #[test]
    fn slot_time_roundtrip(timeline in timeline_strategy(), slot in 0u64..200_000_000) {
        let time = timeline.slot_to_time(slot).unwrap();
        let back = timeline.time_to_slot(time).unwrap();
        prop_assert_eq!(back.slot, slot);
        prop_assert_eq!(back.ms_into_slot, 0);
    }
}

// --- value model ---

fn defaults() -> DefaultToken {
    DefaultToken::new(NetworkId(0), TokenId::default())
}

fn value_strategy() -> impl Strategy<Value = MultiToken> {
    (-1_000_000i64..1_000_000, prop::collection::vec((0usize..4, -1_000i64..1_000), 0..5)).prop_map(
        |(default, entries)| {
            let mut value = MultiToken::from_default(default, defaults());
            for (id, amount) in entries {
                let token = TokenId::new(format!("asset{id}"));
                value.add(TokenEntry::new(token, NetworkId(0), amount));
            }
            value
        },
    )
}

proptest! {
    #[test]
    fn join_add_associative(a in value_strategy(), b in value_strategy(), c in value_strategy()) {
        prop_assert_eq!(a.join_add(&b).join_add(&c), a.join_add(&b.join_add(&c)));
    }

    #[test]
    fn join_add_commutative(a in value_strategy(), b in value_strategy()) {
        prop_assert_eq!(a.join_add(&b), b.join_add(&a));
    }

    #[test]
    fn subtract_undoes_add(a in value_strategy(), b in value_strategy()) {
        let back = a.join_add(&b).join_subtract(&b);
        for entry in a.entries() {
            prop_assert_eq!(back.get(&entry.identifier), Some(&entry.amount));
        }
        prop_assert_eq!(back.get_default(), a.get_default());
    }
}

// --- mangled partition ---

fn cred(b: u8) -> Credential {
    Credential::Key(Hash28([b; 28]))
}

fn utxo_strategy() -> impl Strategy<Value = Vec<UtxoRow>> {
    prop::collection::vec((0u8..4, any::<bool>(), 0u64..3_000_000), 0..24).prop_map(|specs| {
        let descriptor = mainnet();
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (stake, enterprise, lovelace))| {
                let network = ChainNetwork::Mainnet;
                let address = if enterprise {
                    Address::Enterprise { network, payment: cred(0xEE) }
                } else {
                    Address::Base { network, payment: cred(0xEE), stake: cred(stake) }
                };
                UtxoRow {
                    deriver: DeriverId(1),
                    out_point: out_point(i as u8),
                    address: address.to_bytes(),
                    value: descriptor.lovelace(lovelace),
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn mangled_partition_is_exact(utxos in utxo_strategy()) {
        let wallet_cred = cred(0);
        let summary = classify_mangled(&utxos, &wallet_cred, &mainnet()).unwrap();

        let can: HashSet<_> = summary.can_unmangle.iter().copied().collect();
        let cannot: HashSet<_> = summary.cannot_unmangle.iter().copied().collect();
        prop_assert!(can.is_disjoint(&cannot));

        let mangled: HashSet<_> = utxos
            .iter()
            .filter(|u| {
                Address::from_bytes(&u.address).unwrap().staking_credential() != Some(&wallet_cred)
            })
            .map(|u| u.out_point)
            .collect();
        let union: HashSet<_> = can.union(&cannot).copied().collect();
        prop_assert_eq!(&union, &mangled);

        let total = summary.can_unmangle_total.join_add(&summary.cannot_unmangle_total);
        let expected: BigInt = utxos
            .iter()
            .filter(|u| mangled.contains(&u.out_point))
            .map(|u| u.value.get_default().clone())
            .sum();
        prop_assert_eq!(total.get_default(), &expected);
    }
}

// --- discovery convergence ---

const G: u32 = 4;

/// Derived size after discovery converges on `used`.
fn expected_derived(used: &HashSet<u32>) -> u32 {
    let mut n = G;
    while (n - G..n).any(|i| used.contains(&i)) {
        n += G;
    }
    n
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn discovery_converges_and_is_idempotent(used in prop::collection::hash_set(0u32..24, 0..6)) {
        runtime().block_on(async {
            let fetcher = MockFetcher::new();
            let svc = service(G, fetcher.clone());
            let deriver = wallet(&svc, DerivationScheme::Cip1852, 21).await;
            let keys = keyring(21);
            let builder = AddressBuilder::new(&deriver, keys.as_ref()).unwrap();
            for &i in &used {
                fetcher.mark_used(&builder.build(Chain::External, i).unwrap().1);
            }
            let chains = deriver.require::<HasUtxoChains>().unwrap();
            let scanner = GapLimitScanner::new(G).unwrap();

            let discover = || {
                scanner.discover(svc.store(), fetcher.as_ref(), keys.as_ref(), &chains, Chain::External)
            };
            let first = discover().await.unwrap();
            assert_eq!(first.derived_total, expected_derived(&used));

            let second = discover().await.unwrap();
            assert_eq!(second.newly_derived, 0);
            assert_eq!(second.derived_total, first.derived_total);
            assert_eq!(second.checked_cutoff, first.checked_cutoff);
        });
    }

    #[test]
    fn used_flags_are_monotonic(
        used in prop::collection::hash_set(0u32..12, 1..5),
        forgotten in prop::collection::vec(any::<bool>(), 5),
    ) {
        runtime().block_on(async {
            let fetcher = MockFetcher::new();
            let svc = service(G, fetcher.clone());
            let deriver = wallet(&svc, DerivationScheme::Bip44, 22).await;
            let keys = keyring(22);
            let builder = AddressBuilder::new(&deriver, keys.as_ref()).unwrap();
            let used_addresses: Vec<Address> =
                used.iter().map(|&i| builder.build(Chain::Internal, i).unwrap().1).collect();
            for a in &used_addresses {
                fetcher.mark_used(a);
            }
            let chains = deriver.require::<HasUtxoChains>().unwrap();
            let scanner = GapLimitScanner::new(G).unwrap();
            let discover = || {
                scanner.discover(svc.store(), fetcher.as_ref(), keys.as_ref(), &chains, Chain::Internal)
            };
            discover().await.unwrap();

            for (a, forget) in used_addresses.iter().zip(&forgotten) {
                if *forget {
                    fetcher.forget_used(a);
                }
            }
            discover().await.unwrap();

            let rows = chains.chain_addresses(svc.store(), Chain::Internal).await.unwrap();
            for row in rows.iter().filter(|r| used.contains(&r.index)) {
                assert_eq!(row.usage, AddressUsage::Used, "index {}", row.index);
            }
        });
    }
}
