//! Surrogate substitution: stand-ins on the wire, originals in memory,
//! reference identity preserved throughout.

use std::sync::Arc;

use snapgraph::descriptor::key_matches;
use snapgraph::{
    Matcher, Obj, Pack, Result, SnapError, SnapObject, Snapgraph, SurrogateRegistry, TypeKey,
};

// The in-memory form: pretend `raw` is only meaningful in this process.
#[derive(Default, SnapObject)]
struct SessionKey {
    raw: u64,
}

// The stream-friendly form.
#[derive(Default, SnapObject)]
struct PortableKey {
    encoded: String,
}

fn key_rules() -> Result<Arc<SurrogateRegistry>> {
    let rules = SurrogateRegistry::new();
    rules.register::<SessionKey, PortableKey>(
        |key| PortableKey {
            encoded: format!("k:{}", key.raw),
        },
        |portable| SessionKey {
            raw: portable
                .encoded
                .strip_prefix("k:")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        },
    )?;
    Ok(Arc::new(rules))
}

#[derive(Default, SnapObject)]
struct Vault {
    first: Obj<SessionKey>,
    second: Obj<SessionKey>,
}

#[test]
fn substituted_object_roundtrips_through_its_stand_in() -> Result<()> {
    let builder = Snapgraph::builder().surrogates(key_rules()?);
    let key = Obj::new(SessionKey { raw: 4242 });
    let bytes = builder.to_vec(&key)?;
    let copy: Obj<SessionKey> = builder.from_slice(&bytes)?;
    assert_eq!(copy.borrow().raw, 4242);
    Ok(())
}

#[test]
fn substitution_preserves_reference_identity() -> Result<()> {
    let builder = Snapgraph::builder().surrogates(key_rules()?);
    let shared = Obj::new(SessionKey { raw: 7 });
    let vault = Obj::new(Vault {
        first: shared.clone(),
        second: shared,
    });

    let bytes = builder.to_vec(&vault)?;
    let copy: Obj<Vault> = builder.from_slice(&bytes)?;
    let inner = copy.borrow();
    assert!(Obj::ptr_eq(&inner.first, &inner.second));
    assert_eq!(inner.first.borrow().raw, 7);
    Ok(())
}

#[test]
fn distinct_originals_stay_distinct() -> Result<()> {
    let builder = Snapgraph::builder().surrogates(key_rules()?);
    let vault = Obj::new(Vault {
        first: Obj::new(SessionKey { raw: 1 }),
        second: Obj::new(SessionKey { raw: 2 }),
    });

    let bytes = builder.to_vec(&vault)?;
    let copy: Obj<Vault> = builder.from_slice(&bytes)?;
    let inner = copy.borrow();
    assert!(!Obj::ptr_eq(&inner.first, &inner.second));
    assert_eq!(inner.first.borrow().raw, 1);
    assert_eq!(inner.second.borrow().raw, 2);
    Ok(())
}

#[derive(Default, SnapObject)]
#[snap(late_post_deserialize = "rebuild")]
struct LateKey {
    raw: u64,
    #[snap(skip)]
    cache: u64,
}

impl LateKey {
    fn rebuild(&mut self) {
        self.cache = self.raw * 2;
    }
}

#[test]
fn surrogate_on_a_late_hook_type_is_a_contract_violation() -> Result<()> {
    let rules = SurrogateRegistry::new();
    rules.register::<LateKey, PortableKey>(
        |key| PortableKey {
            encoded: key.raw.to_string(),
        },
        |portable| LateKey {
            raw: portable.encoded.parse().unwrap_or(0),
            cache: 0,
        },
    )?;
    let builder = Snapgraph::builder().surrogates(Arc::new(rules));

    let key = Obj::new(LateKey { raw: 3, cache: 0 });
    let result = builder.to_vec(&key);
    assert!(matches!(result, Err(SnapError::Contract(_))));
    Ok(())
}

mod plain_token {
    use super::*;

    #[derive(Default, SnapObject)]
    pub struct Token {
        pub raw: u64,
    }
}

mod hooked_token {
    use super::*;

    // Same identity as `plain_token::Token`, but this side defers its
    // rehydration hook.
    #[derive(Default, SnapObject)]
    #[snap(late_post_deserialize = "rebuild")]
    pub struct Token {
        pub raw: u64,
        #[snap(skip)]
        pub cache: u64,
    }

    impl Token {
        fn rebuild(&mut self) {
            self.cache = self.raw;
        }
    }
}

#[test]
fn reader_rejects_a_surrogate_landing_on_a_late_hook_type() -> Result<()> {
    let writer_rules = SurrogateRegistry::new();
    writer_rules.register::<plain_token::Token, PortableKey>(
        |token| PortableKey {
            encoded: token.raw.to_string(),
        },
        |portable| plain_token::Token {
            raw: portable.encoded.parse().unwrap_or(0),
        },
    )?;
    let bytes = Snapgraph::builder()
        .surrogates(Arc::new(writer_rules))
        .to_vec(&Obj::new(plain_token::Token { raw: 8 }))?;

    let reader_rules = SurrogateRegistry::new();
    reader_rules.register::<hooked_token::Token, PortableKey>(
        |token| PortableKey {
            encoded: token.raw.to_string(),
        },
        |portable| hooked_token::Token {
            raw: portable.encoded.parse().unwrap_or(0),
            cache: 0,
        },
    )?;
    let result: Result<Obj<hooked_token::Token>> = Snapgraph::builder()
        .surrogates(Arc::new(reader_rules))
        .from_slice(&bytes);
    assert!(matches!(result, Err(SnapError::Contract(_))));
    Ok(())
}

#[derive(Default, SnapObject)]
struct Holder<T> {
    item: T,
}

#[test]
fn wildcard_patterns_match_open_generics() -> Result<()> {
    let pattern = TypeKey::parse("Holder<*>")?;
    assert!(key_matches(&pattern, &<Holder<u64> as Pack>::type_key()));
    assert!(key_matches(
        &pattern,
        &<Holder<Vec<String>> as Pack>::type_key()
    ));
    assert!(!key_matches(&pattern, &<Vec<u64> as Pack>::type_key()));
    Ok(())
}

#[test]
fn pattern_rule_substitutes_a_generic_instantiation() -> Result<()> {
    let rules = SurrogateRegistry::new();
    rules.register_prioritized::<Holder<u64>, PortableKey>(
        Matcher::Pattern(TypeKey::parse("Holder<*>")?),
        5,
        |holder| PortableKey {
            encoded: holder.item.to_string(),
        },
        |portable| Holder {
            item: portable.encoded.parse().unwrap_or(0),
        },
    )?;
    let builder = Snapgraph::builder().surrogates(Arc::new(rules));

    let held = Obj::new(Holder { item: 31337u64 });
    let bytes = builder.to_vec(&held)?;
    let copy: Obj<Holder<u64>> = builder.from_slice(&bytes)?;
    assert_eq!(copy.borrow().item, 31337);
    Ok(())
}

#[test]
fn exact_rules_outrank_patterns_regardless_of_priority() -> Result<()> {
    let rules = SurrogateRegistry::new();
    // Low-priority exact rule, high-priority pattern rule: exact wins.
    rules.register_prioritized::<SessionKey, PortableKey>(
        Matcher::Exact(<SessionKey as Pack>::type_key()),
        -10,
        |key| PortableKey {
            encoded: format!("exact:{}", key.raw),
        },
        |portable| SessionKey {
            raw: portable
                .encoded
                .strip_prefix("exact:")
                .and_then(|s| s.parse().ok())
                .unwrap_or(999),
        },
    )?;
    rules.register_prioritized::<SessionKey, PortableKey>(
        Matcher::Pattern(TypeKey::Wildcard),
        100,
        |key| PortableKey {
            encoded: format!("pattern:{}", key.raw),
        },
        |_| SessionKey { raw: 999 },
    )?;
    let builder = Snapgraph::builder().surrogates(Arc::new(rules));

    let key = Obj::new(SessionKey { raw: 55 });
    let bytes = builder.to_vec(&key)?;
    let copy: Obj<SessionKey> = builder.from_slice(&bytes)?;
    assert_eq!(copy.borrow().raw, 55, "the exact rule's encoding was used");
    Ok(())
}
