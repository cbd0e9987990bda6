use traders_console::actions::{duplicate_identifiers, ActionRegistry};
use traders_console::resolver::{CommandResolver, ResolverConfig};

fn resolver() -> CommandResolver {
    ActionRegistry::builtin().resolver(ResolverConfig::default())
}

#[test]
fn vocabulary_is_unique() {
    assert!(duplicate_identifiers(&ActionRegistry::builtin()).is_empty());
}

#[test]
fn common_phrasings_resolve() {
    let resolver = resolver();
    for (query, expected) in [
        ("exit", "Exit"),
        ("EXIT", "Exit"),
        ("  register  ", "Register"),
        ("please register", "Register"),
        ("next server reset", "NextServerReset"),
        ("get status", "GetStatus"),
        ("list ships", "ListShips"),
    ] {
        assert_eq!(resolver.resolve_one(query), Some(expected), "query {query:?}");
    }
}

#[test]
fn gibberish_resolves_to_nothing() {
    let resolver = resolver();
    assert_eq!(resolver.resolve_one("xz9q"), None);
    assert_eq!(resolver.resolve_one(""), None);
    assert!(resolver.resolve_many("   ", 5).is_empty());
}

#[test]
fn resolve_one_only_returns_vocabulary_members() {
    let resolver = resolver();
    let registry = ActionRegistry::builtin();
    for query in ["ship", "contract", "market", "scan", "refuel", "jump"] {
        if let Some(found) = resolver.resolve_one(query) {
            assert!(registry.get(found).is_some(), "{found} is not an action");
        }
    }
}

#[test]
fn ship_suggestions_are_ranked() {
    let resolver = resolver();
    let ranked = resolver.resolve_many("ship", 5);

    assert_eq!(ranked.len(), 5);
    for pair in ranked.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for candidate in &ranked {
        assert!(candidate.identifier.to_uppercase().contains("SHIP"));
    }
}

#[test]
fn resolution_is_repeatable() {
    let resolver = resolver();
    assert_eq!(
        resolver.resolve_one("when is the next server reset"),
        resolver.resolve_one("when is the next server reset")
    );
    assert_eq!(
        resolver.resolve_many("deliver cargo", 5),
        resolver.resolve_many("deliver cargo", 5)
    );
}
