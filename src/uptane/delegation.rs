use std::collections::{HashMap, HashSet};

use datatype::tuf::{TargetInfo, Targets};
use datatype::Error;


/// A minimal glob: `*` matches any run of characters within one path
/// segment, `**` matches any run of characters including `/`.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" || pattern == "**" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return path == prefix || path.starts_with(&format!("{}/", prefix));
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.splitn(2, '*').collect();
        let (prefix, suffix) = (parts[0], parts[1]);
        return path.len() >= prefix.len() + suffix.len()
            && path.starts_with(prefix)
            && path.ends_with(suffix)
            && !path[prefix.len()..path.len() - suffix.len()].contains('/');
    }
    pattern == path
}

/// Look up `target_path` in the top-level targets map, falling through into
/// delegations in declared order. The first delegation whose path pattern
/// matches is consulted (not all matching delegations); recursion into its
/// own delegations happens only if it is non-terminating.
///
/// `fetched` supplies the already-retrieved-and-verified `Targets` body for
/// a delegation name, keyed by that name; a delegation this map has no entry
/// for is treated as not yet fetched and the search stops there without
/// erroring (the caller is expected to have resolved the full tree it cares
/// about before calling this).
pub fn resolve_target<'a>(
    top: &'a Targets,
    target_path: &str,
    fetched: &'a HashMap<String, Targets>,
) -> Result<Option<&'a TargetInfo>, Error> {
    let mut visited = HashSet::new();
    walk(top, target_path, fetched, &mut visited)
}

fn walk<'a>(
    targets: &'a Targets,
    target_path: &str,
    fetched: &'a HashMap<String, Targets>,
    visited: &mut HashSet<String>,
) -> Result<Option<&'a TargetInfo>, Error> {
    if let Some(info) = targets.targets.get(target_path) {
        return Ok(Some(info));
    }

    let delegations = match &targets.delegations {
        Some(d) => d,
        None => return Ok(None),
    };

    for role in &delegations.roles {
        if !role.paths.iter().any(|pattern| path_matches(pattern, target_path)) {
            continue;
        }

        if !visited.insert(role.name.clone()) {
            return Err(Error::VerifyDelegationCycle(role.name.clone()));
        }

        let child = match fetched.get(&role.name) {
            Some(child) => child,
            None => return Ok(None),
        };

        if let Some(info) = child.targets.get(target_path) {
            return Ok(Some(info));
        }
        if role.terminating {
            return Ok(None);
        }
        return walk(child, target_path, fetched, visited);
    }

    Ok(None)
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use datatype::tuf::{DelegationRole, Delegations, RoleName};
    use maplit::{hashmap, hashset};

    fn empty_targets(entries: HashMap<String, TargetInfo>, delegations: Option<Delegations>) -> Targets {
        Targets {
            _type: RoleName::Targets,
            version: 1,
            expires: Utc::now(),
            targets: entries,
            delegations,
        }
    }

    fn info() -> TargetInfo {
        TargetInfo { length: 1, hashes: hashmap!{}, custom: None }
    }

    #[test]
    fn test_path_matches_wildcard_segment() {
        assert!(path_matches("firmware/*.bin", "firmware/ecu-a.bin"));
        assert!(!path_matches("firmware/*.bin", "firmware/sub/ecu-a.bin"));
        assert!(path_matches("firmware/**", "firmware/sub/ecu-a.bin"));
    }

    #[test]
    fn test_resolve_target_found_at_top_level() {
        let top = empty_targets(hashmap! { "a.bin".to_string() => info() }, None);
        let found = resolve_target(&top, "a.bin", &hashmap!{}).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_resolve_target_recurses_into_nonterminating_delegation() {
        let delegations = Delegations {
            keys: hashmap!{},
            roles: vec![DelegationRole {
                name: "ecus".to_string(),
                keyids: hashset!{},
                threshold: 1,
                paths: vec!["ecu/*".to_string()],
                terminating: false,
            }],
        };
        let top = empty_targets(hashmap!{}, Some(delegations));
        let child = empty_targets(hashmap! { "ecu/a.bin".to_string() => info() }, None);
        let fetched = hashmap! { "ecus".to_string() => child };

        let found = resolve_target(&top, "ecu/a.bin", &fetched).unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_resolve_target_stops_at_terminating_delegation() {
        let delegations = Delegations {
            keys: hashmap!{},
            roles: vec![DelegationRole {
                name: "ecus".to_string(),
                keyids: hashset!{},
                threshold: 1,
                paths: vec!["ecu/*".to_string()],
                terminating: true,
            }],
        };
        let top = empty_targets(hashmap!{}, Some(delegations));
        let child = empty_targets(hashmap!{}, None);
        let fetched = hashmap! { "ecus".to_string() => child };

        let found = resolve_target(&top, "ecu/a.bin", &fetched).unwrap();
        assert!(found.is_none());
    }
}
