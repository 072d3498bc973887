use std::collections::BTreeMap;

use crate::models::{Candidate, Group};

/// Partition candidates by identity key. Groups come back ordered by key so
/// the rest of the run is processed in a stable order.
pub fn group_by_key(candidates: Vec<Candidate>) -> Vec<Group> {
    let mut groups: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for c in candidates {
        groups.entry(c.identity_key.clone()).or_default().push(c);
    }
    groups
        .into_iter()
        .map(|(identity_key, candidates)| Group {
            identity_key,
            candidates,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommentHealth, Identity};
    use chrono::Utc;
    use std::path::PathBuf;

    fn cand(key: &str, path: &str) -> Candidate {
        Candidate {
            identity_key: key.to_string(),
            identity: Identity::default(),
            owner: "u".into(),
            path: PathBuf::from(path),
            size: 1,
            mtime: Utc::now(),
            content_digest: "d".into(),
            comment_health: CommentHealth::default(),
        }
    }

    #[test]
    fn groups_sorted_and_non_empty() {
        let groups = group_by_key(vec![
            cand("NAME:b", "1"),
            cand("ID:a", "2"),
            cand("NAME:b", "3"),
        ]);
        let keys: Vec<_> = groups.iter().map(|g| g.identity_key.as_str()).collect();
        assert_eq!(keys, vec!["ID:a", "NAME:b"]);
        assert_eq!(groups[1].candidates.len(), 2);
        assert!(groups.iter().all(|g| !g.candidates.is_empty()));
    }
}
