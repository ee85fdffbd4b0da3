//! Hostlist notation ("node[0-3],login1").
//!
//! Host lists appear in find `names=` criteria and in the `nodelist` field
//! of executable R sets. A hostlist is a comma-separated sequence of names;
//! a name may carry one bracketed idset suffix that expands against its
//! prefix.

use thiserror::Error;

use crate::idset;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostlistError {
    #[error("unbalanced bracket in '{0}'")]
    UnbalancedBracket(String),

    #[error("bad id range in '{0}': {1}")]
    BadRange(String, idset::IdsetError),
}

/// Expands "node[0-1],login3" into ["node0", "node1", "login3"].
pub fn expand(s: &str) -> Result<Vec<String>, HostlistError> {
    let mut hosts = Vec::new();
    for elem in split_elements(s)? {
        match (elem.find('['), elem.rfind(']')) {
            (Some(open), Some(close)) if open < close => {
                let prefix = &elem[..open];
                let ids = idset::parse(&elem[open + 1..close])
                    .map_err(|e| HostlistError::BadRange(elem.clone(), e))?;
                for id in ids {
                    hosts.push(format!("{prefix}{id}"));
                }
            }
            (None, None) => hosts.push(elem),
            _ => return Err(HostlistError::UnbalancedBracket(elem)),
        }
    }
    Ok(hosts)
}

// Commas inside brackets separate idset elements, not hosts.
fn split_elements(s: &str) -> Result<Vec<String>, HostlistError> {
    let mut elems = Vec::new();
    let mut depth = 0usize;
    let mut cur = String::new();
    for c in s.chars() {
        match c {
            '[' => {
                depth += 1;
                cur.push(c);
            }
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| HostlistError::UnbalancedBracket(s.to_owned()))?;
                cur.push(c);
            }
            ',' if depth == 0 => {
                if !cur.trim().is_empty() {
                    elems.push(cur.trim().to_owned());
                }
                cur.clear();
            }
            _ => cur.push(c),
        }
    }
    if depth != 0 {
        return Err(HostlistError::UnbalancedBracket(s.to_owned()));
    }
    if !cur.trim().is_empty() {
        elems.push(cur.trim().to_owned());
    }
    Ok(elems)
}

/// Folds host names back into the bracketed notation, grouping hosts that
/// share an alphabetic prefix followed by a numeric suffix.
pub fn fold<I, S>(hosts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<String, Vec<u64>> = BTreeMap::new();
    let mut plain: Vec<String> = Vec::new();
    for host in hosts {
        let host = host.as_ref();
        match split_numeric_suffix(host) {
            Some((prefix, id)) => groups.entry(prefix.to_owned()).or_default().push(id),
            None => plain.push(host.to_owned()),
        }
    }

    let mut parts = Vec::new();
    for (prefix, ids) in groups {
        let set = idset::encode(ids);
        if set.contains(['-', ',']) {
            parts.push(format!("{prefix}[{set}]"));
        } else {
            parts.push(format!("{prefix}{set}"));
        }
    }
    parts.extend(plain);
    parts.join(",")
}

fn split_numeric_suffix(host: &str) -> Option<(&str, u64)> {
    let digits = host.len() - host.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits == host.len() || digits == 0 {
        return None;
    }
    host[digits..].parse().ok().map(|id| (&host[..digits], id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_bracketed() {
        assert_eq!(
            expand("node[0-2]").unwrap(),
            vec!["node0", "node1", "node2"]
        );
    }

    #[test]
    fn expand_mixed() {
        assert_eq!(
            expand("node[0-1],login3,io[5,7]").unwrap(),
            vec!["node0", "node1", "login3", "io5", "io7"]
        );
    }

    #[test]
    fn expand_rejects_unbalanced() {
        assert!(matches!(
            expand("node[0-1"),
            Err(HostlistError::UnbalancedBracket(_))
        ));
    }

    #[test]
    fn fold_groups_runs() {
        assert_eq!(fold(["node0", "node1", "node2"]), "node[0-2]");
        assert_eq!(fold(["node3"]), "node3");
    }

    #[test]
    fn fold_keeps_plain_names() {
        assert_eq!(fold(["mgmt", "node0", "node1"]), "node[0-1],mgmt");
    }

    #[test]
    fn expand_fold_round_trip() {
        let hosts = expand("node[0-3],gpu[1,3]").unwrap();
        assert_eq!(fold(&hosts), "gpu[1,3],node[0-3]");
    }
}
