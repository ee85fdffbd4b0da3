//! Request constraint predicates.
//!
//! A jobspec may restrict which pools qualify via a small predicate tree
//! over pool properties, host names and ranks, combined with and/or/not.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::graph::pool::ResourcePool;
use crate::{hostlist, idset};

use super::errors::JobspecError;

/// Predicate tree evaluated against candidate pools.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Not(Box<Constraint>),
    /// Property names the pool must carry; a leading '^' negates one name.
    Properties(Vec<String>),
    /// Host names the pool's name must be among.
    Hostlist(Vec<String>),
    /// Execution-target ranks the pool must belong to.
    Ranks(BTreeSet<u64>),
}

impl Constraint {
    /// Parses the JSON constraint object, e.g.
    /// `{"and": [{"properties": ["gpu-ready"]}, {"ranks": "0-3"}]}`.
    pub fn parse(value: &Value) -> Result<Self, JobspecError> {
        let obj = value
            .as_object()
            .ok_or_else(|| JobspecError::Malformed("constraint must be an object".into()))?;
        if obj.len() != 1 {
            return Err(JobspecError::Malformed(
                "constraint object must have exactly one operator".into(),
            ));
        }
        let (op, arg) = obj.iter().next().expect("len checked above");
        match op.as_str() {
            "and" => Ok(Self::And(Self::parse_list(arg)?)),
            "or" => Ok(Self::Or(Self::parse_list(arg)?)),
            "not" => {
                let mut operands = Self::parse_list(arg)?;
                if operands.len() != 1 {
                    return Err(JobspecError::Malformed(
                        "not takes exactly one operand".into(),
                    ));
                }
                Ok(Self::Not(Box::new(operands.remove(0))))
            }
            "properties" => Ok(Self::Properties(Self::parse_strings(arg)?)),
            "hostlist" => {
                let mut hosts = Vec::new();
                for elem in Self::parse_strings(arg)? {
                    hosts.extend(hostlist::expand(&elem).map_err(|e| {
                        JobspecError::Malformed(format!("bad hostlist: {e}"))
                    })?);
                }
                Ok(Self::Hostlist(hosts))
            }
            "ranks" => {
                let mut ranks = BTreeSet::new();
                for elem in Self::parse_strings(arg)? {
                    ranks.extend(
                        idset::parse(&elem)
                            .map_err(|e| JobspecError::Malformed(format!("bad ranks: {e}")))?,
                    );
                }
                Ok(Self::Ranks(ranks))
            }
            other => Err(JobspecError::UnknownConstraint(other.to_owned())),
        }
    }

    fn parse_list(value: &Value) -> Result<Vec<Constraint>, JobspecError> {
        value
            .as_array()
            .ok_or_else(|| JobspecError::Malformed("operator argument must be an array".into()))?
            .iter()
            .map(Self::parse)
            .collect()
    }

    fn parse_strings(value: &Value) -> Result<Vec<String>, JobspecError> {
        match value {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| JobspecError::Malformed("expected string".into()))
                })
                .collect(),
            _ => Err(JobspecError::Malformed(
                "expected string or array of strings".into(),
            )),
        }
    }

    /// Evaluates the predicate against one pool.
    pub fn matches(&self, pool: &ResourcePool) -> bool {
        match self {
            Self::And(cs) => cs.iter().all(|c| c.matches(pool)),
            Self::Or(cs) => cs.iter().any(|c| c.matches(pool)),
            Self::Not(c) => !c.matches(pool),
            Self::Properties(names) => names.iter().all(|name| match name.strip_prefix('^') {
                Some(negated) => !pool.properties.contains_key(negated),
                None => pool.properties.contains_key(name),
            }),
            Self::Hostlist(hosts) => hosts.iter().any(|h| *h == pool.name),
            Self::Ranks(ranks) => pool.rank >= 0 && ranks.contains(&(pool.rank as u64)),
        }
    }
}
