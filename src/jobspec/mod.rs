//! Job request model.
//!
//! A jobspec is a tree of resource requests: each node names a type, a
//! count specification, optional exclusivity, and child shapes (`with`). A
//! `slot` node is a named grouping that multiplies its child shape by a
//! count ("give me N copies of this shape").

use serde::Deserialize;

use crate::interner::ResourceType;

pub mod constraint;
pub mod errors;

pub use constraint::Constraint;
pub use errors::JobspecError;

/// How a count range is stepped between min and max.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountOp {
    Plus,
    Times,
    Pow,
}

impl CountOp {
    fn parse(s: &str) -> Result<Self, JobspecError> {
        match s {
            "+" => Ok(Self::Plus),
            "*" => Ok(Self::Times),
            "^" => Ok(Self::Pow),
            other => Err(JobspecError::UnknownOperator(other.to_owned())),
        }
    }
}

/// Requested quantity: `min` up to `max` in `operator`/`operand` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Count {
    pub min: u64,
    pub max: u64,
    pub operator: CountOp,
    pub operand: i64,
}

impl Count {
    pub fn fixed(n: u64) -> Self {
        Self {
            min: n,
            max: n,
            operator: CountOp::Plus,
            operand: 1,
        }
    }

    /// Largest admissible count not above `limit`, stepping from min.
    /// Returns None when even the minimum does not fit.
    pub fn best_fit(&self, limit: u64) -> Option<u64> {
        if limit < self.min {
            return None;
        }
        let cap = self.max.min(limit);
        let mut best = self.min;
        let mut cur = self.min;
        loop {
            let next = match self.operator {
                CountOp::Plus => cur.checked_add(self.operand.max(1) as u64),
                CountOp::Times => cur.checked_mul(self.operand.max(2) as u64),
                CountOp::Pow => cur.checked_pow(self.operand.max(2) as u32),
            };
            match next {
                Some(n) if n <= cap && n > cur => {
                    best = n;
                    cur = n;
                }
                _ => break,
            }
        }
        Some(best)
    }

    /// Upper bound of the count range (caps slot multiplicity).
    pub fn effective_max(&self) -> u64 {
        self.max
    }
}

/// Exclusivity requested for one resource level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Exclusivity {
    True,
    False,
    #[default]
    Unspec,
}

/// One node of the request tree.
#[derive(Debug, Clone)]
pub struct ResourceReq {
    pub rtype: ResourceType,
    pub count: Count,
    pub exclusive: Exclusivity,
    pub label: Option<String>,
    pub with: Vec<ResourceReq>,
    /// Aggregate minimum granules per type in this subtree (self included),
    /// folded in by [`Jobspec::prime`]. Drives subtree pruning.
    pub aggregate_needs: Vec<(ResourceType, u64)>,
}

impl ResourceReq {
    pub fn is_slot(&self) -> bool {
        self.rtype.is_slot()
    }

    pub fn need_of(&self, rtype: ResourceType) -> u64 {
        self.aggregate_needs
            .iter()
            .find(|(t, _)| *t == rtype)
            .map(|(_, q)| *q)
            .unwrap_or(0)
    }
}

/// A parsed, validated job request.
#[derive(Debug, Clone)]
pub struct Jobspec {
    pub resources: Vec<ResourceReq>,
    /// Requested runtime in seconds; 0 means "to the end of the graph".
    pub duration: u64,
    pub constraint: Option<Constraint>,
}

#[derive(Deserialize)]
struct WireJobspec {
    resources: Vec<WireReq>,
    #[serde(default)]
    attributes: Option<WireAttributes>,
}

#[derive(Deserialize)]
struct WireReq {
    #[serde(rename = "type")]
    rtype: String,
    count: WireCount,
    #[serde(default)]
    with: Vec<WireReq>,
    #[serde(default)]
    exclusive: Option<bool>,
    #[serde(default)]
    label: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireCount {
    Fixed(u64),
    Spec {
        min: u64,
        #[serde(default)]
        max: Option<u64>,
        #[serde(default)]
        operator: Option<String>,
        #[serde(default)]
        operand: Option<i64>,
    },
}

#[derive(Deserialize)]
struct WireAttributes {
    #[serde(default)]
    system: Option<WireSystem>,
}

#[derive(Deserialize)]
struct WireSystem {
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    constraints: Option<serde_json::Value>,
}

impl Jobspec {
    /// Parses and validates a JSON jobspec.
    pub fn parse(text: &str) -> Result<Self, JobspecError> {
        let wire: WireJobspec =
            serde_json::from_str(text).map_err(|e| JobspecError::Malformed(e.to_string()))?;
        if wire.resources.is_empty() {
            return Err(JobspecError::Empty);
        }
        let resources = wire
            .resources
            .into_iter()
            .map(convert_req)
            .collect::<Result<Vec<_>, _>>()?;

        let mut duration = 0u64;
        let mut constraint = None;
        if let Some(system) = wire.attributes.and_then(|a| a.system) {
            if let Some(d) = system.duration {
                if d < 0.0 || !d.is_finite() {
                    return Err(JobspecError::Malformed(format!("bad duration: {d}")));
                }
                duration = d as u64;
            }
            if let Some(value) = &system.constraints {
                constraint = Some(Constraint::parse(value)?);
            }
        }

        let mut jobspec = Self {
            resources,
            duration,
            constraint,
        };
        jobspec.prime();
        Ok(jobspec)
    }

    /// Folds minimum counts up the request tree so every node carries the
    /// aggregate minimum of each type it requires, and returns the totals
    /// for the whole request.
    pub fn prime(&mut self) -> Vec<(ResourceType, u64)> {
        let mut total: Vec<(ResourceType, u64)> = Vec::new();
        for req in &mut self.resources {
            merge(&mut total, &prime_req(req));
        }
        total
    }

    /// Total minimum granules of one type across the request.
    pub fn total_need(&self, rtype: ResourceType) -> u64 {
        self.resources.iter().map(|r| r.need_of(rtype)).sum()
    }
}

fn prime_req(req: &mut ResourceReq) -> Vec<(ResourceType, u64)> {
    let mut agg: Vec<(ResourceType, u64)> = Vec::new();
    for child in &mut req.with {
        merge(&mut agg, &prime_req(child));
    }
    for (_, qty) in &mut agg {
        *qty *= req.count.min;
    }
    if !req.is_slot() {
        merge(&mut agg, &[(req.rtype, req.count.min)]);
    }
    req.aggregate_needs = agg.clone();
    agg
}

fn merge(into: &mut Vec<(ResourceType, u64)>, from: &[(ResourceType, u64)]) {
    for (rtype, qty) in from {
        match into.iter_mut().find(|(t, _)| t == rtype) {
            Some((_, q)) => *q += qty,
            None => into.push((*rtype, *qty)),
        }
    }
}

fn convert_req(wire: WireReq) -> Result<ResourceReq, JobspecError> {
    let count = match wire.count {
        WireCount::Fixed(n) => {
            if n == 0 {
                return Err(JobspecError::ZeroCount(0));
            }
            Count::fixed(n)
        }
        WireCount::Spec {
            min,
            max,
            operator,
            operand,
        } => {
            if min == 0 {
                return Err(JobspecError::ZeroCount(0));
            }
            let max = max.unwrap_or(u64::MAX);
            if max < min {
                return Err(JobspecError::MaxBelowMin { min, max });
            }
            Count {
                min,
                max,
                operator: operator.as_deref().map(CountOp::parse).transpose()?.unwrap_or(CountOp::Plus),
                operand: operand.unwrap_or(1),
            }
        }
    };
    let with = wire
        .with
        .into_iter()
        .map(convert_req)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ResourceReq {
        rtype: ResourceType::intern(&wire.rtype),
        count,
        exclusive: match wire.exclusive {
            Some(true) => Exclusivity::True,
            Some(false) => Exclusivity::False,
            None => Exclusivity::Unspec,
        },
        label: wire.label,
        with,
        aggregate_needs: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Jobspec {
        Jobspec::parse(&v.to_string()).unwrap()
    }

    #[test]
    fn parse_simple_shape() {
        let js = parse(json!({
            "resources": [
                {"type": "node", "count": 2,
                 "with": [{"type": "core", "count": 4}]}
            ]
        }));
        assert_eq!(js.resources.len(), 1);
        let node = &js.resources[0];
        assert_eq!(node.rtype, ResourceType::node());
        assert_eq!(node.count, Count::fixed(2));
        assert_eq!(node.with[0].rtype, ResourceType::core());
    }

    #[test]
    fn parse_slot_shape() {
        let js = parse(json!({
            "resources": [
                {"type": "slot", "count": 1, "label": "default",
                 "with": [{"type": "core", "count": 2}]}
            ]
        }));
        assert!(js.resources[0].is_slot());
        assert_eq!(js.resources[0].label.as_deref(), Some("default"));
    }

    #[test]
    fn parse_duration_and_exclusive() {
        let js = parse(json!({
            "resources": [{"type": "node", "count": 1, "exclusive": true}],
            "attributes": {"system": {"duration": 3600.0}}
        }));
        assert_eq!(js.duration, 3600);
        assert_eq!(js.resources[0].exclusive, Exclusivity::True);
    }

    #[test]
    fn priming_folds_minimums_up() {
        let js = parse(json!({
            "resources": [
                {"type": "node", "count": 2,
                 "with": [
                     {"type": "core", "count": 4},
                     {"type": "gpu", "count": 1}
                 ]}
            ]
        }));
        assert_eq!(js.total_need(ResourceType::core()), 8);
        assert_eq!(js.total_need(ResourceType::gpu()), 2);
        assert_eq!(js.total_need(ResourceType::node()), 2);
    }

    #[test]
    fn priming_skips_slot_pseudo_type() {
        let js = parse(json!({
            "resources": [
                {"type": "slot", "count": 3,
                 "with": [{"type": "core", "count": 2}]}
            ]
        }));
        assert_eq!(js.total_need(ResourceType::core()), 6);
        assert_eq!(js.total_need(ResourceType::slot()), 0);
    }

    #[test]
    fn count_range_best_fit() {
        let c = Count {
            min: 2,
            max: 10,
            operator: CountOp::Plus,
            operand: 2,
        };
        assert_eq!(c.best_fit(1), None);
        assert_eq!(c.best_fit(2), Some(2));
        assert_eq!(c.best_fit(7), Some(6));
        assert_eq!(c.best_fit(100), Some(10));

        let p = Count {
            min: 1,
            max: 64,
            operator: CountOp::Times,
            operand: 2,
        };
        assert_eq!(p.best_fit(48), Some(32));
    }

    #[test]
    fn rejects_bad_counts() {
        assert!(matches!(
            Jobspec::parse(&json!({"resources": [{"type": "core", "count": 0}]}).to_string()),
            Err(JobspecError::ZeroCount(0))
        ));
        assert!(matches!(
            Jobspec::parse(
                &json!({"resources": [{"type": "core", "count": {"min": 5, "max": 2}}]})
                    .to_string()
            ),
            Err(JobspecError::MaxBelowMin { min: 5, max: 2 })
        ));
    }

    #[test]
    fn rejects_empty_resources() {
        assert!(matches!(
            Jobspec::parse(&json!({"resources": []}).to_string()),
            Err(JobspecError::Empty)
        ));
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            Jobspec::parse("not json"),
            Err(JobspecError::Malformed(_))
        ));
    }
}
