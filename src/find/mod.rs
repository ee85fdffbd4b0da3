//! Find criteria: a small predicate language over vertex status and
//! scheduling state.
//!
//! Supported predicate keys: `status={up|down}`,
//! `sched-now={allocated|free}`, `sched-future={reserved|free}`,
//! `names=<hostlist>`, `property=<name>`. Predicates combine with `and`,
//! `or` and parentheses; bare whitespace between predicates reads as `and`.

use thiserror::Error;

use crate::graph::pool::{ResourcePool, ResourceStatus};
use crate::hostlist;
use crate::Time;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FindError {
    #[error("malformed criteria: {0}")]
    Malformed(String),

    #[error("unknown predicate key: {0}")]
    UnknownKey(String),

    #[error("unknown value for {key}: {value}")]
    UnknownValue { key: String, value: String },
}

/// One leaf predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Status(ResourceStatus),
    SchedNowAllocated,
    SchedNowFree,
    SchedFutureReserved,
    SchedFutureFree,
    Names(Vec<String>),
    Property(String),
}

impl Predicate {
    fn parse(key: &str, value: &str) -> Result<Self, FindError> {
        let unknown = || FindError::UnknownValue {
            key: key.to_owned(),
            value: value.to_owned(),
        };
        match key {
            "status" => ResourceStatus::parse(value)
                .map(Self::Status)
                .ok_or_else(unknown),
            "sched-now" => match value {
                "allocated" => Ok(Self::SchedNowAllocated),
                "free" => Ok(Self::SchedNowFree),
                _ => Err(unknown()),
            },
            "sched-future" => match value {
                "reserved" => Ok(Self::SchedFutureReserved),
                "free" => Ok(Self::SchedFutureFree),
                _ => Err(unknown()),
            },
            "names" => hostlist::expand(value)
                .map(Self::Names)
                .map_err(|e| FindError::Malformed(e.to_string())),
            "property" => Ok(Self::Property(value.to_owned())),
            _ => Err(FindError::UnknownKey(key.to_owned())),
        }
    }

    /// Evaluates against one pool at reference time `now`.
    pub fn matches(&self, pool: &ResourcePool, now: Time) -> bool {
        match self {
            Self::Status(status) => pool.status == *status,
            Self::SchedNowAllocated => pool.schedule.plans.occupancy_at(now) > 0,
            Self::SchedNowFree => pool.schedule.plans.occupancy_at(now) == 0,
            Self::SchedFutureReserved => has_future_span(pool, now),
            Self::SchedFutureFree => !has_future_span(pool, now),
            Self::Names(names) => names.iter().any(|n| *n == pool.name),
            Self::Property(name) => pool.properties.contains_key(name),
        }
    }
}

fn has_future_span(pool: &ResourcePool, now: Time) -> bool {
    pool.schedule
        .plans
        .holders()
        .iter()
        .filter_map(|&h| pool.schedule.plans.span_of(h))
        .any(|span| span.start > now)
}

/// A parsed criteria expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Pred(Predicate),
}

impl Criteria {
    pub fn parse(text: &str) -> Result<Self, FindError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(FindError::Malformed(format!(
                "trailing input near '{}'",
                parser.tokens[parser.pos]
            )));
        }
        Ok(expr)
    }

    pub fn matches(&self, pool: &ResourcePool, now: Time) -> bool {
        match self {
            Self::And(cs) => cs.iter().all(|c| c.matches(pool, now)),
            Self::Or(cs) => cs.iter().any(|c| c.matches(pool, now)),
            Self::Pred(p) => p.matches(pool, now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Pair(String, String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => f.write_str("("),
            Self::Close => f.write_str(")"),
            Self::And => f.write_str("and"),
            Self::Or => f.write_str("or"),
            Self::Pair(k, v) => write!(f, "{k}={v}"),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, FindError> {
    let mut tokens = Vec::new();
    let padded = text.replace('(', " ( ").replace(')', " ) ");
    for word in padded.split_whitespace() {
        let token = match word {
            "(" => Token::Open,
            ")" => Token::Close,
            "and" => Token::And,
            "or" => Token::Or,
            pair => {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| FindError::Malformed(format!("expected key=value: {pair}")))?;
                Token::Pair(key.to_owned(), value.to_owned())
            }
        };
        tokens.push(token);
    }
    if tokens.is_empty() {
        return Err(FindError::Malformed("empty criteria".to_owned()));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    // or binds loosest
    fn or_expr(&mut self) -> Result<Criteria, FindError> {
        let mut operands = vec![self.and_expr()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            operands.push(self.and_expr()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Criteria::Or(operands)
        })
    }

    // adjacency is an implicit and
    fn and_expr(&mut self) -> Result<Criteria, FindError> {
        let mut operands = vec![self.primary()?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                    operands.push(self.primary()?);
                }
                Some(Token::Open) | Some(Token::Pair(_, _)) => {
                    operands.push(self.primary()?);
                }
                _ => break,
            }
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Criteria::And(operands)
        })
    }

    fn primary(&mut self) -> Result<Criteria, FindError> {
        match self.peek().cloned() {
            Some(Token::Open) => {
                self.pos += 1;
                let inner = self.or_expr()?;
                if self.peek() != Some(&Token::Close) {
                    return Err(FindError::Malformed("missing ')'".to_owned()));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(Token::Pair(key, value)) => {
                self.pos += 1;
                Ok(Criteria::Pred(Predicate::parse(&key, &value)?))
            }
            Some(token) => Err(FindError::Malformed(format!("unexpected '{token}'"))),
            None => Err(FindError::Malformed("unexpected end of input".to_owned())),
        }
    }
}
