//! Query builder types and enums.

use std::fmt;
use std::str::FromStr;

use crate::DbError;

/// Boolean connector placed before a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    /// Returns the SQL keyword.
    pub fn to_sql(&self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// JOIN kinds accepted by `join`. Anything else becomes a plain `JOIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Outer,
    LeftOuter,
    RightOuter,
}

impl JoinKind {
    /// Parses a join kind, returning `None` for anything off the allow-list.
    pub fn parse(kind: &str) -> Option<Self> {
        let normalized = kind.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_uppercase();
        match normalized.as_str() {
            "INNER" => Some(JoinKind::Inner),
            "LEFT" => Some(JoinKind::Left),
            "RIGHT" => Some(JoinKind::Right),
            "OUTER" => Some(JoinKind::Outer),
            "LEFT OUTER" => Some(JoinKind::LeftOuter),
            "RIGHT OUTER" => Some(JoinKind::RightOuter),
            _ => None,
        }
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Outer => "OUTER",
            JoinKind::LeftOuter => "LEFT OUTER",
            JoinKind::RightOuter => "RIGHT OUTER",
        }
    }
}

/// Aggregate functions for `select_max` and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Max,
    Min,
    Avg,
    Sum,
}

impl AggregateKind {
    pub fn to_sql(&self) -> &'static str {
        match self {
            AggregateKind::Max => "MAX",
            AggregateKind::Min => "MIN",
            AggregateKind::Avg => "AVG",
            AggregateKind::Sum => "SUM",
        }
    }
}

impl FromStr for AggregateKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MAX" => Ok(AggregateKind::Max),
            "MIN" => Ok(AggregateKind::Min),
            "AVG" => Ok(AggregateKind::Avg),
            "SUM" => Ok(AggregateKind::Sum),
            other => Err(DbError::Usage(format!("Invalid aggregate function: {}", other))),
        }
    }
}

impl fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// Where the `%` wildcards go in a LIKE pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LikeSide {
    /// `%match`
    Before,
    /// `match%`
    After,
    /// `%match%`
    #[default]
    Both,
    /// `match`
    None,
}

impl LikeSide {
    /// Parses a side name. Unknown names mean both sides.
    pub fn parse(side: &str) -> Self {
        match side.trim().to_ascii_lowercase().as_str() {
            "before" => LikeSide::Before,
            "after" => LikeSide::After,
            "none" => LikeSide::None,
            _ => LikeSide::Both,
        }
    }

    /// Wraps already-escaped text with wildcards.
    pub fn pattern(&self, escaped: &str) -> String {
        match self {
            LikeSide::Before => format!("%{}", escaped),
            LikeSide::After => format!("{}%", escaped),
            LikeSide::Both => format!("%{}%", escaped),
            LikeSide::None => escaped.to_string(),
        }
    }
}

/// ORDER BY direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
    /// Backend random ordering; the column is ignored
    Random,
}

impl OrderDirection {
    /// Parses a direction. Empty means none; unrecognised text means ascending.
    pub fn parse(direction: &str) -> Option<Self> {
        let direction = direction.trim();
        if direction.is_empty() {
            return None;
        }
        Some(match direction.to_ascii_uppercase().as_str() {
            "RANDOM" => OrderDirection::Random,
            "DESC" => OrderDirection::Desc,
            _ => OrderDirection::Asc,
        })
    }

    pub fn to_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
            OrderDirection::Random => "",
        }
    }
}
