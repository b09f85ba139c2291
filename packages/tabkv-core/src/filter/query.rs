//! Dotted query keys: `item.segment.*method...`.

use crate::error::DbError;

/// Unit for `*since` / `*until` durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeUnit {
    Ms,
    Sec,
    Min,
    Hour,
    Day,
}

impl TimeUnit {
    /// Length of one unit in microseconds.
    pub(crate) fn micros(self) -> f64 {
        match self {
            TimeUnit::Ms => 1_000.0,
            TimeUnit::Sec => 1_000_000.0,
            TimeUnit::Min => 60_000_000.0,
            TimeUnit::Hour => 3_600_000_000.0,
            TimeUnit::Day => 86_400_000_000.0,
        }
    }
}

/// Method segment (`*name`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Len,
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    IndexOf,
    KeyOf,
    Last,
    SortAsc,
    SortDesc,
    Append,
    AppendAt(usize),
    Prepend,
    Delete,
    Since,
    Until,
    Unit(TimeUnit),
}

impl Method {
    fn parse(token: &str) -> Option<Self> {
        let method = match token {
            "add" => Method::Add,
            "sub" => Method::Sub,
            "mul" => Method::Mul,
            "div" => Method::Div,
            "mod" => Method::Mod,
            "len" => Method::Len,
            "eq" => Method::Eq,
            "gt" => Method::Gt,
            "lt" => Method::Lt,
            "gte" => Method::Gte,
            "lte" => Method::Lte,
            "contains" => Method::Contains,
            "indexOf" => Method::IndexOf,
            "keyOf" => Method::KeyOf,
            "last" => Method::Last,
            "sortAsc" => Method::SortAsc,
            "sortDesc" => Method::SortDesc,
            "append" => Method::Append,
            "prepend" => Method::Prepend,
            "delete" => Method::Delete,
            "since" => Method::Since,
            "until" => Method::Until,
            "ms" => Method::Unit(TimeUnit::Ms),
            "sec" => Method::Unit(TimeUnit::Sec),
            "min" => Method::Unit(TimeUnit::Min),
            "hour" => Method::Unit(TimeUnit::Hour),
            "day" => Method::Unit(TimeUnit::Day),
            _ => {
                let index = token.strip_prefix("append[")?.strip_suffix(']')?;
                return index.parse().ok().map(Method::AppendAt);
            }
        };
        Some(method)
    }

    pub(crate) fn is_arithmetic(self) -> bool {
        matches!(
            self,
            Method::Add | Method::Sub | Method::Mul | Method::Div | Method::Mod
        )
    }

    pub(crate) fn is_comparison(self) -> bool {
        matches!(
            self,
            Method::Eq | Method::Gt | Method::Lt | Method::Gte | Method::Lte
        )
    }

    pub(crate) fn name(self) -> String {
        let name = match self {
            Method::Add => "add",
            Method::Sub => "sub",
            Method::Mul => "mul",
            Method::Div => "div",
            Method::Mod => "mod",
            Method::Len => "len",
            Method::Eq => "eq",
            Method::Gt => "gt",
            Method::Lt => "lt",
            Method::Gte => "gte",
            Method::Lte => "lte",
            Method::Contains => "contains",
            Method::IndexOf => "indexOf",
            Method::KeyOf => "keyOf",
            Method::Last => "last",
            Method::SortAsc => "sortAsc",
            Method::SortDesc => "sortDesc",
            Method::Append => "append",
            Method::AppendAt(n) => return format!("*append[{}]", n),
            Method::Prepend => "prepend",
            Method::Delete => "delete",
            Method::Since => "since",
            Method::Until => "until",
            Method::Unit(TimeUnit::Ms) => "ms",
            Method::Unit(TimeUnit::Sec) => "sec",
            Method::Unit(TimeUnit::Min) => "min",
            Method::Unit(TimeUnit::Hour) => "hour",
            Method::Unit(TimeUnit::Day) => "day",
        };
        format!("*{}", name)
    }
}

/// One path segment after the item name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Method(Method),
    /// Array index (`N`), slice (`N:M`), map key or object member
    Key(String),
}

impl Segment {
    pub(crate) fn label(&self) -> String {
        match self {
            Segment::Method(m) => m.name(),
            Segment::Key(k) => k.clone(),
        }
    }
}

/// Parsed query key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueryKey {
    pub item: String,
    pub segments: Vec<Segment>,
}

impl QueryKey {
    pub(crate) fn parse(raw: &str) -> Result<Self, DbError> {
        let mut parts = raw.split('.');
        let item = parts.next().unwrap_or_default();
        if item.is_empty() || item.starts_with('*') {
            return Err(DbError::SchemaInvalid(format!(
                "query '{}' does not start with an item name",
                raw
            )));
        }

        let segments = parts
            .map(|part| {
                if part.is_empty() {
                    return Err(DbError::SchemaInvalid(format!(
                        "query '{}' has an empty segment",
                        raw
                    )));
                }
                match part.strip_prefix('*') {
                    Some(token) => {
                        Method::parse(token)
                            .map(Segment::Method)
                            .ok_or_else(|| DbError::InvalidMethod {
                                item: item.to_string(),
                                method: part.to_string(),
                            })
                    }
                    None => Ok(Segment::Key(part.to_string())),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            item: item.to_string(),
            segments,
        })
    }
}

/// Parses an array index token.
pub(crate) fn parse_index(token: &str) -> Option<usize> {
    token.parse().ok()
}

/// Parses an `N:M` slice token; either bound may be omitted.
pub(crate) fn parse_slice(token: &str, len: usize) -> Option<(usize, usize)> {
    let (from, to) = token.split_once(':')?;
    let from = if from.is_empty() { 0 } else { from.parse().ok()? };
    let to = if to.is_empty() { len } else { to.parse().ok()? };
    Some((from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_methods_and_keys() {
        let q = QueryKey::parse("mmr.*add.*mul").unwrap();
        assert_eq!(q.item, "mmr");
        assert_eq!(
            q.segments,
            vec![Segment::Method(Method::Add), Segment::Method(Method::Mul)]
        );

        let q = QueryKey::parse("friends.2.name").unwrap();
        assert_eq!(
            q.segments,
            vec![Segment::Key("2".into()), Segment::Key("name".into())]
        );

        let q = QueryKey::parse("arr.*append[2]").unwrap();
        assert_eq!(q.segments, vec![Segment::Method(Method::AppendAt(2))]);

        let q = QueryKey::parse("t.*since.*sec").unwrap();
        assert_eq!(
            q.segments,
            vec![
                Segment::Method(Method::Since),
                Segment::Method(Method::Unit(TimeUnit::Sec))
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            QueryKey::parse("").unwrap_err(),
            DbError::SchemaInvalid(_)
        ));
        assert!(matches!(
            QueryKey::parse("a..b").unwrap_err(),
            DbError::SchemaInvalid(_)
        ));
        assert!(matches!(
            QueryKey::parse("a.*frobnicate").unwrap_err(),
            DbError::InvalidMethod { .. }
        ));
        assert!(matches!(
            QueryKey::parse("a.*append[x]").unwrap_err(),
            DbError::InvalidMethod { .. }
        ));
    }

    #[test]
    fn test_parse_slice_bounds() {
        assert_eq!(parse_slice("1:3", 5), Some((1, 3)));
        assert_eq!(parse_slice(":2", 5), Some((0, 2)));
        assert_eq!(parse_slice("2:", 5), Some((2, 5)));
        assert_eq!(parse_slice("2", 5), None);
    }
}
