//! Subdevice specifications — which daughterboard frontends feed which
//! channels, in channel order.
//!
//! Markup form: whitespace-separated `db:sd` pairs, e.g. `"A:0 B:0"`.
//! A pair without a colon names the daughterboard only.

use std::fmt;
use std::str::FromStr;

/// Stream direction relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Rx,
    Tx,
}

impl Direction {
    /// Lowercase name used in property paths.
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (daughterboard, subdevice) entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubdevPair {
    pub db_name: String,
    pub sd_name: String,
}

impl SubdevPair {
    pub fn new(db_name: impl Into<String>, sd_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            sd_name: sd_name.into(),
        }
    }
}

impl fmt::Display for SubdevPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.db_name, self.sd_name)
    }
}

/// Ordered channel-to-frontend specification. Position is the channel
/// index within one mainboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubdevSpec(Vec<SubdevPair>);

impl SubdevSpec {
    pub fn new(pairs: Vec<SubdevPair>) -> Self {
        Self(pairs)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SubdevPair> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubdevPair> {
        self.0.iter()
    }

    pub fn pairs(&self) -> &[SubdevPair] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a SubdevSpec {
    type Item = &'a SubdevPair;
    type IntoIter = std::slice::Iter<'a, SubdevPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid subdev markup: {0:?}")]
pub struct SubdevParseError(pub String);

impl FromStr for SubdevSpec {
    type Err = SubdevParseError;

    fn from_str(markup: &str) -> Result<Self, Self::Err> {
        let mut pairs = Vec::new();
        for token in markup.split_whitespace() {
            let (db, sd) = token.split_once(':').unwrap_or((token, ""));
            if db.is_empty() || sd.contains(':') {
                return Err(SubdevParseError(token.to_string()));
            }
            pairs.push(SubdevPair::new(db, sd));
        }
        Ok(SubdevSpec(pairs))
    }
}

impl fmt::Display for SubdevSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{pair}")?;
        }
        Ok(())
    }
}
