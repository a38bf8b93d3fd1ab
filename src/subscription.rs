use std::collections::BTreeSet;
use std::fmt;

/// What the remote feed should push. The key is compared by normalized value,
/// so semantically-unchanged inputs (bbox drift below the rounding precision,
/// reordered topic lists) do not tear down the connection.
#[derive(Debug, Clone)]
pub enum SubscriptionParams {
    /// Geographic bounding box, used by the location feed.
    Bounds(BoundingBox),
    /// Topic filter set, used by the message feed.
    Topics(TopicFilter),
}

impl SubscriptionParams {
    pub fn bounds(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        SubscriptionParams::Bounds(BoundingBox {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SubscriptionParams::Topics(TopicFilter::new(topics))
    }

    /// Normalized identity of this subscription. Two keys with equal output
    /// here describe the same remote feed.
    pub fn stable_key(&self) -> String {
        match self {
            SubscriptionParams::Bounds(b) => format!("bbox:{}", b.stable_key()),
            SubscriptionParams::Topics(t) => format!("topics:{}", t.stable_key()),
        }
    }

    /// Form fields for the bind request.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            SubscriptionParams::Bounds(b) => vec![("bbox", b.stable_key())],
            SubscriptionParams::Topics(t) => vec![("topics", t.stable_key())],
        }
    }
}

impl PartialEq for SubscriptionParams {
    fn eq(&self, other: &Self) -> bool {
        self.stable_key() == other.stable_key()
    }
}

impl Eq for SubscriptionParams {}

impl fmt::Display for SubscriptionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stable_key())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Rounding precision for the stable key, in decimal places. Four places
    /// is roughly 11 m at the equator; pans below that do not reconnect.
    pub const PRECISION: usize = 4;

    pub fn stable_key(&self) -> String {
        format!(
            "{:.p$},{:.p$},{:.p$},{:.p$}",
            self.min_lat,
            self.min_lon,
            self.max_lat,
            self.max_lon,
            p = Self::PRECISION
        )
    }
}

/// Sorted, deduplicated topic names.
#[derive(Debug, Clone, Default)]
pub struct TopicFilter(BTreeSet<String>);

impl TopicFilter {
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            topics
                .into_iter()
                .map(|t| t.into().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    pub fn stable_key(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(",")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
