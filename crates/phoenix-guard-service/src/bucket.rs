//! Rate-limit buckets: named quota policies per request surface.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// Logical request surface with its own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Contact-form submissions.
    Contact,
    /// Generic API calls.
    Api,
    /// Analytics ingestion.
    Analytics,
    /// Sensitive operations.
    Strict,
}

pub const ALL_BUCKETS: [Bucket; 4] = [
    Bucket::Contact,
    Bucket::Api,
    Bucket::Analytics,
    Bucket::Strict,
];

impl Bucket {
    pub fn label(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Api => "api",
            Self::Analytics => "analytics",
            Self::Strict => "strict",
        }
    }

    /// The stock policy for this bucket.
    pub fn default_policy(self) -> BucketPolicy {
        let (limit, window_secs) = match self {
            Self::Contact => (3, 60 * 60),
            Self::Api => (100, 60),
            Self::Analytics => (1000, 60 * 60),
            Self::Strict => (10, 10 * 60),
        };
        BucketPolicy::new(self, limit, Duration::from_secs(window_secs))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_BUCKETS
            .into_iter()
            .find(|b| b.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown rate-limit bucket '{s}'"))
    }
}

/// Maximum request count per rolling window for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketPolicy {
    bucket: Bucket,
    limit: u64,
    window: Duration,
}

impl BucketPolicy {
    pub const fn new(bucket: Bucket, limit: u64, window: Duration) -> Self {
        Self {
            bucket,
            limit,
            window,
        }
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// One policy per bucket. Built once at start-up and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketTable {
    contact: BucketPolicy,
    api: BucketPolicy,
    analytics: BucketPolicy,
    strict: BucketPolicy,
}

impl Default for BucketTable {
    fn default() -> Self {
        Self {
            contact: Bucket::Contact.default_policy(),
            api: Bucket::Api.default_policy(),
            analytics: Bucket::Analytics.default_policy(),
            strict: Bucket::Strict.default_policy(),
        }
    }
}

impl BucketTable {
    pub fn get(&self, bucket: Bucket) -> BucketPolicy {
        match bucket {
            Bucket::Contact => self.contact,
            Bucket::Api => self.api,
            Bucket::Analytics => self.analytics,
            Bucket::Strict => self.strict,
        }
    }

    /// Replaces the policy for `bucket`.
    #[must_use]
    pub fn with_policy(mut self, bucket: Bucket, limit: u64, window: Duration) -> Self {
        let policy = BucketPolicy::new(bucket, limit, window);
        match bucket {
            Bucket::Contact => self.contact = policy,
            Bucket::Api => self.api = policy,
            Bucket::Analytics => self.analytics = policy,
            Bucket::Strict => self.strict = policy,
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = BucketPolicy> + '_ {
        ALL_BUCKETS.into_iter().map(|b| self.get(b))
    }
}
