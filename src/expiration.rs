//! Expiration policies and expiration-extending rules (GLOSSARY).

use std::time::{Duration, SystemTime};

/// How long an entry should live, as supplied by a caller at `store` time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpirationPolicy {
    Never,
    Seconds(Duration),
    Days(u32),
    Date(SystemTime),
    Expired,
}

impl ExpirationPolicy {
    /// Resolve to an absolute instant given `now`. `None` means "never expires".
    pub fn estimated_expiration(self, now: SystemTime) -> Option<SystemTime> {
        match self {
            Self::Never => None,
            Self::Seconds(d) => Some(now + d),
            Self::Days(d) => Some(now + Duration::from_secs(u64::from(d) * 24 * 60 * 60)),
            Self::Date(t) => Some(t),
            Self::Expired => Some(SystemTime::UNIX_EPOCH),
        }
    }

    /// True if this policy, resolved against `now`, is already in the past.
    pub fn is_already_past(self, now: SystemTime) -> bool {
        match self.estimated_expiration(now) {
            Some(t) => t <= now,
            None => false,
        }
    }

    pub fn original_ttl(self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Seconds(d) => Some(d),
            Self::Days(d) => Some(Duration::from_secs(u64::from(d) * 24 * 60 * 60)),
            Self::Date(_) | Self::Expired => None,
        }
    }
}

/// Controls whether/how a read refreshes an entry's TTL (spec §4.1/§4.2).
#[derive(Clone, Copy, Debug, Default)]
pub enum ExpirationExtending {
    #[default]
    None,
    CacheTime,
    Expiration(ExpirationPolicy),
}

/// Integer proxy for memory footprint, aggregated against a memory-store limit
/// (spec §3: "pixel-count-equivalent").
pub trait CacheCost {
    fn cache_cost(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_has_no_estimated_expiration() {
        assert_eq!(ExpirationPolicy::Never.estimated_expiration(SystemTime::now()), None);
    }

    #[test]
    fn expired_policy_is_always_past() {
        assert!(ExpirationPolicy::Expired.is_already_past(SystemTime::now()));
    }

    #[test]
    fn seconds_policy_resolves_relative_to_now() {
        let now = SystemTime::UNIX_EPOCH;
        let policy = ExpirationPolicy::Seconds(Duration::from_secs(60));
        assert_eq!(
            policy.estimated_expiration(now),
            Some(now + Duration::from_secs(60))
        );
        assert!(!policy.is_already_past(now));
    }
}
