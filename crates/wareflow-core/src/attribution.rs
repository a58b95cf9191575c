//! Last-touch traffic attribution

use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// Traffic source key of the `Unknown` row in `dim_traffic_source`
pub const UNKNOWN_TRAFFIC_SOURCE_KEY: i64 = -1;

/// An active referral, keyed by the business keys its version is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Referral {
    pub surrogate_key: i64,
    pub user_id: i64,
    pub source_id: i64,
    pub referred_at: NaiveDateTime,
    pub campaign_code: Option<String>,
}

impl Referral {
    fn outranks(&self, other: &Referral) -> bool {
        (self.referred_at, self.surrogate_key) > (other.referred_at, other.surrogate_key)
    }
}

/// Latest referral per user id
///
/// The greatest `referred_at` wins; among equal timestamps the highest
/// surrogate key wins.
pub fn latest_referrals<I>(referrals: I) -> BTreeMap<i64, Referral>
where
    I: IntoIterator<Item = Referral>,
{
    let mut latest: BTreeMap<i64, Referral> = BTreeMap::new();
    for referral in referrals {
        match latest.get(&referral.user_id) {
            Some(current) if !referral.outranks(current) => {}
            _ => {
                latest.insert(referral.user_id, referral);
            }
        }
    }
    latest
}
