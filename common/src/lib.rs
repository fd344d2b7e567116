use std::collections::BTreeMap;

use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};
use serde::{Deserialize, Deserializer, Serialize};

/// One hosting account as reported by the inventory listing.
///
/// Owned by the inventory collaborator; the backup core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub user: String,
    pub partition: String,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub suspended: bool,
    #[serde(default)]
    pub uid: u32,
}

/// Hosting panels report the suspended flag as 0/1 rather than a boolean.
fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

/// Group accounts by partition, preserving a stable partition order.
pub fn group_by_partition(accounts: Vec<Account>) -> BTreeMap<String, Vec<Account>> {
    let mut grouped: BTreeMap<String, Vec<Account>> = BTreeMap::new();
    for account in accounts {
        grouped
            .entry(account.partition.clone())
            .or_default()
            .push(account);
    }
    grouped
}

/// Date anchor for one backup run.
///
/// Captured once at process start so every path computed during the run is
/// mutually consistent even when the run crosses midnight.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    started: NaiveDate,
}

impl RunContext {
    pub fn capture() -> Self {
        Self {
            started: Local::now().date_naive(),
        }
    }

    pub fn starting(date: NaiveDate) -> Self {
        Self { started: date }
    }

    pub fn date(&self) -> NaiveDate {
        self.started
    }

    /// The run date as `YYYY-MM-DD`.
    pub fn today(&self) -> String {
        self.started.format("%Y-%m-%d").to_string()
    }

    /// The date `days` before the run date as `YYYY-MM-DD`.
    pub fn days_back(&self, days: u64) -> String {
        (self.started - Duration::days(days as i64))
            .format("%Y-%m-%d")
            .to_string()
    }

    pub fn is_sunday(&self) -> bool {
        self.started.weekday() == Weekday::Sun
    }

    pub fn day_of_month(&self) -> u32 {
        self.started.day()
    }
}

/// Age and safety-floor policy for one snapshot tier.
///
/// A tier whose candidate count is at or below `min_count` is never cleaned,
/// regardless of age. `age_limit_days = -1` marks every generation as
/// eligible and `min_count = -1` disables the floor (the staging tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionTier {
    pub age_limit_days: i64,
    pub min_count: i64,
}

impl RetentionTier {
    pub const REMOVE_ALL: RetentionTier = RetentionTier {
        age_limit_days: -1,
        min_count: -1,
    };

    pub const fn new(age_limit_days: i64, min_count: i64) -> Self {
        Self {
            age_limit_days,
            min_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_suspended_accepts_int_and_bool() {
        let from_int: Account =
            serde_json::from_str(r#"{"user":"bob","partition":"home","suspended":1,"uid":1001}"#)
                .unwrap();
        assert!(from_int.suspended);

        let from_bool: Account = serde_json::from_str(
            r#"{"user":"bob","partition":"home","suspended":false,"uid":1001}"#,
        )
        .unwrap();
        assert!(!from_bool.suspended);

        let missing: Account =
            serde_json::from_str(r#"{"user":"bob","partition":"home"}"#).unwrap();
        assert!(!missing.suspended);
        assert_eq!(missing.uid, 0);
    }

    #[test]
    fn test_group_by_partition() {
        let accounts = vec![
            Account {
                user: "a".into(),
                partition: "home2".into(),
                suspended: false,
                uid: 1,
            },
            Account {
                user: "b".into(),
                partition: "home".into(),
                suspended: false,
                uid: 2,
            },
            Account {
                user: "c".into(),
                partition: "home2".into(),
                suspended: true,
                uid: 3,
            },
        ];

        let grouped = group_by_partition(accounts);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["home"].len(), 1);
        assert_eq!(grouped["home2"].len(), 2);
        assert_eq!(grouped["home2"][1].user, "c");
    }

    #[test]
    fn test_run_context_dates() {
        let ctx = RunContext::starting(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(ctx.today(), "2024-03-01");
        assert_eq!(ctx.days_back(1), "2024-02-29");
        assert_eq!(ctx.days_back(9), "2024-02-21");
        assert_eq!(ctx.day_of_month(), 1);
    }

    #[test]
    fn test_run_context_is_stable() {
        let ctx = RunContext::capture();
        assert_eq!(ctx.today(), ctx.today());
    }
}
