//! Age/usage eligibility decision (pure, no I/O)

use crate::snapshot::RoleIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityReason {
    TooNew,
    NeverUsed,
    UsedRecently,
    AgedAndIdle,
}

impl fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::TooNew => "too new",
            Self::NeverUsed => "never used",
            Self::UsedRecently => "used recently",
            Self::AgedAndIdle => "aged and idle",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EligibilityVerdict {
    pub eligible: bool,
    pub reason: EligibilityReason,
    pub age_days: i64,
    pub idle_days: Option<i64>,
}

impl fmt::Display for EligibilityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.eligible {
            "eligible"
        } else {
            "not eligible"
        };
        write!(f, "{verdict} ({}; age {} days", self.reason, self.age_days)?;
        if let Some(idle) = self.idle_days {
            write!(f, ", idle {idle} days")?;
        }
        f.write_str(")")
    }
}

/// Decide whether a role may be decommissioned.
///
/// Age is necessary but not sufficient: an old role that was used within the
/// threshold stays. Day counts truncate toward zero.
pub fn evaluate(role: &RoleIdentity, threshold_days: i64, now: DateTime<Utc>) -> EligibilityVerdict {
    let age_days = (now - role.created_at).num_days();

    if age_days <= threshold_days {
        return EligibilityVerdict {
            eligible: false,
            reason: EligibilityReason::TooNew,
            age_days,
            idle_days: None,
        };
    }

    let Some(last_used_at) = role.last_used_at else {
        return EligibilityVerdict {
            eligible: true,
            reason: EligibilityReason::NeverUsed,
            age_days,
            idle_days: None,
        };
    };

    let idle_days = (now - last_used_at).num_days();
    let (eligible, reason) = if idle_days < threshold_days {
        (false, EligibilityReason::UsedRecently)
    } else {
        (true, EligibilityReason::AgedAndIdle)
    };
    EligibilityVerdict {
        eligible,
        reason,
        age_days,
        idle_days: Some(idle_days),
    }
}
