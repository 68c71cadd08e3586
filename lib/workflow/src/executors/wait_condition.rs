use crate::action::{ActionKind, ActionNode};
use crate::executor::{ActionError, ActionExecutor, ActionOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, Utc};
use keel_entity::{Actor, Entity};
use serde_json::Value;

/// Unit of a wait interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl WaitUnit {
    /// Accepts a unit name (`"day"`, `"days"`) or a stored numeric code
    /// (1 = minute through 6 = year).
    #[must_use]
    pub fn from_param(value: &Value) -> Option<Self> {
        let code = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => match s.trim().to_ascii_lowercase().trim_end_matches('s') {
                "minute" => return Some(Self::Minute),
                "hour" => return Some(Self::Hour),
                "day" => return Some(Self::Day),
                "week" => return Some(Self::Week),
                "month" => return Some(Self::Month),
                "year" => return Some(Self::Year),
                other => other.parse().ok(),
            },
            _ => None,
        };
        match code? {
            1 => Some(Self::Minute),
            2 => Some(Self::Hour),
            3 => Some(Self::Day),
            4 => Some(Self::Week),
            5 => Some(Self::Month),
            6 => Some(Self::Year),
            _ => None,
        }
    }

    fn add(self, from: DateTime<Utc>, interval: u32) -> Option<DateTime<Utc>> {
        let n = i64::from(interval);
        match self {
            Self::Minute => from.checked_add_signed(Duration::try_minutes(n)?),
            Self::Hour => from.checked_add_signed(Duration::try_hours(n)?),
            Self::Day => from.checked_add_signed(Duration::try_days(n)?),
            Self::Week => from.checked_add_signed(Duration::try_weeks(n)?),
            Self::Month => from.checked_add_months(Months::new(interval)),
            Self::Year => from.checked_add_months(Months::new(interval.checked_mul(12)?)),
        }
    }
}

/// Computes when a wait action's branch should resume.
///
/// Params: `when_interval` and `when_unit`. A missing or zero interval resumes
/// at `now`, which the next scheduler poll picks up.
///
/// # Errors
///
/// Returns `InvalidParams` for negative or non-numeric intervals, unknown
/// units, or results out of range.
pub fn resume_at(action: &ActionNode, now: DateTime<Utc>) -> Result<DateTime<Utc>, ActionError> {
    let kind = ActionKind::WaitCondition;
    let interval = match action.param("when_interval") {
        None | Some(Value::Null) => 0,
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| ActionError::invalid(kind, "when_interval must be a whole number"))?,
        Some(Value::String(s)) if s.trim().is_empty() => 0,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| ActionError::invalid(kind, format!("bad when_interval: {s}")))?,
        Some(other) => {
            return Err(ActionError::invalid(kind, format!("bad when_interval: {other}")));
        }
    };
    if interval == 0 {
        return Ok(now);
    }
    let interval = u32::try_from(interval)
        .map_err(|_| ActionError::invalid(kind, format!("when_interval out of range: {interval}")))?;

    let unit = action
        .param("when_unit")
        .and_then(WaitUnit::from_param)
        .ok_or_else(|| ActionError::invalid(kind, "missing or unknown when_unit"))?;
    unit.add(now, interval)
        .ok_or_else(|| ActionError::invalid(kind, "resume time out of range"))
}

/// Pauses the branch. The engine persists the continuation and the scheduler
/// later runs the children.
pub struct WaitConditionExecutor;

#[async_trait]
impl ActionExecutor for WaitConditionExecutor {
    async fn execute(
        &self,
        action: &ActionNode,
        _entity: &mut Entity,
        _actor: &Actor,
    ) -> Result<ActionOutcome, ActionError> {
        let resume_at = resume_at(action, Utc::now())?;
        Ok(ActionOutcome::Wait { resume_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::services;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 31, 9, 0, 0).unwrap()
    }

    #[test]
    fn units_by_name_and_code() {
        assert_eq!(WaitUnit::from_param(&json!(3)), Some(WaitUnit::Day));
        assert_eq!(WaitUnit::from_param(&json!("3")), Some(WaitUnit::Day));
        assert_eq!(WaitUnit::from_param(&json!("Weeks")), Some(WaitUnit::Week));
        assert_eq!(WaitUnit::from_param(&json!("hour")), Some(WaitUnit::Hour));
        assert_eq!(WaitUnit::from_param(&json!(7)), None);
        assert_eq!(WaitUnit::from_param(&json!("fortnight")), None);
    }

    #[test]
    fn computes_resume_time() {
        let (fx, _) = services();
        let wait = |interval: Value, unit: Value| {
            fx.action(ActionKind::WaitCondition)
                .with_param("when_interval", interval)
                .with_param("when_unit", unit)
        };

        assert_eq!(
            resume_at(&wait(json!(2), json!("day")), now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap()
        );
        assert_eq!(
            resume_at(&wait(json!("90"), json!(1)), now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 31, 10, 30, 0).unwrap()
        );
        // Month arithmetic clamps to the end of the shorter month.
        assert_eq!(
            resume_at(&wait(json!(1), json!("month")), now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 2, 28, 9, 0, 0).unwrap()
        );
        assert_eq!(
            resume_at(&wait(json!(1), json!(6)), now()).unwrap(),
            Utc.with_ymd_and_hms(2027, 1, 31, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn zero_or_missing_interval_resumes_now() {
        let (fx, _) = services();
        let bare = fx.action(ActionKind::WaitCondition);
        assert_eq!(resume_at(&bare, now()).unwrap(), now());
        let zero = bare.clone().with_param("when_interval", 0);
        assert_eq!(resume_at(&zero, now()).unwrap(), now());
    }

    #[test]
    fn rejects_bad_params() {
        let (fx, _) = services();
        let negative = fx
            .action(ActionKind::WaitCondition)
            .with_param("when_interval", -1)
            .with_param("when_unit", "day");
        assert!(resume_at(&negative, now()).is_err());

        let no_unit = fx
            .action(ActionKind::WaitCondition)
            .with_param("when_interval", 1);
        assert!(resume_at(&no_unit, now()).is_err());
    }

    #[tokio::test]
    async fn executor_waits() {
        let (fx, _) = services();
        let mut task = fx.task();
        let action = fx
            .action(ActionKind::WaitCondition)
            .with_param("when_interval", 1)
            .with_param("when_unit", "hour");
        let before = Utc::now();
        let outcome = WaitConditionExecutor
            .execute(&action, &mut task, &fx.actor)
            .await
            .unwrap();
        let ActionOutcome::Wait { resume_at } = outcome else {
            panic!("expected wait, got {outcome:?}");
        };
        assert!(resume_at >= before + Duration::hours(1));
    }
}
