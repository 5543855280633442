//! Relative date presets (`today`, `this_month`, `this_year`).

use serde_json::{Value, json};
use time::macros::format_description;
use time::util::days_in_year_month;
use time::{Date, Month};

use super::node::FilterOp;

/// Inclusive `[low, high]` bounds for a preset relative to `today`.
///
/// The upper bound carries an end-of-day time so it also covers datetime
/// values stored on that day.
pub fn preset_bounds(op: FilterOp, today: Date) -> Option<(Value, Value)> {
    let (start, end) = match op {
        FilterOp::Today => (today, today),
        FilterOp::ThisMonth => {
            let start = Date::from_calendar_date(today.year(), today.month(), 1).ok()?;
            let last = days_in_year_month(today.year(), today.month());
            (start, Date::from_calendar_date(today.year(), today.month(), last).ok()?)
        }
        FilterOp::ThisYear => (
            Date::from_calendar_date(today.year(), Month::January, 1).ok()?,
            Date::from_calendar_date(today.year(), Month::December, 31).ok()?,
        ),
        _ => return None,
    };
    let format = format_description!("[year]-[month]-[day]");
    let start = start.format(format).ok()?;
    let end = end.format(format).ok()?;
    Some((json!(start), json!(format!("{end}T23:59:59.999999Z"))))
}
