use chrono::{NaiveTime, Timelike};

use crate::storage::models::{MealType, Shift};

/// Pure time-window arithmetic. All functions are deterministic in their
/// inputs; `now` is always injected, never read from a global clock.
pub struct ScheduleClock;

impl ScheduleClock {
    /// Whether `now` falls inside the meal's serving window, tolerance
    /// included. Tolerance only extends the window forward; meal windows
    /// never wrap midnight in this domain.
    ///
    /// Windows are configured at minute granularity but compared at second
    /// granularity, so 13:14:59 is inside a window ending 13:15 and
    /// 13:15:01 is not.
    pub fn within_meal_window(now: NaiveTime, meal: &MealType) -> bool {
        let now_sec = now.num_seconds_from_midnight();
        let start_sec = meal.start_min * 60;
        let end_sec = (meal.end_min + meal.tolerance_min) * 60;

        start_sec <= now_sec && now_sec <= end_sec
    }

    /// Whether `now` falls inside the holder's shift window. A shift whose
    /// end precedes its start wraps midnight (night shifts).
    pub fn within_shift_window(now: NaiveTime, shift: &Shift) -> bool {
        let now_sec = now.num_seconds_from_midnight();
        let start_sec = shift.start_min * 60;
        let end_sec = shift.end_min * 60;

        if end_sec < start_sec {
            now_sec >= start_sec || now_sec <= end_sec
        } else {
            start_sec <= now_sec && now_sec <= end_sec
        }
    }
}
