use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One teaching period. Bounds are inclusive on both ends, so a boundary
/// minute belongs to the earlier slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTime {
    pub number: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SlotTime {
    pub fn start_label(&self) -> String {
        twelve_hour(self.start)
    }

    pub fn end_label(&self) -> String {
        twelve_hour(self.end)
    }
}

#[derive(Debug, Clone)]
pub struct SlotSchedule {
    slots: Vec<SlotTime>,
    offset: FixedOffset,
}

const CAMPUS_DAY: [(u8, (u32, u32), (u32, u32)); 9] = [
    (1, (9, 0), (9, 50)),
    (2, (9, 50), (10, 40)),
    (3, (10, 50), (11, 40)),
    (4, (11, 40), (12, 30)),
    (5, (12, 30), (13, 20)),
    (6, (13, 20), (14, 10)),
    (7, (14, 10), (15, 0)),
    (8, (15, 10), (16, 0)),
    (9, (16, 0), (16, 50)),
];

impl SlotSchedule {
    /// The nine-period campus day, in the campus's fixed UTC offset
    pub fn campus(utc_offset_minutes: i32) -> Self {
        let slots = CAMPUS_DAY
            .iter()
            .filter_map(|&(number, (sh, sm), (eh, em))| {
                Some(SlotTime {
                    number,
                    start: NaiveTime::from_hms_opt(sh, sm, 0)?,
                    end: NaiveTime::from_hms_opt(eh, em, 0)?,
                })
            })
            .collect();
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self { slots, offset }
    }

    pub fn slots(&self) -> &[SlotTime] {
        &self.slots
    }

    pub fn slot(&self, number: u8) -> Option<&SlotTime> {
        self.slots.iter().find(|s| s.number == number)
    }

    /// Compared at minute resolution, matching the "HH:MM" table
    pub fn slot_at(&self, time: NaiveTime) -> Option<u8> {
        let time = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0)?;
        self.slots
            .iter()
            .find(|s| s.start <= time && time <= s.end)
            .map(|s| s.number)
    }

    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local(now).date_naive()
    }

    pub fn current_slot(&self, now: DateTime<Utc>) -> Option<u8> {
        self.slot_at(self.local(now).time())
    }

    /// 1 = Monday ... 7 = Sunday
    pub fn day_of_week(date: NaiveDate) -> u8 {
        date.weekday().number_from_monday() as u8
    }
}

pub fn twelve_hour(time: NaiveTime) -> String {
    let formatted = time.format("%I:%M %p").to_string();
    formatted.trim_start_matches('0').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn finds_slots_with_inclusive_bounds() {
        let schedule = SlotSchedule::campus(330);
        assert_eq!(schedule.slot_at(hm(8, 59)), None);
        assert_eq!(schedule.slot_at(hm(9, 0)), Some(1));
        assert_eq!(schedule.slot_at(hm(9, 50)), Some(1));
        assert_eq!(schedule.slot_at(hm(9, 51)), Some(2));
        assert_eq!(schedule.slot_at(hm(10, 45)), None);
        assert_eq!(schedule.slot_at(hm(16, 50)), Some(9));
        assert_eq!(schedule.slot_at(hm(17, 0)), None);
    }

    #[test]
    fn seconds_inside_a_boundary_minute_stay_in_the_slot() {
        let schedule = SlotSchedule::campus(0);
        let t = NaiveTime::from_hms_opt(16, 50, 30).unwrap();
        assert_eq!(schedule.slot_at(t), Some(9));
    }

    #[test]
    fn current_slot_uses_campus_offset() {
        let schedule = SlotSchedule::campus(330);
        // 04:00 UTC is 09:30 IST
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 4, 0, 0).unwrap();
        assert_eq!(schedule.current_slot(now), Some(1));
        // 20:00 UTC on the 10th is already the 11th in IST
        let late = Utc.with_ymd_and_hms(2025, 3, 10, 20, 0, 0).unwrap();
        assert_eq!(schedule.today(late), NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
    }

    #[test]
    fn labels_use_twelve_hour_clock() {
        let schedule = SlotSchedule::campus(330);
        let slot = schedule.slot(5).unwrap();
        assert_eq!(slot.start_label(), "12:30 PM");
        assert_eq!(slot.end_label(), "1:20 PM");
        assert_eq!(schedule.slot(1).unwrap().start_label(), "9:00 AM");
    }

    #[test]
    fn weekdays_count_from_monday() {
        assert_eq!(SlotSchedule::day_of_week(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()), 1);
        assert_eq!(SlotSchedule::day_of_week(NaiveDate::from_ymd_opt(2025, 3, 16).unwrap()), 7);
    }
}
