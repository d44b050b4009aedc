// Packed MS-DOS date/time handling.
// date: bits 15-9 year since 1980, bits 8-5 month, bits 4-0 day
// time: bits 15-11 hours, bits 10-5 minutes, bits 4-0 seconds/2

use chrono::{Datelike, NaiveDate, TimeZone, Timelike, Utc};

/// Convert a packed FAT date/time pair to Unix seconds (UTC). Impossible
/// field combinations decode to the epoch.
pub fn fat_datetime_to_unix(date: u16, time: u16) -> i64 {
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;

    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    match NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
    {
        Some(dt) => dt.and_utc().timestamp(),
        None => 0,
    }
}

/// Convert a packed FAT date (no time component) to Unix seconds.
pub fn fat_date_to_unix(date: u16) -> i64 {
    fat_datetime_to_unix(date, 0)
}

/// Convert Unix seconds to a packed FAT (date, time) pair. Years are
/// clamped to the representable 1980..=2107 range.
pub fn unix_to_fat_datetime(timestamp: i64) -> (u16, u16) {
    let datetime = match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt,
        _ => return (0, 0),
    };

    let year = datetime.year();
    let fat_year = if year < 1980 {
        0
    } else if year > 2107 {
        127
    } else {
        (year - 1980) as u16
    };

    let fat_date = (fat_year << 9) | ((datetime.month() as u16) << 5) | datetime.day() as u16;
    let fat_time = ((datetime.hour() as u16) << 11)
        | ((datetime.minute() as u16) << 5)
        | (datetime.second() as u16 / 2);

    (fat_date, fat_time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_even_second() {
        // 2024-01-15 14:30:00 UTC
        let timestamp = 1_705_329_000;
        let (date, time) = unix_to_fat_datetime(timestamp);
        assert_eq!(fat_datetime_to_unix(date, time), timestamp);
    }

    #[test]
    fn test_odd_second_floors() {
        let (date, time) = unix_to_fat_datetime(1_705_329_001);
        assert_eq!(fat_datetime_to_unix(date, time), 1_705_329_000);
    }

    #[test]
    fn test_epoch_start() {
        // 1980-01-01 packs as year 0, month 1, day 1
        let (date, time) = unix_to_fat_datetime(315_532_800);
        assert_eq!(date, (1 << 5) | 1);
        assert_eq!(time, 0);
        assert_eq!(fat_datetime_to_unix(date, time), 315_532_800);
    }

    #[test]
    fn test_pre_1980_clamps_to_year_zero() {
        let (date, _) = unix_to_fat_datetime(0);
        assert_eq!(date >> 9, 0);
    }

    #[test]
    fn test_invalid_fields_decode_to_zero() {
        // month 0 cannot exist
        assert_eq!(fat_datetime_to_unix(0, 0), 0);
    }

    #[test]
    fn test_date_only() {
        let (date, _) = unix_to_fat_datetime(1_705_329_000);
        // midnight of the same day
        assert_eq!(fat_date_to_unix(date) % 86_400, 0);
    }
}
