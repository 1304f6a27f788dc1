use std::convert::TryInto;

use time::PrimitiveDateTime;

/// Decodes the packed 16-bit DOS date and time fields from a file entry.
/// Returns `None` for bit patterns that don't name a real date/time.
pub fn datetime_from_bits(date: u16, time: u16) -> Option<PrimitiveDateTime> {
    let year = (date >> 9) as i32 + 1980;
    let month = (((date >> 5) & 0xf) as u8).try_into().ok()?;
    let day = (date & 0x1f) as u8;
    let date = time::Date::from_calendar_date(year, month, day).ok()?;

    let hour = (time >> 11) as u8;
    let minute = ((time >> 5) & 0x3f) as u8;
    let second = 2 * (time & 0x1f) as u8;
    let time = time::Time::from_hms(hour, minute, second).ok()?;

    Some(PrimitiveDateTime::new(date, time))
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::datetime_from_bits;

    #[test]
    fn valid_datetime_bits() {
        let dt = datetime!(2018-01-06 15:19:42);
        assert_eq!(datetime_from_bits(0x4c26, 0x7a75), Some(dt));
    }

    #[test]
    fn datetime_range_limits() {
        // 1980-01-01 00:00:00 is the earliest representable instant.
        let dt = datetime!(1980-01-01 0:00:00);
        assert_eq!(datetime_from_bits(0x0021, 0x0000), Some(dt));

        // 2107-12-31 23:59:58 is the latest.
        let dt = datetime!(2107-12-31 23:59:58);
        assert_eq!(datetime_from_bits(0xff9f, 0xbf7d), Some(dt));
    }

    #[test]
    fn invalid_datetime_bits() {
        // Month 0 and hour 31 are not real dates/times.
        assert_eq!(datetime_from_bits(0x0001, 0x0000), None);
        assert_eq!(datetime_from_bits(0x0021, 0xffff), None);
    }
}
