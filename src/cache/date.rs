//! HTTP-date parsing and formatting (RFC 9110 §5.6.7).

use time::{
    OffsetDateTime, PrimitiveDateTime, UtcOffset, format_description::FormatItem,
    macros::format_description,
};

/// `Sun, 06 Nov 1994 08:49:37 GMT`
const IMF_FIXDATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// `Sun Nov  6 08:49:37 1994`
const ASCTIME: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
);

/// Parses an HTTP date in IMF-fixdate or asctime form.
///
/// Returns `None` for anything else, including dates whose weekday does not
/// match the calendar date.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    [IMF_FIXDATE, ASCTIME]
        .into_iter()
        .find_map(|format| PrimitiveDateTime::parse(value, format).ok())
        .map(PrimitiveDateTime::assume_utc)
}

/// Formats a timestamp as an IMF-fixdate.
pub fn format_http_date(at: OffsetDateTime) -> Option<String> {
    at.to_offset(UtcOffset::UTC).format(IMF_FIXDATE).ok()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn imf_fixdate() {
        assert_eq!(
            parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"),
            Some(datetime!(1994-11-06 08:49:37 UTC))
        );
    }

    #[test]
    fn asctime() {
        assert_eq!(
            parse_http_date("Sun Nov  6 08:49:37 1994"),
            Some(datetime!(1994-11-06 08:49:37 UTC))
        );
    }

    #[test]
    fn rejects_garbage() {
        for value in ["", "0", "-1", "tomorrow", "Sun, 06 Nov 1994 08:49:37 PST"] {
            assert_eq!(parse_http_date(value), None, "{value}");
        }
    }

    #[test]
    fn format_roundtrip() {
        let at = datetime!(2015-10-21 07:28:00 UTC);
        let text = format_http_date(at).unwrap();
        assert_eq!(text, "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_http_date(&text), Some(at));
    }
}
