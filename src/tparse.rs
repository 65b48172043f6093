use crate::utils::DynError;

pub const SECONDS_PER_DAY: f64 = 86400.0;

// Unix day number of the Gregorian epoch in Julian day numbers.
const JDN_UNIX_EPOCH: i64 = 2440588;

// Civil UTC date/time to seconds since the Unix epoch.
// Formula from https://en.wikipedia.org/wiki/Julian_day#Julian_day_number_calculation
// Leap seconds are not modelled; every day is exactly 86400 s.
pub fn civil_to_unix(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: f64) -> f64 {
    let (y, m) = if month <= 2 {
        (year - 1, month + 12)
    } else {
        (year, month)
    };

    let a = y / 100;
    let b = 2 - a + a / 4;

    let jdn = (365.25 * (y + 4716) as f64).floor() as i64
        + (30.6001 * (m + 1) as f64).floor() as i64
        + day as i64
        + b as i64
        - 1524;

    let days = jdn - JDN_UNIX_EPOCH;
    days as f64 * SECONDS_PER_DAY + hour as f64 * 3600.0 + minute as f64 * 60.0 + second
}

fn unix_to_tm(unix_seconds: f64) -> Result<libc::tm, DynError> {
    let clamped = unix_seconds.floor();
    if !clamped.is_finite() {
        return Err("non-finite timestamp".into());
    }
    let ts = (clamped as i64).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as libc::time_t;
    let mut tm_out = std::mem::MaybeUninit::<libc::tm>::uninit();
    let ptr = unsafe { libc::gmtime_r(&ts, tm_out.as_mut_ptr()) };
    if ptr.is_null() {
        return Err("gmtime_r failed while converting timestamp".into());
    }
    Ok(unsafe { tm_out.assume_init() })
}

// Format epoch seconds as UTYYYYMMDDTHH:MM:SS.mmm with millisecond rounding.
pub fn format_ut(unix_seconds: f64) -> Result<String, DynError> {
    let mut base = unix_seconds.floor();
    let mut millis = ((unix_seconds - base) * 1000.0).round() as i64;
    if millis >= 1000 {
        millis -= 1000;
        base += 1.0;
    }
    let tm = unix_to_tm(base)?;
    Ok(format!(
        "UT{:04}{:02}{:02}T{:02}:{:02}:{:02}.{:03}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec,
        millis
    ))
}

// YYYYMMDD tag of the UTC day containing the given instant.
pub fn day_tag(unix_seconds: f64) -> Result<String, DynError> {
    let tm = unix_to_tm(unix_seconds)?;
    Ok(format!(
        "{:04}{:02}{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday
    ))
}

// Start of the UTC day containing the given instant.
pub fn floor_day(unix_seconds: f64) -> f64 {
    (unix_seconds / SECONDS_PER_DAY).floor() * SECONDS_PER_DAY
}

// Parse a command-line time argument.
// Supports:
// - UTYYYYMMDDTHH[:MM[:SS.fff...]] (omitted trailing fields are zero)
// - floating-point seconds since the Unix epoch
// - +SS, +MM:SS, +HH:MM:SS offsets relative to `relative_to` (tend only)
pub fn parse_time_arg(raw: &str, relative_to: Option<f64>) -> Result<f64, DynError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty time argument".into());
    }
    if trimmed.starts_with("UT") {
        return parse_ut_string(trimmed);
    }
    if let Some(rest) = trimmed.strip_prefix('+') {
        let base = relative_to
            .ok_or("relative +offset times are only valid for tend (offset from tstart)")?;
        return Ok(base + parse_clock_offset(rest)?);
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| format!("unrecognised time '{trimmed}' (expected UT timestamp, epoch seconds, or +offset)").into())
}

fn parse_ut_string(raw: &str) -> Result<f64, DynError> {
    let rest = raw.strip_prefix("UT").ok_or("UT timestamp must start with 'UT'")?;
    let (date, clock) = rest
        .split_once('T')
        .ok_or("UT timestamp must contain a 'T' between date and time")?;
    if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid UT date '{date}' (expected YYYYMMDD)").into());
    }
    let year = date[0..4].parse::<i32>()?;
    let month = date[4..6].parse::<u32>()?;
    let day = date[6..8].parse::<u32>()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(format!("invalid UT date '{date}'").into());
    }

    let mut fields = clock.split(':');
    let hour = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or("UT timestamp needs at least an hour field after 'T'")?
        .parse::<u32>()?;
    let minute = match fields.next() {
        Some(s) => s.parse::<u32>()?,
        None => 0,
    };
    let second = match fields.next() {
        Some(s) => s.parse::<f64>()?,
        None => 0.0,
    };
    if fields.next().is_some() {
        return Err(format!("too many ':' fields in UT time '{clock}'").into());
    }
    if hour >= 24 || minute >= 60 || !(0.0..60.0).contains(&second) {
        return Err(format!("UT time-of-day '{clock}' out of range").into());
    }

    Ok(civil_to_unix(year, month, day, hour, minute, second))
}

// +SS.fff, +MM:SS.fff or +HH:MM:SS.fff (leading '+' already stripped).
fn parse_clock_offset(raw: &str) -> Result<f64, DynError> {
    let parts: Vec<&str> = raw.split(':').collect();
    let offset = match parts.len() {
        1 => parts[0].parse::<f64>()?,
        2 => {
            let m = parts[0].parse::<u32>()?;
            let s = parts[1].parse::<f64>()?;
            m as f64 * 60.0 + s
        }
        3 => {
            let h = parts[0].parse::<u32>()?;
            let m = parts[1].parse::<u32>()?;
            let s = parts[2].parse::<f64>()?;
            h as f64 * 3600.0 + m as f64 * 60.0 + s
        }
        _ => return Err(format!("invalid relative offset '+{raw}'").into()),
    };
    if !offset.is_finite() || offset < 0.0 {
        return Err(format!("relative offset '+{raw}' must be non-negative").into());
    }
    Ok(offset)
}

// HH:MM:SS[.fff...] time-of-day, as carried in timing-file names.
pub fn parse_time_of_day(raw: &str) -> Result<f64, DynError> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("invalid time-of-day '{raw}' (expected HH:MM:SS)").into());
    }
    let hour = parts[0].parse::<u32>()?;
    let minute = parts[1].parse::<u32>()?;
    let second = parts[2].parse::<f64>()?;
    if hour >= 24 || minute >= 60 || !(0.0..60.0).contains(&second) {
        return Err(format!("time-of-day '{raw}' out of range").into());
    }
    Ok(hour as f64 * 3600.0 + minute as f64 * 60.0 + second)
}
