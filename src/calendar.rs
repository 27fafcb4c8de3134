use crate::error::{Error, Result};
use crate::geocode::GeoPoint;
use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use ical::generator::Emitter;
use ical::parser::ical::component::{IcalCalendar, IcalEvent};
use ical::property::Property;
use ical::IcalParser;
use std::fs;
use std::io::{BufReader, Cursor, ErrorKind};
use std::path::Path;
use tracing::warn;

const PRODID: &str = "-//wodz_ics//wodz.app bookings//EN";
const UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const LOCAL_FORMAT: &str = "%Y%m%dT%H%M%S";
const DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub uid: String,
    pub summary: String,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub location: Option<String>,
    pub comment: Option<String>,
    pub geo: Option<GeoPoint>,
    pub stamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calendar {
    pub events: Vec<CalendarEvent>,
}

impl Calendar {
    pub fn new() -> Calendar {
        Calendar::default()
    }

    /// `Ok(None)` when there is no file at `path`.
    pub fn read_from(path: &Path, tz: Tz) -> Result<Option<Calendar>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Calendar::from_ics(&text, tz).map(Some)
    }

    /// Parse ICS text. Times without an explicit zone are read in `tz`.
    pub fn from_ics(text: &str, tz: Tz) -> Result<Calendar> {
        let reader = BufReader::new(Cursor::new(text.as_bytes()));
        let parser = IcalParser::new(reader);

        let mut events = Vec::new();
        for calendar in parser {
            let calendar = calendar.map_err(|e| Error::CalendarParse(e.to_string()))?;
            for ical_event in calendar.events {
                match event_from_ical(ical_event, tz) {
                    Some(event) => events.push(event),
                    None => warn!("Skipping event without UID or readable DTSTART"),
                }
            }
        }

        Ok(Calendar { events })
    }

    pub fn to_ics(&self) -> String {
        let mut calendar = IcalCalendar::new();
        calendar.properties = vec![
            property("VERSION", None, "2.0"),
            property("PRODID", None, PRODID),
            property("CALSCALE", None, "GREGORIAN"),
        ];
        calendar.events = self.events.iter().map(event_to_ical).collect();
        calendar.generate()
    }

    /// Replace the file at `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_ics())?;
        Ok(())
    }

    /// Remove every event starting at or after `cutoff`.
    pub fn remove_starting_from(&mut self, cutoff: DateTime<Utc>) -> Vec<CalendarEvent> {
        let (removed, kept) = std::mem::take(&mut self.events)
            .into_iter()
            .partition(|event| event.start >= cutoff);
        self.events = kept;
        removed
    }

    /// Add `event`, replacing any event with the same UID.
    pub fn upsert(&mut self, event: CalendarEvent) {
        self.events.retain(|existing| existing.uid != event.uid);
        self.events.push(event);
    }

    /// Events ordered by start time.
    pub fn timeline(&self) -> Vec<&CalendarEvent> {
        let mut events: Vec<&CalendarEvent> = self.events.iter().collect();
        events.sort_by_key(|event| event.start);
        events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn event_from_ical(ical_event: IcalEvent, tz: Tz) -> Option<CalendarEvent> {
    let mut uid = None;
    let mut summary = String::new();
    let mut start = None;
    let mut end = None;
    let mut location = None;
    let mut comment = None;
    let mut geo = None;
    let mut stamp = None;

    for property in ical_event.properties {
        match property.name.as_str() {
            "UID" => uid = property.value,
            "SUMMARY" => summary = property.value.as_deref().map(unescape).unwrap_or_default(),
            "LOCATION" => location = property.value.as_deref().map(unescape),
            "COMMENT" => comment = property.value.as_deref().map(unescape),
            "GEO" => geo = property.value.as_deref().and_then(parse_geo),
            "DTSTART" => start = parse_date_time(&property, tz),
            "DTEND" => end = parse_date_time(&property, tz),
            "DTSTAMP" => {
                stamp = parse_date_time(&property, tz).map(|dt| dt.with_timezone(&Utc))
            }
            _ => {}
        }
    }

    let uid = uid.filter(|uid| !uid.is_empty())?;
    let start = start?;
    Some(CalendarEvent {
        uid,
        summary,
        start,
        end: end.unwrap_or(start),
        location,
        comment,
        geo,
        stamp: stamp.unwrap_or_else(Utc::now),
    })
}

fn event_to_ical(event: &CalendarEvent) -> IcalEvent {
    let mut ical_event = IcalEvent::new();
    let mut properties = vec![
        property("UID", None, &event.uid),
        property("DTSTAMP", None, &event.stamp.format(UTC_FORMAT).to_string()),
        date_time_property("DTSTART", &event.start),
        date_time_property("DTEND", &event.end),
        property("SUMMARY", None, &escape(&event.summary)),
    ];
    if let Some(location) = &event.location {
        properties.push(property("LOCATION", None, &escape(location)));
    }
    if let Some(geo) = &event.geo {
        properties.push(property(
            "GEO",
            None,
            &format!("{};{}", geo.latitude, geo.longitude),
        ));
    }
    if let Some(comment) = &event.comment {
        properties.push(property("COMMENT", None, &escape(comment)));
    }
    ical_event.properties = properties;
    ical_event
}

fn property(name: &str, params: Option<Vec<(String, Vec<String>)>>, value: &str) -> Property {
    Property {
        name: name.to_string(),
        params,
        value: Some(value.to_string()),
    }
}

fn date_time_property(name: &str, date_time: &DateTime<Tz>) -> Property {
    let tz = date_time.timezone();
    // local times repeated by a DST fall-back can only be written unambiguously in UTC
    let unambiguous = matches!(
        tz.from_local_datetime(&date_time.naive_local()),
        LocalResult::Single(_)
    );
    if tz == Tz::UTC || !unambiguous {
        property(name, None, &date_time.format(UTC_FORMAT).to_string())
    } else {
        property(
            name,
            Some(vec![(
                "TZID".to_string(),
                vec![date_time.timezone().name().to_string()],
            )]),
            &date_time.format(LOCAL_FORMAT).to_string(),
        )
    }
}

fn parse_date_time(property: &Property, default_tz: Tz) -> Option<DateTime<Tz>> {
    let value = property.value.as_deref()?.trim();

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, LOCAL_FORMAT).ok()?;
        return Some(Utc.from_utc_datetime(&naive).with_timezone(&default_tz));
    }

    let tz = property
        .params
        .as_ref()
        .and_then(|params| {
            params.iter().find_map(|(key, values)| {
                if key == "TZID" {
                    values.first().cloned()
                } else {
                    None
                }
            })
        })
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(default_tz);

    let naive = match NaiveDateTime::parse_from_str(value, LOCAL_FORMAT) {
        Ok(naive) => naive,
        Err(_) => NaiveDate::parse_from_str(value, DATE_FORMAT)
            .ok()?
            .and_hms_opt(0, 0, 0)?,
    };

    tz.from_local_datetime(&naive).earliest()
}

fn parse_geo(value: &str) -> Option<GeoPoint> {
    let (latitude, longitude) = value.split_once(';')?;
    Some(GeoPoint {
        latitude: latitude.trim().parse().ok()?,
        longitude: longitude.trim().parse().ok()?,
    })
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape(text: &str) -> String {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => unescaped.push('\n'),
            Some(other) => unescaped.push(other),
            None => unescaped.push('\\'),
        }
    }
    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn event(uid: &str, start: DateTime<Tz>) -> CalendarEvent {
        CalendarEvent {
            uid: uid.to_string(),
            summary: format!("Class {}", uid),
            start,
            end: start + Duration::hours(1),
            location: None,
            comment: None,
            geo: None,
            stamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_remove_starting_from_keeps_past_events() {
        let tz = Tz::Europe__Paris;
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let at = |offset: Duration| (now + offset).with_timezone(&tz);

        let mut calendar = Calendar {
            events: vec![
                event("future-2", at(Duration::days(2))),
                event("past-1", at(-Duration::days(1))),
                event("exactly-now", at(Duration::zero())),
                event("future-1", at(Duration::hours(3))),
                event("past-2", at(-Duration::seconds(1))),
            ],
        };

        let removed = calendar.remove_starting_from(now);
        let mut removed_uids: Vec<&str> = removed.iter().map(|e| e.uid.as_str()).collect();
        removed_uids.sort();
        assert_eq!(removed_uids, vec!["exactly-now", "future-1", "future-2"]);

        let kept: Vec<&str> = calendar.events.iter().map(|e| e.uid.as_str()).collect();
        assert_eq!(kept, vec!["past-1", "past-2"]);
    }

    #[test]
    fn test_upsert_replaces_same_uid() {
        let start = Tz::UTC.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap();
        let mut calendar = Calendar::new();
        calendar.upsert(event("a", start));
        calendar.upsert(event("b", start));

        let mut updated = event("a", start);
        updated.comment = Some("5/10".to_string());
        calendar.upsert(updated);

        assert_eq!(calendar.len(), 2);
        let a = calendar.events.iter().find(|e| e.uid == "a").unwrap();
        assert_eq!(a.comment.as_deref(), Some("5/10"));
    }

    #[test]
    fn test_timeline_is_sorted() {
        let base = Tz::UTC.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap();
        let calendar = Calendar {
            events: vec![
                event("late", base + Duration::days(1)),
                event("early", base),
            ],
        };
        let uids: Vec<&str> = calendar.timeline().iter().map(|e| e.uid.as_str()).collect();
        assert_eq!(uids, vec!["early", "late"]);
    }

    #[test]
    fn test_ics_round_trip() {
        let tz = Tz::Europe__Paris;
        let mut with_details = event("booking-1", tz.with_ymd_and_hms(2024, 7, 1, 19, 0, 0).unwrap());
        with_details.summary = "CrossFit, WOD; level 2".to_string();
        with_details.location = Some("12 Rue X 75000 Paris".to_string());
        with_details.comment = Some("7/10".to_string());
        with_details.geo = Some(GeoPoint {
            latitude: 48.8566,
            longitude: 2.3522,
        });

        let calendar = Calendar {
            events: vec![
                with_details,
                event("booking-2", tz.with_ymd_and_hms(2024, 12, 1, 7, 30, 0).unwrap()),
                // second 02:30 of the October fall-back, in CET
                event(
                    "fall-back",
                    Utc.with_ymd_and_hms(2024, 10, 27, 1, 30, 0).unwrap().with_timezone(&tz),
                ),
            ],
        };

        let text = calendar.to_ics();
        assert!(text.contains("BEGIN:VCALENDAR"));
        assert!(text.contains("DTSTART;TZID=Europe/Paris:20240701T190000"));
        assert!(text.contains("DTSTART:20241027T013000Z"));

        let parsed = Calendar::from_ics(&text, Tz::UTC).unwrap();
        assert_eq!(parsed, calendar);
    }

    #[test]
    fn test_utc_calendar_round_trip() {
        let calendar = Calendar {
            events: vec![event("utc", Tz::UTC.with_ymd_and_hms(2024, 7, 1, 17, 0, 0).unwrap())],
        };
        let text = calendar.to_ics();
        assert!(text.contains("DTSTART:20240701T170000Z"));
        assert_eq!(Calendar::from_ics(&text, Tz::UTC).unwrap(), calendar);
    }

    #[test]
    fn test_from_ics_accepts_foreign_events() {
        let text = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:utc-event\r\n\
SUMMARY:Utc\r\n\
DTSTART:20240301T100000Z\r\n\
DTEND:20240301T110000Z\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:floating-event\r\n\
SUMMARY:Floating\r\n\
DTSTART:20240301T100000\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
UID:all-day\r\n\
DTSTART;VALUE=DATE:20240302\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:No uid\r\n\
DTSTART:20240301T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let tz = Tz::Europe__Paris;
        let calendar = Calendar::from_ics(text, tz).unwrap();
        assert_eq!(calendar.len(), 3);

        let utc = &calendar.events[0];
        assert_eq!(utc.start, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());

        let floating = &calendar.events[1];
        assert_eq!(floating.start, tz.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(floating.end, floating.start);

        let all_day = &calendar.events[2];
        assert_eq!(all_day.start, tz.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_from_ics_rejects_garbage() {
        assert!(Calendar::from_ics("BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nthis is not ics", Tz::UTC).is_err());
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing.ics");
        assert_eq!(Calendar::read_from(&path, Tz::UTC).unwrap(), None);
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("out.ics");
        let calendar = Calendar {
            events: vec![event("x", Tz::UTC.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())],
        };

        calendar.write_to(&path).unwrap();
        let read = Calendar::read_from(&path, Tz::UTC).unwrap();
        assert_eq!(read, Some(calendar));
    }

    #[test]
    fn test_escape_unescape() {
        let text = "a,b;c\\d\ne";
        assert_eq!(escape(text), "a\\,b\\;c\\\\d\\ne");
        assert_eq!(unescape(&escape(text)), text);
    }
}
