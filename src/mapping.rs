use crate::calendar::CalendarEvent;
use crate::error::{Error, Result};
use crate::geocode::Geocoder;
use crate::models::{Booking, Session};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;
use uuid::Uuid;

/// Timestamp format used by the bookings API, always UTC.
pub const API_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn parse_api_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, API_TIMESTAMP_FORMAT).map_err(|source| {
        Error::Timestamp {
            value: value.to_string(),
            source,
        }
    })
}

pub fn utc_to_local<T: TimeZone>(utc: &NaiveDateTime, tz: &T) -> DateTime<T> {
    Utc.from_utc_datetime(utc).with_timezone(tz)
}

/// The session's own address, or the gym's postal address.
pub fn booking_location(session: &Session) -> Option<String> {
    match (&session.address, &session.business_entity) {
        (Some(address), _) => Some(address.clone()),
        (None, Some(entity)) => Some(format!(
            "{} {} {}",
            entity.address, entity.zipcode, entity.city
        )),
        (None, None) => None,
    }
}

/// Booked slots over capacity, e.g. `7/10`.
pub fn occupancy_comment(session: &Session) -> String {
    format!(
        "{}/{}",
        session.maxBookingSlots - session.availableBookingSpots,
        session.maxBookingSlots
    )
}

/// Identifier that stays the same for a booking across runs.
pub fn booking_uid(booking: &Booking) -> String {
    let key = match (&booking.session.id, &booking.id) {
        (Some(id), _) => format!("session:{}", id),
        (None, Some(id)) => format!("booking:{}", id),
        (None, None) => format!(
            "slot:{}|{}|{}",
            booking.session.start_date,
            booking.session.training_category.name,
            booking_location(&booking.session).unwrap_or_default()
        ),
    };
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

pub fn booking_to_event(
    booking: &Booking,
    tz: Tz,
    geocoder: Option<&dyn Geocoder>,
) -> Result<CalendarEvent> {
    let session = &booking.session;
    let start = utc_to_local(&parse_api_timestamp(&session.start_date)?, &tz);
    let end = utc_to_local(&parse_api_timestamp(&session.end_date)?, &tz);
    let location = booking_location(session);

    let geo = match (geocoder, &location) {
        (Some(geocoder), Some(address)) => match geocoder.locate(address) {
            Ok(Some(point)) => Some(point),
            Ok(None) => {
                warn!("No coordinates found for '{}'", address);
                None
            }
            Err(e) => {
                warn!("Geocoding '{}' failed: {}", address, e);
                None
            }
        },
        _ => None,
    };

    Ok(CalendarEvent {
        uid: booking_uid(booking),
        summary: session.training_category.name.clone(),
        start,
        end,
        location,
        comment: Some(occupancy_comment(session)),
        geo,
        stamp: Utc::now(),
    })
}
