pub mod calendar;
pub mod client;
pub mod config;
pub mod error;
pub mod geocode;
pub mod mapping;
pub mod models;
pub mod session;

use calendar::Calendar;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use client::{BookingClient, HttpBookingClient, PersistentClient};
use geocode::{Geocoder, NominatimGeocoder};
use models::BookingsPage;
use session::{CookieStore, SessionState};
use tracing::{debug, error, info};

pub use config::Config;
pub use error::{Error, Result};

/// Grace window after "now": events starting before `now + FUTURE_GRACE_SECS`
/// are kept as past, later ones are rebuilt from the API.
pub const FUTURE_GRACE_SECS: i64 = 1;

/// Load the calendar at `config.output_ics`. A missing or unreadable file
/// yields an empty calendar.
pub fn load_calendar(config: &Config, tz: Tz) -> Calendar {
    match Calendar::read_from(&config.output_ics, tz) {
        Ok(Some(calendar)) => {
            info!("Got calendar with {} bookings", calendar.len());
            calendar
        }
        Ok(None) => {
            info!("No calendar at {}, starting empty", config.output_ics.display());
            Calendar::new()
        }
        Err(e) => {
            error!(
                "Failed to parse ics file '{}': {}",
                config.output_ics.display(),
                e
            );
            Calendar::new()
        }
    }
}

/// Drop future events and rebuild them from `bookings`.
pub fn merge_bookings(
    calendar: &mut Calendar,
    bookings: &BookingsPage,
    now: DateTime<Utc>,
    tz: Tz,
    geocoder: Option<&dyn Geocoder>,
) -> Result<()> {
    info!("Deleting future events to avoid dupes");
    for event in calendar.remove_starting_from(now + Duration::seconds(FUTURE_GRACE_SECS)) {
        info!(
            "\t{} from {} to {} (UID={})",
            event.summary, event.start, event.end, event.uid
        );
    }
    info!("{} bookings left in calendar", calendar.len());

    info!("Got {} bookings, creating events", bookings.bookings.len());
    for booking in &bookings.bookings {
        let event = mapping::booking_to_event(booking, tz, geocoder)?;
        calendar.upsert(event);
    }
    info!("Calendar now has {} bookings", calendar.len());
    for event in calendar.timeline() {
        debug!("\t{} at {} (UID={})", event.summary, event.start, event.uid);
    }

    Ok(())
}

fn open_client(config: &Config) -> Box<dyn BookingClient> {
    match &config.cookies_dir {
        Some(dir) => Box::new(PersistentClient::open(
            &config.bookings_url,
            &config.seed_cookie,
            CookieStore::new(dir),
        )),
        None => Box::new(HttpBookingClient::new(
            &config.bookings_url,
            SessionState::from_seed(&config.seed_cookie),
        )),
    }
}

pub fn run(config: &Config) -> Result<()> {
    let tz = config.time_zone();
    let mut calendar = load_calendar(config, tz);

    let mut client = open_client(config);
    info!("Fetching bookings from {}", config.bookings_url);
    let Some(body) = client.fetch_bookings()? else {
        error!("Failed to get bookings from the API. Exiting...");
        return Ok(());
    };
    let bookings: BookingsPage = serde_json::from_value(body)?;

    let geocoder = config.geocode_country.as_ref().map(|country| {
        info!("Geocoding locations in '{}'", country);
        NominatimGeocoder::new(&config.geocoder_url, country)
    });
    if geocoder.is_none() {
        debug!("GEOCODE_COUNTRY not set, events will have no coordinates");
    }

    merge_bookings(
        &mut calendar,
        &bookings,
        Utc::now(),
        tz,
        geocoder.as_ref().map(|g| g as &dyn Geocoder),
    )?;

    info!("Writing calendar file to {}", config.output_ics.display());
    calendar.write_to(&config.output_ics)?;

    info!("Done. Exiting.");
    Ok(())
}
